use crate::component::Shutdown;
use crate::config::{GraceConfig, DEFAULT_TIMEOUT_MS};
use crate::context::ShutdownContext;
use crate::error::GraceError;
use crate::signal::{trigger_channel, SignalForwarder, TriggerReceiver, TriggerSender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 关闭阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GracePhase {
    Idle,
    WaitingForTrigger,
    ShuttingDown,
    Succeeded,
    TimedOut,
}

/// 截止时间从何时开始计时
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeadlineArming {
    /// 进入 `wait_and_shutdown` 时，等待信号的时间也计入超时
    #[default]
    OnEntry,

    /// 收到触发信号时
    OnTrigger,
}

/// 优雅关闭协调器
///
/// 等待一次触发，然后并发关闭所有已注册组件，整体受同一个截止时间约束。
/// `wait_and_shutdown` 可以重复调用，每次都需要新的触发信号；
/// 关闭期间到达的信号在返回前被丢弃。
pub struct Grace {
    components: Vec<Arc<dyn Shutdown>>,
    timeout: Duration,
    trigger: TriggerReceiver,
    os_signals: bool,
    arming: DeadlineArming,
    phase_tx: watch::Sender<GracePhase>,
}

impl Grace {
    pub fn new() -> Self {
        GraceBuilder::new().build()
    }

    pub fn builder() -> GraceBuilder {
        GraceBuilder::new()
    }

    /// 等待触发信号，然后在截止时间内关闭所有组件
    ///
    /// 所有组件都在截止时间前返回时成功，否则返回 [`GraceError::Timeout`]。
    /// 组件自身的错误只记录日志。超时后仍在运行的组件不会被中止，
    /// 它们继续在后台运行，完成时各自记录一条日志。
    pub async fn wait_and_shutdown(&mut self) -> Result<(), GraceError> {
        let entered = Instant::now();
        let armed = match self.arming {
            DeadlineArming::OnEntry => Some(ShutdownContext::starting_at(entered, self.timeout)),
            DeadlineArming::OnTrigger => None,
        };

        let forwarder = self
            .os_signals
            .then(|| SignalForwarder::spawn(self.trigger.sender()));

        self.set_phase(GracePhase::WaitingForTrigger);
        info!("Shutdown coordinator started, waiting for signal...");

        let signal = self.trigger.recv().await;
        info!("Received shutdown signal: {:?}", signal);

        let ctx = armed.unwrap_or_else(|| ShutdownContext::with_timeout(self.timeout));

        self.set_phase(GracePhase::ShuttingDown);
        info!(
            "Shutting down {} components, {:?} left before deadline",
            self.components.len(),
            ctx.remaining()
        );

        let start = Instant::now();
        let outstanding = Arc::new(AtomicUsize::new(self.components.len()));
        let (done_tx, done_rx) = oneshot::channel();

        tokio::spawn(shutdown_all(
            self.components.clone(),
            ctx,
            outstanding.clone(),
            done_tx,
        ));

        let result = tokio::select! {
            biased;
            Ok(()) = done_rx => Ok(()),
            _ = ctx.expired() => Err(GraceError::Timeout),
        };

        match result {
            Ok(()) => {
                self.set_phase(GracePhase::Succeeded);
                info!("Graceful shutdown complete in {:?}", start.elapsed());
            }
            Err(_) => {
                self.set_phase(GracePhase::TimedOut);
                warn!(
                    "Shutdown timed out after {:?}, {} components still running in background",
                    start.elapsed(),
                    outstanding.load(Ordering::SeqCst)
                );
            }
        }

        // 关闭期间收到的信号不能触发下一次调用
        drop(forwarder);
        let stale = self.trigger.clear();
        if stale > 0 {
            debug!("Discarded {} triggers received during shutdown", stale);
        }

        result
    }

    /// 与触发通道相连的发送端
    pub fn trigger_sender(&self) -> TriggerSender {
        self.trigger.sender()
    }

    pub fn phase(&self) -> GracePhase {
        *self.phase_tx.borrow()
    }

    /// 订阅阶段变化
    pub fn subscribe_phase(&self) -> watch::Receiver<GracePhase> {
        self.phase_tx.subscribe()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn listens_os_signals(&self) -> bool {
        self.os_signals
    }

    fn set_phase(&self, phase: GracePhase) {
        debug!("Shutdown phase: {:?}", phase);
        self.phase_tx.send_replace(phase);
    }
}

impl Default for Grace {
    fn default() -> Self {
        Self::new()
    }
}

/// 并发关闭所有组件，全部返回后发出完成信号
///
/// 协调器超时后本任务被分离，继续等待剩余组件。
async fn shutdown_all(
    components: Vec<Arc<dyn Shutdown>>,
    ctx: ShutdownContext,
    outstanding: Arc<AtomicUsize>,
    done: oneshot::Sender<()>,
) {
    let total = components.len();
    let mut tasks = JoinSet::new();

    for component in components {
        tasks.spawn(async move {
            let name = component.name().to_string();

            match component.shutdown(ctx).await {
                Ok(()) if ctx.is_expired() => {
                    warn!("Component {} finished after deadline", name);
                    true
                }
                Ok(()) => {
                    debug!("Component {} shut down", name);
                    true
                }
                Err(e) => {
                    error!("Failed to shut down {}: {}", name, e);
                    false
                }
            }
        });
    }

    let mut failed = 0;
    while let Some(joined) = tasks.join_next().await {
        outstanding.fetch_sub(1, Ordering::SeqCst);

        match joined {
            Ok(true) => {}
            Ok(false) => failed += 1,
            Err(e) => {
                error!("Component shutdown task panicked: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        warn!("{} of {} components failed to shut down", failed, total);
    }

    // 接收端在超时后已释放
    let _ = done.send(());
}

/// 关闭协调器构建器
///
/// 标量选项后设置的覆盖先设置的，组件按调用顺序追加。
pub struct GraceBuilder {
    components: Vec<Arc<dyn Shutdown>>,
    timeout: Duration,
    trigger: Option<TriggerReceiver>,
    os_signals: Option<bool>,
    arming: DeadlineArming,
}

impl GraceBuilder {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            trigger: None,
            os_signals: None,
            arming: DeadlineArming::default(),
        }
    }

    /// 全局截止时间，默认 5 秒
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 注册组件，可多次调用
    pub fn with_shutdown(mut self, component: Arc<dyn Shutdown>) -> Self {
        debug!("Registering component: {}", component.name());
        self.components.push(component);
        self
    }

    /// 使用外部触发通道代替内部创建的通道
    ///
    /// 未显式调用 `with_os_signals` 时，外部通道不再监听操作系统信号。
    pub fn with_trigger(mut self, trigger: TriggerReceiver) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_os_signals(mut self, enabled: bool) -> Self {
        self.os_signals = Some(enabled);
        self
    }

    pub fn with_deadline_arming(mut self, arming: DeadlineArming) -> Self {
        self.arming = arming;
        self
    }

    /// 应用配置中的超时、计时方式和信号设置
    pub fn with_config(mut self, config: &GraceConfig) -> Self {
        self.timeout = config.timeout();
        self.arming = if config.arm_on_trigger {
            DeadlineArming::OnTrigger
        } else {
            DeadlineArming::OnEntry
        };
        if let Some(enabled) = config.os_signals {
            self.os_signals = Some(enabled);
        }
        self
    }

    pub fn build(self) -> Grace {
        if self.timeout.is_zero() {
            warn!("Shutdown timeout is zero, the deadline expires immediately");
        }

        let os_signals = self.os_signals.unwrap_or(self.trigger.is_none());
        let trigger = self.trigger.unwrap_or_else(|| trigger_channel().1);
        let (phase_tx, _) = watch::channel(GracePhase::Idle);

        Grace {
            components: self.components,
            timeout: self.timeout,
            trigger,
            os_signals,
            arming: self.arming,
            phase_tx,
        }
    }
}

impl Default for GraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::shutdown_fn;
    use crate::error::ComponentError;
    use crate::signal::ShutdownSignal;
    use async_trait::async_trait;
    use tokio::time::{sleep, timeout};

    struct SleepComponent {
        duration: Duration,
    }

    #[async_trait]
    impl Shutdown for SleepComponent {
        async fn shutdown(&self, _ctx: ShutdownContext) -> Result<(), ComponentError> {
            sleep(self.duration).await;
            Ok(())
        }

        fn name(&self) -> &str {
            "sleeper"
        }
    }

    struct PanicComponent;

    #[async_trait]
    impl Shutdown for PanicComponent {
        async fn shutdown(&self, _ctx: ShutdownContext) -> Result<(), ComponentError> {
            panic!("component exploded");
        }
    }

    fn sleeper(ms: u64) -> Arc<dyn Shutdown> {
        Arc::new(SleepComponent {
            duration: Duration::from_millis(ms),
        })
    }

    #[test]
    fn test_builder_defaults() {
        let grace = Grace::builder().build();

        assert_eq!(grace.timeout(), Duration::from_secs(5));
        assert_eq!(grace.component_count(), 0);
        assert!(grace.listens_os_signals());
        assert_eq!(grace.phase(), GracePhase::Idle);
    }

    #[test]
    fn test_builder_last_write_wins_and_appends() {
        let (_sender, receiver) = trigger_channel();

        let grace = Grace::builder()
            .with_timeout(Duration::from_secs(1))
            .with_shutdown(sleeper(1))
            .with_timeout(Duration::from_millis(300))
            .with_trigger(receiver)
            .with_shutdown(sleeper(1))
            .build();

        assert_eq!(grace.timeout(), Duration::from_millis(300));
        assert_eq!(grace.component_count(), 2);
        assert!(!grace.listens_os_signals());
    }

    #[test]
    fn test_builder_with_config() {
        let config = GraceConfig {
            timeout_ms: 750,
            arm_on_trigger: true,
            os_signals: Some(false),
        };

        let grace = Grace::builder()
            .with_timeout(Duration::from_secs(9))
            .with_config(&config)
            .build();

        assert_eq!(grace.timeout(), Duration::from_millis(750));
        assert_eq!(grace.arming, DeadlineArming::OnTrigger);
        assert!(!grace.listens_os_signals());

        // 之后的选项覆盖配置
        let grace = Grace::builder()
            .with_config(&config)
            .with_timeout(Duration::from_secs(2))
            .with_os_signals(true)
            .build();

        assert_eq!(grace.timeout(), Duration::from_secs(2));
        assert!(grace.listens_os_signals());
    }

    #[tokio::test]
    async fn test_no_components_succeeds() {
        let mut grace = Grace::builder().with_os_signals(false).build();
        grace.trigger_sender().trigger_shutdown();

        assert_eq!(grace.wait_and_shutdown().await, Ok(()));
        assert_eq!(grace.phase(), GracePhase::Succeeded);
    }

    #[tokio::test]
    async fn test_component_errors_are_absorbed() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_timeout(Duration::from_secs(1))
            .with_shutdown(shutdown_fn("broken", |_ctx| async {
                Err::<(), _>(ComponentError::Failed("disk full".to_string()))
            }))
            .with_shutdown(sleeper(20))
            .build();

        grace.trigger_sender().trigger(ShutdownSignal::Term);

        assert_eq!(grace.wait_and_shutdown().await, Ok(()));
    }

    #[tokio::test]
    async fn test_panicking_component_reaches_barrier() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_timeout(Duration::from_secs(1))
            .with_shutdown(Arc::new(PanicComponent))
            .build();

        grace.trigger_sender().trigger_shutdown();

        assert_eq!(grace.wait_and_shutdown().await, Ok(()));
    }

    #[tokio::test]
    async fn test_phase_transitions() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_timeout(Duration::from_millis(50))
            .with_shutdown(sleeper(1_000))
            .build();

        let mut phases = grace.subscribe_phase();
        let sender = grace.trigger_sender();

        let handle = tokio::spawn(async move {
            let result = grace.wait_and_shutdown().await;
            (grace, result)
        });

        phases
            .wait_for(|phase| *phase == GracePhase::WaitingForTrigger)
            .await
            .unwrap();

        sender.trigger_shutdown();

        let (grace, result) = handle.await.unwrap();
        assert_eq!(result, Err(GraceError::Timeout));
        assert_eq!(grace.phase(), GracePhase::TimedOut);
    }

    #[tokio::test]
    async fn test_deadline_armed_on_entry_includes_wait() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_timeout(Duration::from_millis(200))
            .with_shutdown(sleeper(120))
            .build();

        let sender = grace.trigger_sender();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            sender.trigger_shutdown();
        });

        assert_eq!(grace.wait_and_shutdown().await, Err(GraceError::Timeout));
    }

    #[tokio::test]
    async fn test_deadline_armed_on_trigger_excludes_wait() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_deadline_arming(DeadlineArming::OnTrigger)
            .with_timeout(Duration::from_millis(400))
            .with_shutdown(sleeper(150))
            .build();

        let sender = grace.trigger_sender();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            sender.trigger_shutdown();
        });

        assert_eq!(grace.wait_and_shutdown().await, Ok(()));
    }

    #[tokio::test]
    async fn test_does_not_return_without_trigger() {
        let mut grace = Grace::builder()
            .with_os_signals(false)
            .with_timeout(Duration::from_millis(10))
            .build();

        let waited = timeout(Duration::from_millis(200), grace.wait_and_shutdown()).await;

        assert!(waited.is_err());
        assert_eq!(grace.phase(), GracePhase::WaitingForTrigger);
    }
}
