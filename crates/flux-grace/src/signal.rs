use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 关闭信号类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT - Ctrl+C
    Interrupt,

    /// SIGTERM - 优雅关闭
    Term,

    /// SIGQUIT
    Quit,

    /// 手动触发
    Manual,
}

/// 创建单槽触发通道
///
/// 容量为 1：在消费方开始等待之前，也能缓存恰好一个信号而不阻塞发送方。
pub fn trigger_channel() -> (TriggerSender, TriggerReceiver) {
    let (tx, rx) = mpsc::channel(1);
    let sender = TriggerSender { tx: tx.clone() };
    (sender, TriggerReceiver { rx, tx })
}

/// 触发通道的发送端
#[derive(Debug, Clone)]
pub struct TriggerSender {
    tx: mpsc::Sender<ShutdownSignal>,
}

impl TriggerSender {
    /// 写入一个触发信号，不阻塞
    ///
    /// 槽位已被占用时丢弃本次信号，返回 `false`。
    pub fn trigger(&self, signal: ShutdownSignal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                debug!("Trigger already pending, dropping {:?}", signal);
                false
            }
            Err(TrySendError::Closed(signal)) => {
                debug!("Trigger receiver gone, dropping {:?}", signal);
                false
            }
        }
    }

    /// 手动触发关闭
    pub fn trigger_shutdown(&self) -> bool {
        info!("Manual shutdown triggered");
        self.trigger(ShutdownSignal::Manual)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 触发通道的接收端
///
/// 自身持有一个发送端，所以通道永远不会因为外部发送端全部释放而关闭，
/// 等待会一直阻塞到真正收到信号为止。
#[derive(Debug)]
pub struct TriggerReceiver {
    rx: mpsc::Receiver<ShutdownSignal>,
    tx: mpsc::Sender<ShutdownSignal>,
}

impl TriggerReceiver {
    /// 与该接收端相连的发送端
    pub fn sender(&self) -> TriggerSender {
        TriggerSender {
            tx: self.tx.clone(),
        }
    }

    /// 等待恰好一个触发信号
    pub async fn recv(&mut self) -> ShutdownSignal {
        self.rx.recv().await.unwrap_or(ShutdownSignal::Manual)
    }

    /// 丢弃已排队但尚未消费的信号，返回丢弃的数量
    pub fn clear(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(signal) = self.rx.try_recv() {
            debug!("Discarding stale trigger {:?}", signal);
            dropped += 1;
        }
        dropped
    }
}

/// 把操作系统信号转发到触发通道
///
/// 信号处理在创建时同步安装，释放时中止转发任务。
pub(crate) struct SignalForwarder {
    handle: JoinHandle<()>,
}

impl SignalForwarder {
    #[cfg(unix)]
    pub(crate) fn spawn(sender: TriggerSender) -> Self {
        use tokio::signal::unix::SignalKind;

        let mut sigint = install(SignalKind::interrupt(), "SIGINT");
        let mut sigterm = install(SignalKind::terminate(), "SIGTERM");
        let mut sigquit = install(SignalKind::quit(), "SIGQUIT");
        // SIGKILL 无法被拦截
        debug!("SIGKILL cannot be intercepted, skipping registration");

        if sigint.is_none() && sigterm.is_none() && sigquit.is_none() {
            warn!("No OS signal handler installed, only manual triggers will start shutdown");
        }

        let handle = tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    Some(_) = recv(&mut sigint) => ShutdownSignal::Interrupt,
                    Some(_) = recv(&mut sigterm) => ShutdownSignal::Term,
                    Some(_) = recv(&mut sigquit) => ShutdownSignal::Quit,
                    else => break,
                };

                info!("Received {:?}", signal);
                if sender.is_closed() {
                    break;
                }
                sender.trigger(signal);
            }
        });

        Self { handle }
    }

    #[cfg(not(unix))]
    pub(crate) fn spawn(sender: TriggerSender) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    break;
                }
                info!("Received Ctrl+C");
                if sender.is_closed() {
                    break;
                }
                sender.trigger(ShutdownSignal::Interrupt);
            }
        });

        Self { handle }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(unix)]
fn install(
    kind: tokio::signal::unix::SignalKind,
    name: &str,
) -> Option<tokio::signal::unix::Signal> {
    match tokio::signal::unix::signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            warn!("Failed to install {} handler: {}", name, e);
            None
        }
    }
}

#[cfg(unix)]
async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => std::future::pending().await,
    }
}
