use crate::error::ComponentError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

// 约 30 年，超大超时值的上限
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// 截止时间上下文
///
/// 每次 `wait_and_shutdown` 调用只武装一次，所有组件共享同一个截止时间。
/// 协调器无法强制终止组件，组件需要自行检查并配合截止时间。
#[derive(Debug, Clone, Copy)]
pub struct ShutdownContext {
    deadline: Instant,
}

impl ShutdownContext {
    /// 从现在起 `timeout` 后到期
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::starting_at(Instant::now(), timeout)
    }

    /// 从 `start` 起 `timeout` 后到期
    pub fn starting_at(start: Instant, timeout: Duration) -> Self {
        let deadline = start
            .checked_add(timeout)
            .unwrap_or_else(|| start + FAR_FUTURE);
        Self::with_deadline(deadline)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 剩余时间，已到期时为零
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// 截止时间到达时完成
    pub async fn expired(&self) {
        sleep_until(self.deadline).await;
    }

    /// 在截止时间内运行 `fut`，超时返回 [`ComponentError::DeadlineExceeded`]
    pub async fn run_until_deadline<F, T>(&self, fut: F) -> Result<T, ComponentError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            out = fut => Ok(out),
            _ = self.expired() => Err(ComponentError::DeadlineExceeded),
        }
    }
}
