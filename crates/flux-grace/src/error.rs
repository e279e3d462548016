use thiserror::Error;

/// 协调器对调用方暴露的唯一错误
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GraceError {
    /// 截止时间先于所有组件完成而到达
    #[error("closed by timeout")]
    Timeout,
}

/// 单个组件关闭失败
///
/// 只会被记录到日志，不会向上传播。
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("Shutdown failed: {0}")]
    Failed(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}
