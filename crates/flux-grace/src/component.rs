use crate::context::ShutdownContext;
use crate::error::ComponentError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// 可关闭组件接口
#[async_trait]
pub trait Shutdown: Send + Sync {
    /// 停止组件，应在 `ctx` 的截止时间内返回
    async fn shutdown(&self, ctx: ShutdownContext) -> Result<(), ComponentError>;

    /// 组件名称，仅用于日志
    fn name(&self) -> &str {
        "component"
    }
}

/// 由闭包构成的组件
pub struct ShutdownFn<F> {
    name: String,
    f: F,
}

impl<F, Fut> ShutdownFn<F>
where
    F: Fn(ShutdownContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Shutdown for ShutdownFn<F>
where
    F: Fn(ShutdownContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
{
    async fn shutdown(&self, ctx: ShutdownContext) -> Result<(), ComponentError> {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 把闭包包装成可注册的组件
pub fn shutdown_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Shutdown>
where
    F: Fn(ShutdownContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ComponentError>> + Send + 'static,
{
    Arc::new(ShutdownFn::new(name, f))
}
