use async_trait::async_trait;
use flux_grace::{shutdown_fn, ComponentError, ConfigLoader, Grace, Shutdown, ShutdownContext};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct HttpServer {
    drain: Duration,
}

#[async_trait]
impl Shutdown for HttpServer {
    async fn shutdown(&self, ctx: ShutdownContext) -> Result<(), ComponentError> {
        println!("  [http] 排空连接，剩余 {:?}", ctx.remaining());
        ctx.run_until_deadline(sleep(self.drain)).await?;
        println!("  [http] 已停止");
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env();
    tracing_subscriber::fmt()
        .with_env_filter(filter.unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== FLUX 优雅关闭示例 ===\n");

    // 1. 加载配置：默认值 < grace.toml < FLUX_GRACE_* 环境变量
    let config = ConfigLoader::new().with_file("grace.toml").load()?;
    println!("1. 关闭超时: {:?}\n", config.timeout());

    // 2. 注册组件
    let grace = Grace::builder()
        .with_config(&config)
        .with_shutdown(Arc::new(HttpServer {
            drain: Duration::from_millis(300),
        }))
        .with_shutdown(shutdown_fn("metrics", |_ctx| async {
            println!("  [metrics] 刷新缓冲");
            Ok::<(), ComponentError>(())
        }))
        .with_shutdown(shutdown_fn("mqtt", |_ctx| async {
            Err::<(), _>(ComponentError::Failed("broker unreachable".to_string()))
        }));
    let mut grace = grace.build();
    println!("2. 已注册 {} 个组件\n", grace.component_count());

    // 3. 等待 Ctrl+C / SIGTERM / SIGQUIT
    println!("3. 按 Ctrl+C 触发优雅关闭（2 秒后自动触发）\n");
    let sender = grace.trigger_sender();
    tokio::spawn(async move {
        sleep(Duration::from_secs(2)).await;
        sender.trigger_shutdown();
    });

    match grace.wait_and_shutdown().await {
        Ok(()) => println!("\n=== 关闭完成 ==="),
        Err(e) => println!("\n=== 关闭失败: {} ===", e),
    }

    Ok(())
}
