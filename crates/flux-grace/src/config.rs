use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认关闭超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// 默认环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "FLUX_GRACE";

/// 优雅关闭配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraceConfig {
    /// 全局截止时间（毫秒），不做校验，0 表示立即到期
    pub timeout_ms: u64,

    /// 收到触发信号时才开始计时，而不是进入等待时
    pub arm_on_trigger: bool,

    /// 是否监听操作系统信号，未设置时由触发源决定
    pub os_signals: Option<bool>,
}

impl Default for GraceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            arm_on_trigger: false,
            os_signals: None,
        }
    }
}

impl GraceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// 配置加载器
///
/// 依次叠加：默认值、可选的 TOML 文件、带前缀的环境变量。
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    /// 配置文件，不存在时忽略
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 加载配置
    pub fn load(&self) -> Result<GraceConfig> {
        let defaults = GraceConfig::default();

        let mut builder = Config::builder()
            .set_default("timeout_ms", defaults.timeout_ms)?
            .set_default("arm_on_trigger", defaults.arm_on_trigger)?;

        if let Some(path) = &self.file {
            let path = path.to_str().ok_or_else(|| anyhow!("Invalid config path"))?;
            let file = File::new(path, FileFormat::Toml).required(false);
            builder = builder.add_source(file);
        }

        let config = builder
            .add_source(Environment::with_prefix(&self.env_prefix).try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
