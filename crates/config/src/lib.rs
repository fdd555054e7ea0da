//! org-config - 配置加载库

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 是否输出 JSON 格式日志
    #[serde(default)]
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 权限同步配置
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionSyncConfig {
    /// 最后一个订阅者离开后，缓存条目保留的宽限期（毫秒）
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// 单次权限解析的超时（毫秒）
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// 存储读取最大尝试次数
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_load_timeout_ms() -> u64 {
    10_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

impl Default for PermissionSyncConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl PermissionSyncConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// 超时为 0 会让每次加载立即失败
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "permissions.load_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(
                "permissions.retry_initial_delay_ms exceeds retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub permissions: PermissionSyncConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 顺序：`default.toml` -> `{APP_ENV}.toml` -> `APP_*` 环境变量（`__` 分隔层级）
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.permissions.validate()?;
        Ok(config)
    }
}
