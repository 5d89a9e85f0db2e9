use crate::BotResult;
use crate::resource::DEFAULT_MAX_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// 动作超时上限 (秒)
pub const MAX_ACTION_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    // 日志级别 (debug / info / warn / error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // OneBot 连接配置
    #[serde(default)]
    pub onebot: OneBotConfig,

    // 资源解析配置
    #[serde(default)]
    pub resource: ResourceConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OneBotConfig {
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    // 动作调用的默认超时 (秒)
    #[serde(default = "default_action_timeout")]
    pub action_timeout_secs: u64,

    // 断线重连间隔 (毫秒)
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
}

impl OneBotConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs.clamp(1, MAX_ACTION_TIMEOUT_SECS))
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// 空字符串视为未配置
    pub fn token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceConfig {
    // 本地文件大小上限 (字节)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl AppConfig {
    /// 读取配置文件，不存在时写入默认配置
    pub async fn load(path: impl AsRef<Path>) -> BotResult<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            let cfg = AppConfig::default();
            cfg.save(path).await?;
            return Ok(cfg);
        }

        let content = fs::read_to_string(path).await?;
        let cfg: AppConfig = toml::from_str(&content)?;
        Ok(cfg)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> BotResult<()> {
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(path, toml_string).await?;
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_url() -> String {
    "ws://127.0.0.1:3001".to_string()
}

fn default_action_timeout() -> u64 {
    10
}

fn default_reconnect_interval() -> u64 {
    3000
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            onebot: OneBotConfig::default(),
            resource: ResourceConfig::default(),
        }
    }
}

impl Default for OneBotConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            access_token: None,
            action_timeout_secs: default_action_timeout(),
            reconnect_interval_ms: default_reconnect_interval(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}
