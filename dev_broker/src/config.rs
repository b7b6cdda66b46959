// dev_broker/src/config.rs

//! 开发代理的配置管理。
//!
//! 配置保存在工作目录下的 `app_settings.json` 中。启动时读取该文件；
//! 文件不存在或内容损坏时使用默认配置，并把默认配置写回文件，方便手动修改。
//! 加载结果保存在进程级的 `OnceLock` 中，通过 [`get_config`] 访问。

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use common_models::topics::{APP_PREFIX, TOPIC_PREFIX};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

pub const DEFAULT_BROKER_HOST: &str = "0.0.0.0";
pub const DEFAULT_BROKER_PORT: u16 = 8080;
pub const CONFIG_FILE_NAME: &str = "app_settings.json";

/// 代理监听与心跳配置。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    /// 监听地址。
    pub host: String,
    /// 监听端口，0 表示由系统分配。
    pub port: u16,
    /// 代理向客户端发送心跳的最小间隔 (毫秒)，写入 CONNECTED 帧 `heart-beat` 的第一项。
    pub heartbeat_send_ms: u64,
    /// 代理期望客户端发送心跳的间隔 (毫秒)，写入 `heart-beat` 的第二项。
    pub heartbeat_expect_ms: u64,
    /// 心跳监视器的检查周期 (秒)。
    pub heartbeat_check_interval_seconds: u64,
    /// 客户端多久没有任何数据即视为超时 (秒)。
    pub client_timeout_seconds: u64,
    /// 客户端发布目的地前缀，其上的 SEND 会被转发到对应的广播主题。
    pub app_prefix: String,
    /// 广播主题前缀。
    pub topic_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            heartbeat_send_ms: 10_000,
            heartbeat_expect_ms: 10_000,
            heartbeat_check_interval_seconds: 15,
            client_timeout_seconds: 60,
            app_prefix: APP_PREFIX.to_string(),
            topic_prefix: TOPIC_PREFIX.to_string(),
        }
    }
}

impl BrokerConfig {
    /// `host:port` 形式的监听地址。
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 把 `/app/<action>` 形式的目的地映射为 `/topic/<action>`，其他目的地原样返回。
    pub fn route_destination(&self, destination: &str) -> String {
        let app_prefix = self.app_prefix.trim_end_matches('/');
        match destination
            .strip_prefix(app_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|action| !action.is_empty())
        {
            Some(action) => format!("{}/{}", self.topic_prefix.trim_end_matches('/'), action),
            None => destination.to_string(),
        }
    }
}

/// 应用的顶层配置结构。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
}

static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// 从指定路径加载配置；文件缺失或损坏时写入并返回默认配置。
pub fn load_or_create_config_at(config_file_path: &Path) -> AppConfig {
    match fs::read_to_string(config_file_path) {
        Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("[配置模块] 已成功从配置文件 {:?} 加载应用配置。", config_file_path);
                config
            }
            Err(e) => {
                warn!(
                    "[配置模块] 解析 {:?} 失败: {}。文件可能已损坏，将使用默认配置覆盖。",
                    config_file_path, e
                );
                let default_config = AppConfig::default();
                if let Err(e) = save_config(&default_config, config_file_path) {
                    warn!("[配置模块] {}", e);
                }
                default_config
            }
        },
        Err(e) => {
            info!(
                "[配置模块] 未在 {:?} 找到配置文件 (错误: {})。将使用默认配置并创建新文件。",
                config_file_path, e
            );
            let default_config = AppConfig::default();
            if let Err(e) = save_config(&default_config, config_file_path) {
                warn!("[配置模块] {}", e);
            }
            default_config
        }
    }
}

/// 配置文件路径：当前工作目录下的 `app_settings.json`。
pub fn get_config_file_path() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(CONFIG_FILE_NAME)
}

/// 把配置以格式化 JSON 写入文件。
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), BrokerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .map_err(|e| {
                    BrokerError::ConfigError(format!("创建配置目录 {:?} 失败: {}", parent, e))
                })?;
        }
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| BrokerError::ConfigError(format!("序列化配置失败: {}", e)))?;
    fs::write(path, content).map_err(|e| {
        BrokerError::ConfigError(format!("写入配置文件 {:?} 失败: {}", path, e))
    })?;
    info!("[配置模块] 已将配置保存到 {:?}。", path);
    Ok(())
}

/// 加载并缓存全局配置。重复调用时保留第一次加载的结果。
pub fn init_config() -> &'static AppConfig {
    let mut initialized_here = false;
    let config = APP_CONFIG.get_or_init(|| {
        initialized_here = true;
        load_or_create_config_at(&get_config_file_path())
    });
    if initialized_here {
        info!("[配置模块] 应用配置已初始化完毕。");
    } else {
        warn!("[配置模块] 全局应用配置已被初始化，本次 init_config 调用未覆盖已有配置。");
    }
    config
}

/// 获取全局配置；尚未初始化时按需加载。
pub fn get_config() -> &'static AppConfig {
    APP_CONFIG.get_or_init(|| load_or_create_config_at(&get_config_file_path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_config_path() -> PathBuf {
        env::temp_dir()
            .join(format!("dev_broker_test_{}", Uuid::new_v4()))
            .join(CONFIG_FILE_NAME)
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let path = temp_config_path();
        let config = load_or_create_config_at(&path);
        assert_eq!(config, AppConfig::default());
        assert!(path.exists(), "默认配置应被写回文件");

        let reloaded = load_or_create_config_at(&path);
        assert_eq!(reloaded, config);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupted_file_falls_back_to_defaults() {
        let path = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_or_create_config_at(&path), AppConfig::default());
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_keeps_unspecified_defaults() {
        let path = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"broker":{"port":9001}}"#).unwrap();
        let config = load_or_create_config_at(&path);
        assert_eq!(config.broker.port, 9001);
        assert_eq!(config.broker.app_prefix, "/app");
        assert_eq!(config.broker.bind_addr(), "0.0.0.0:9001");
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_route_destination() {
        let config = BrokerConfig::default();
        assert_eq!(config.route_destination("/app/chat"), "/topic/chat");
        assert_eq!(config.route_destination("/app/reminders/42"), "/topic/reminders/42");
        assert_eq!(config.route_destination("/topic/chat"), "/topic/chat");
        assert_eq!(config.route_destination("/app/"), "/app/");
        assert_eq!(config.route_destination("/application/x"), "/application/x");
    }
}
