//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

use crate::ssh::HostKeyVerification;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
    /// 请求体大小上限（字节），私钥上传走 multipart
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    /// 未配置时使用内存仓库
    #[serde(default)]
    pub url: Option<Secret<String>>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, compact
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// 连接 + 握手 + 认证的总超时（秒）
    pub connect_timeout_secs: u64,
    /// 命令执行超时（秒）
    pub command_timeout_secs: u64,
    /// 远程工作目录，为空表示使用登录目录
    #[serde(default)]
    pub working_directory: Option<String>,
    /// 主机密钥验证策略（strict/accept/disabled）
    /// 未设置时：配置了 known_hosts_file 为 strict，否则为 accept
    #[serde(default)]
    pub host_key_verification: Option<String>,
    /// known_hosts 文件路径（可选）
    #[serde(default)]
    pub known_hosts_file: Option<String>,
    /// 执行命令前是否先做一次连接探测
    pub probe_before_execute: bool,
}

impl SshConfig {
    /// 解析主机密钥验证策略
    pub fn verification(&self) -> Result<HostKeyVerification, ConfigError> {
        match self.host_key_verification.as_deref().map(str::trim) {
            Some(policy) if !policy.is_empty() => policy
                .parse::<HostKeyVerification>()
                .map_err(ConfigError::Message),
            _ if self.known_hosts_file.is_some() => Ok(HostKeyVerification::Strict),
            _ => Ok(HostKeyVerification::Accept),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreConfig {
    /// 私钥文件存放目录
    pub base_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub ssh: SshConfig,
    pub key_store: KeyStoreConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("server.max_body_bytes", 64 * 1024)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // SSH 默认配置
            .set_default("ssh.connect_timeout_secs", 10)?
            .set_default("ssh.command_timeout_secs", 300)?
            .set_default("ssh.working_directory", "/")?
            .set_default("ssh.probe_before_execute", true)?
            .set_default("key_store.base_path", "./data/keys")?;

        // 从环境变量加载配置（前缀为 REXEC_）
        settings = settings.add_source(
            Environment::with_prefix("REXEC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, compact",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        if self.ssh.connect_timeout_secs == 0 || self.ssh.connect_timeout_secs > 300 {
            return Err(ConfigError::Message(
                "ssh.connect_timeout_secs must be between 1 and 300".to_string(),
            ));
        }

        if self.ssh.command_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "ssh.command_timeout_secs must be at least 1".to_string(),
            ));
        }

        self.ssh.verification()?;

        if self.key_store.base_path.trim().is_empty() {
            return Err(ConfigError::Message("key_store.base_path must not be empty".to_string()));
        }

        Ok(())
    }
}
