//! 服务器档案与远程命令编排
//!
//! 注册：校验 -> 保存私钥 -> 写入档案
//! 执行：查档案 -> 读私钥 -> 连接 -> (执行) -> 释放
//!
//! 连接/执行失败不会以错误返回，而是转换为 `success = false` 的 `CommandResult`。

use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::SshConfig;
use crate::error::{AppError, Result};
use crate::models::{
    CommandResult, KeyUpload, NewServerProfile, ProfileSummary, RegisterProfileRequest,
    ServerProfile,
};
use crate::repository::ProfileRepository;
use crate::services::key_store::KeyMaterialStore;
use crate::ssh::{Connector, OutputChunk, OutputSink, RemoteSession, SshConnector, SshTarget};

/// 执行相关设置
#[derive(Debug, Clone, Default)]
pub struct ExecSettings {
    /// 远程工作目录
    pub working_directory: Option<String>,
    /// 执行命令前先做一次连接探测
    pub probe_before_execute: bool,
}

impl ExecSettings {
    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            working_directory: config
                .working_directory
                .as_deref()
                .map(str::trim)
                .filter(|dir| !dir.is_empty())
                .map(str::to_string),
            probe_before_execute: config.probe_before_execute,
        }
    }
}

/// 服务器服务
pub struct ServerService<C: Connector = SshConnector> {
    profiles: Arc<dyn ProfileRepository>,
    keys: Arc<dyn KeyMaterialStore>,
    connector: C,
    settings: ExecSettings,
}

impl<C: Connector> ServerService<C> {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        keys: Arc<dyn KeyMaterialStore>,
        connector: C,
        settings: ExecSettings,
    ) -> Self {
        Self {
            profiles,
            keys,
            connector,
            settings,
        }
    }

    /// 注册服务器档案
    pub async fn register_profile(
        &self,
        request: RegisterProfileRequest,
        key: Option<KeyUpload>,
    ) -> Result<ServerProfile> {
        // 先校验，校验失败不写入任何密钥
        let (host, port, username) = request.validated()?;
        let key = require_key(key)?;

        let locator = self.keys.save(key.store_name(), key.bytes.expose_secret()).await?;
        drop(key);

        let new_profile = NewServerProfile {
            host,
            port,
            username,
            key_locator: locator.clone(),
        };

        let profile = match self.profiles.save(new_profile).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(
                    key_locator = %locator,
                    error = %e,
                    "Profile persistence failed, stored key is orphaned"
                );
                return Err(e);
            }
        };

        info!(
            profile_id = profile.id,
            host = %profile.host,
            port = profile.port,
            username = %profile.username,
            "Server profile registered"
        );

        Ok(profile)
    }

    /// 列出所有档案
    pub async fn list_profiles(&self) -> Result<Vec<ProfileSummary>> {
        let profiles = self.profiles.find_all().await?;
        Ok(profiles.iter().map(ProfileSummary::from).collect())
    }

    /// 对已注册服务器执行命令；command 为空时只做连接探测
    pub async fn execute(&self, profile_id: i64, command: Option<&str>) -> Result<CommandResult> {
        let profile = self
            .profiles
            .find_by_id(profile_id)
            .await?
            .ok_or(AppError::ProfileNotFound(profile_id))?;

        let target = SshTarget::from(&profile);
        // 只在判空时 trim，原样发送命令文本
        let command = command.filter(|c| !c.trim().is_empty());

        let key = self.keys.load(&profile.key_locator).await?;
        let connected = self.connector.connect(&target, &key).await;
        drop(key);

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                warn!(profile_id = profile_id, server = %target, error = %e, "Connection failed");
                return Ok(CommandResult::connect_failed(&e));
            }
        };

        let result = match command {
            None => {
                debug!(profile_id = profile_id, server = %target, "Connection probe succeeded");
                CommandResult::connected()
            }
            Some(command) => {
                let sink = chunk_logger(profile_id);
                match session
                    .execute(command, self.settings.working_directory.as_deref(), Some(sink))
                    .await
                {
                    Ok(output) => {
                        info!(
                            profile_id = profile_id,
                            server = %target,
                            exit_code = output.exit_code,
                            duration_secs = output.duration_secs,
                            "Remote command finished"
                        );
                        CommandResult::executed(output.into())
                    }
                    Err(e) => {
                        warn!(profile_id = profile_id, server = %target, error = %e, "Remote command failed");
                        CommandResult::execution_failed(&e)
                    }
                }
            }
        };

        session.dispose().await;
        Ok(result)
    }

    /// 先探测连接，成功后再执行命令（两次独立会话）
    pub async fn probe_and_execute(&self, profile_id: i64, command: &str) -> Result<CommandResult> {
        let probe = self.execute(profile_id, None).await?;
        if !probe.success {
            return Ok(probe);
        }
        self.execute(profile_id, Some(command)).await
    }

    /// HTTP 命令端点入口，按配置决定是否先探测
    pub async fn run_command(&self, profile_id: i64, command: &str) -> Result<CommandResult> {
        if self.settings.probe_before_execute {
            self.probe_and_execute(profile_id, command).await
        } else {
            self.execute(profile_id, Some(command)).await
        }
    }

    /// 注册前的连接测试，私钥只保存在内存中
    pub async fn test_connection(
        &self,
        request: RegisterProfileRequest,
        key: Option<KeyUpload>,
    ) -> Result<CommandResult> {
        let (host, port, username) = request.validated()?;
        let key = require_key(key)?;
        let target = SshTarget::new(host, port, username);

        let connected = self.connector.connect(&target, &key.bytes).await;
        drop(key);

        match connected {
            Ok(mut session) => {
                session.dispose().await;
                info!(server = %target, "Connection test succeeded");
                Ok(CommandResult::connected())
            }
            Err(e) => {
                warn!(server = %target, error = %e, "Connection test failed");
                Ok(CommandResult::connect_failed(&e))
            }
        }
    }
}

fn require_key(key: Option<KeyUpload>) -> Result<KeyUpload> {
    match key {
        Some(key) if !key.is_empty() => Ok(key),
        _ => Err(AppError::validation("no key material provided")),
    }
}

/// 增量输出写入 debug 日志
fn chunk_logger(profile_id: i64) -> OutputSink {
    Arc::new(move |chunk: OutputChunk| match chunk {
        OutputChunk::Stdout(text) => {
            debug!(profile_id = profile_id, stream = "stdout", len = text.len(), chunk = %text, "Output chunk")
        }
        OutputChunk::Stderr(text) => {
            debug!(profile_id = profile_id, stream = "stderr", len = text.len(), chunk = %text, "Output chunk")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_settings_from_config() {
        let config = SshConfig {
            connect_timeout_secs: 10,
            command_timeout_secs: 300,
            working_directory: Some("  ".to_string()),
            host_key_verification: Some("accept".to_string()),
            known_hosts_file: None,
            probe_before_execute: false,
        };
        let settings = ExecSettings::from_config(&config);
        assert!(settings.working_directory.is_none());
        assert!(!settings.probe_before_execute);

        let config = SshConfig {
            working_directory: Some("/srv".to_string()),
            probe_before_execute: true,
            ..config
        };
        let settings = ExecSettings::from_config(&config);
        assert_eq!(settings.working_directory.as_deref(), Some("/srv"));
        assert!(settings.probe_before_execute);
    }

    #[test]
    fn test_require_key() {
        assert!(matches!(require_key(None), Err(AppError::Validation(_))));
        assert!(matches!(
            require_key(Some(KeyUpload::new(None, Vec::new()))),
            Err(AppError::Validation(_))
        ));
        assert!(require_key(Some(KeyUpload::new(None, b"k".to_vec()))).is_ok());
    }
}
