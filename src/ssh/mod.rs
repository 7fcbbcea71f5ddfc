//! SSH 传输模块
//!
//! 一个会话只承载一次操作（连接探测或单条命令），用完即释放，不做连接复用。

pub mod host_keys;
pub mod session;

use async_trait::async_trait;
use secrecy::SecretVec;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{CommandOutput, ServerProfile};

pub use host_keys::{fingerprint, HostKeyVerification, KnownHosts};
pub use session::{SessionSettings, SessionState, SshConnector, SshSession};

/// 连接目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl SshTarget {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl From<&ServerProfile> for SshTarget {
    fn from(profile: &ServerProfile) -> Self {
        Self::new(profile.host.clone(), profile.port, profile.username.clone())
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// 增量输出片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// 输出片段回调，每个片段到达时调用一次
pub type OutputSink = Arc<dyn Fn(OutputChunk) + Send + Sync>;

/// 命令执行输出
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_secs: f64,
}

impl From<ExecOutput> for CommandOutput {
    fn from(output: ExecOutput) -> Self {
        CommandOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            code: output.exit_code,
        }
    }
}

/// 建立已认证会话
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: RemoteSession;

    /// 连接并认证；失败时不会遗留任何连接
    async fn connect(&self, target: &SshTarget, key: &SecretVec<u8>) -> Result<Self::Session>;
}

/// 已认证的远程会话
#[async_trait]
pub trait RemoteSession: Send {
    /// 执行一条命令；非零退出码不是错误
    async fn execute(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        sink: Option<OutputSink>,
    ) -> Result<ExecOutput>;

    /// 释放连接，可重复调用
    async fn dispose(&mut self);
}

/// 单引号转义，用于拼接远程 shell 命令
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// 带工作目录的命令
pub fn command_in_dir(command: &str, working_dir: Option<&str>) -> String {
    match working_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
        None => command.to_string(),
    }
}
