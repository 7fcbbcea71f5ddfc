//! SSH 会话
//!
//! 使用 russh 建立真实的 SSH 连接：
//! - 连接、握手、公钥认证共用一个超时
//! - 命令输出按片段增量推送，同时完整收集
//! - `dispose` 幂等；未显式释放的会话在 Drop 时后台断开

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use secrecy::{ExposeSecret, SecretVec};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{
    command_in_dir, fingerprint, Connector, ExecOutput, HostKeyVerification, KnownHosts,
    OutputChunk, OutputSink, RemoteSession, SshTarget,
};
use crate::config::SshConfig;
use crate::error::{AppError, Result};

/// SSH_EXTENDED_DATA_STDERR
const EXTENDED_DATA_STDERR: u32 = 1;

/// 会话超时与验证策略
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub verification: HostKeyVerification,
}

impl SessionSettings {
    pub fn from_config(config: &SshConfig) -> Result<Self> {
        Ok(Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            verification: config.verification()?,
        })
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            verification: HostKeyVerification::default(),
        }
    }
}

/// 基于 russh 的连接器
pub struct SshConnector {
    settings: SessionSettings,
    known_hosts: Arc<KnownHosts>,
    client_config: Arc<Config>,
}

impl SshConnector {
    pub fn new(settings: SessionSettings, known_hosts: KnownHosts) -> Self {
        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });

        Self {
            settings,
            known_hosts: Arc::new(known_hosts),
            client_config,
        }
    }

    /// 从配置创建，按需加载 known_hosts 文件
    pub async fn from_config(config: &SshConfig) -> Result<Self> {
        let settings = SessionSettings::from_config(config)?;
        let known_hosts = match &config.known_hosts_file {
            Some(path) => KnownHosts::load(path).await?,
            None => KnownHosts::new(),
        };

        if settings.verification == HostKeyVerification::Strict && known_hosts.is_empty() {
            warn!("Strict host key verification with no known hosts - every connection will be rejected");
        }

        Ok(Self::new(settings, known_hosts))
    }

    async fn connect_and_authenticate(
        &self,
        target: &SshTarget,
        key_pair: KeyPair,
    ) -> Result<SshSession> {
        let handler = HostKeyChecker {
            verification: self.settings.verification,
            known_hosts: self.known_hosts.clone(),
            host: target.host.clone(),
            port: target.port,
        };

        let handle = client::connect(
            self.client_config.clone(),
            (target.host.clone(), target.port),
            handler,
        )
        .await
        .map_err(|e| classify_connect_error(e, target))?;

        let mut session = SshSession::new(handle, target.clone(), self.settings.command_timeout);

        let auth_result = match session.handle.as_mut() {
            Some(handle) => {
                handle
                    .authenticate_publickey(target.username.clone(), Arc::new(key_pair))
                    .await
            }
            None => Ok(false),
        };

        match auth_result {
            Ok(true) => Ok(session),
            Ok(false) => {
                session.dispose().await;
                Err(AppError::SshAuthenticationError(format!(
                    "public key rejected for {}",
                    target
                )))
            }
            Err(e) => {
                session.dispose().await;
                Err(classify_connect_error(e, target))
            }
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, target: &SshTarget, key: &SecretVec<u8>) -> Result<SshSession> {
        debug!(server = %target, "Opening SSH session");

        // 先解析私钥，无效密钥不必发起网络连接
        let key_pair = decode_key(key)?;

        let result = match timeout(
            self.settings.connect_timeout,
            self.connect_and_authenticate(target, key_pair),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::SshConnectTimeout(format!(
                "{} after {}s",
                target,
                self.settings.connect_timeout.as_secs()
            ))),
        };

        match &result {
            Ok(_) => {
                metrics::counter!("ssh_sessions_total", "outcome" => "connected").increment(1);
                info!(server = %target, "SSH authentication succeeded");
            }
            Err(e) => {
                metrics::counter!("ssh_sessions_total", "outcome" => "connect_failed").increment(1);
                warn!(server = %target, error = %e, "SSH connection failed");
            }
        }

        result
    }
}

fn decode_key(key: &SecretVec<u8>) -> Result<KeyPair> {
    let pem = std::str::from_utf8(key.expose_secret()).map_err(|_| {
        AppError::SshAuthenticationError("private key is not valid text".to_string())
    })?;

    russh_keys::decode_secret_key(pem, None).map_err(|e| {
        error!(error = %e, "加载SSH私钥失败");
        AppError::SshAuthenticationError(format!("invalid private key: {}", e))
    })
}

/// 将 russh 连接错误归类
fn classify_connect_error(e: russh::Error, target: &SshTarget) -> AppError {
    match e {
        russh::Error::UnknownKey => {
            AppError::SshConnectionError(format!("host key rejected for {}", target))
        }
        russh::Error::ConnectionTimeout => {
            AppError::SshConnectTimeout(format!("{}: {}", target, e))
        }
        russh::Error::IO(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
            AppError::SshConnectTimeout(format!("{}: {}", target, e))
        }
        russh::Error::NotAuthenticated => {
            AppError::SshAuthenticationError(format!("{}: {}", target, e))
        }
        other => AppError::SshConnectionError(format!("{}: {}", target, other)),
    }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 已认证，可执行一条命令
    Authenticated,
    /// 已执行过命令
    Executed,
    /// 已释放
    Closed,
}

/// 单次使用的 SSH 会话
pub struct SshSession {
    handle: Option<Handle<HostKeyChecker>>,
    target: SshTarget,
    command_timeout: Duration,
    state: SessionState,
}

impl SshSession {
    fn new(handle: Handle<HostKeyChecker>, target: SshTarget, command_timeout: Duration) -> Self {
        Self {
            handle: Some(handle),
            target,
            command_timeout,
            state: SessionState::Authenticated,
        }
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        sink: Option<OutputSink>,
    ) -> Result<ExecOutput> {
        if self.state != SessionState::Authenticated {
            return Err(AppError::SshExecutionError(format!(
                "session for {} cannot run a command in state {:?}",
                self.target, self.state
            )));
        }
        let handle = self.handle.as_ref().ok_or_else(|| {
            AppError::SshExecutionError(format!("session for {} is closed", self.target))
        })?;
        self.state = SessionState::Executed;

        let start_time = Instant::now();
        let full_command = command_in_dir(command, working_dir);

        debug!(server = %self.target, command = %command, "Executing SSH command");

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            error!(error = %e, "打开SSH通道失败");
            AppError::SshExecutionError(format!("failed to open channel: {}", e))
        })?;

        channel.exec(true, full_command.as_str()).await.map_err(|e| {
            error!(error = %e, "执行命令失败");
            AppError::SshExecutionError(format!("failed to start command: {}", e))
        })?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<i32> = None;
        let mut exit_signal: Option<String> = None;

        let deadline = tokio::time::Instant::now() + self.command_timeout;

        loop {
            let msg = match tokio::time::timeout_at(deadline, channel.wait()).await {
                Ok(msg) => msg,
                Err(_) => {
                    warn!(server = %self.target, "命令执行超时");
                    let _ = channel.close().await;
                    return Err(AppError::SshExecutionError(format!(
                        "command timed out after {}s",
                        self.command_timeout.as_secs()
                    )));
                }
            };

            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    stdout.extend_from_slice(data);
                    if let Some(ref sink) = sink {
                        sink(OutputChunk::Stdout(String::from_utf8_lossy(data).into_owned()));
                    }
                }
                Some(ChannelMsg::ExtendedData { ref data, ext }) => {
                    if ext == EXTENDED_DATA_STDERR {
                        stderr.extend_from_slice(data);
                        if let Some(ref sink) = sink {
                            sink(OutputChunk::Stderr(String::from_utf8_lossy(data).into_owned()));
                        }
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    exit_signal = Some(format!("{:?}", signal_name));
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            }
        }

        let _ = channel.close().await;

        let duration_secs = start_time.elapsed().as_secs_f64();

        let Some(exit_code) = exit_code else {
            metrics::counter!("ssh_sessions_total", "outcome" => "execution_failed").increment(1);
            return Err(AppError::SshExecutionError(match exit_signal {
                Some(signal) => format!("command terminated by signal {}", signal),
                None => "session closed before the command reported an exit status".to_string(),
            }));
        };

        metrics::counter!("ssh_sessions_total", "outcome" => "executed").increment(1);
        info!(
            server = %self.target,
            exit_code = exit_code,
            duration_secs = duration_secs,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "Command executed"
        );

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            duration_secs,
        })
    }

    async fn dispose(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
                debug!(server = %self.target, error = %e, "Disconnect after session end");
            }
            debug!(server = %self.target, "SSH session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        // 调用方被取消时 dispose 没有机会执行，在后台断开连接
        if let Some(handle) = self.handle.take() {
            warn!(server = %self.target, "SSH session dropped without dispose - disconnecting in background");
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                });
            }
        }
    }
}

/// 主机密钥检查处理器
pub struct HostKeyChecker {
    verification: HostKeyVerification,
    known_hosts: Arc<KnownHosts>,
    host: String,
    port: u16,
}

#[async_trait]
impl client::Handler for HostKeyChecker {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = fingerprint(&server_public_key.public_key_bytes());
        Ok(self
            .known_hosts
            .check(self.verification, &self.host, self.port, &fingerprint))
    }
}
