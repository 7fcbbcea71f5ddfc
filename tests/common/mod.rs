//! 测试公共模块
//! 提供测试配置、脚本化的假 SSH 连接器和测试工具

#![allow(dead_code)]

use async_trait::async_trait;
use remote_exec::{
    config::{AppConfig, DatabaseConfig, KeyStoreConfig, LoggingConfig, ServerConfig, SshConfig},
    error::{AppError, Result},
    middleware::AppState,
    models::{KeyUpload, NewServerProfile, RegisterProfileRequest, ServerProfile},
    repository::{InMemoryProfileRepository, ProfileRepository},
    services::{ExecSettings, LocalKeyStore, ServerService},
    ssh::{
        Connector, ExecOutput, KnownHosts, OutputChunk, OutputSink, RemoteSession,
        SessionSettings, SshConnector, SshTarget,
    },
};
use secrecy::{ExposeSecret, Secret, SecretVec};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// 测试用的 ed25519 私钥
pub const TEST_KEY: &[u8] = include_bytes!("../fixtures/test_ed25519");

/// 创建测试配置
pub fn create_test_config(key_dir: &Path) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(), // 使用随机端口
            graceful_shutdown_timeout_secs: 5,
            max_body_bytes: 64 * 1024,
        },
        database: DatabaseConfig {
            url: std::env::var("TEST_DATABASE_URL").ok().map(Secret::new),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        ssh: SshConfig {
            connect_timeout_secs: 2,
            command_timeout_secs: 5,
            working_directory: Some("/".to_string()),
            host_key_verification: Some("accept".to_string()),
            known_hosts_file: None,
            probe_before_execute: true,
        },
        key_store: KeyStoreConfig {
            base_path: key_dir.display().to_string(),
        },
    }
}

/// 创建使用真实 SSH 连接器和内存仓库的应用状态
pub fn create_test_app_state(config: AppConfig) -> Arc<AppState> {
    let key_store = Arc::new(LocalKeyStore::new(&config.key_store.base_path));
    let settings = SessionSettings::from_config(&config.ssh).expect("invalid ssh settings");
    let connector = SshConnector::new(settings, KnownHosts::new());

    let server_service = Arc::new(ServerService::new(
        Arc::new(InMemoryProfileRepository::new()),
        key_store.clone(),
        connector,
        ExecSettings::from_config(&config.ssh),
    ));

    Arc::new(AppState {
        config,
        server_service,
        key_store,
        db: None,
    })
}

/// 返回一个当前没有进程监听的本地端口
pub async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    port
}

pub fn register_request(host: &str, port: i64, username: &str) -> RegisterProfileRequest {
    RegisterProfileRequest {
        host: host.to_string(),
        port,
        username: username.to_string(),
    }
}

pub fn test_key_upload() -> KeyUpload {
    KeyUpload::new(Some("id_ed25519".to_string()), TEST_KEY.to_vec())
}

// ==================== Fake SSH ====================

/// 假连接器的行为脚本
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// 连接成功，按简单规则解释命令
    Run,
    /// 连接被拒绝
    RefuseConnect,
    /// 连接超时
    TimeoutConnect,
    /// 认证失败
    RejectAuth,
    /// 命令执行中途连接断开
    DropMidCommand,
    /// 命令永不结束
    Hang,
}

/// 假连接器的调用统计
#[derive(Debug, Default)]
pub struct FakeStats {
    pub connects: AtomicUsize,
    pub disposes: AtomicUsize,
    pub drops: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub working_dirs: Mutex<Vec<Option<String>>>,
}

impl FakeStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disposes(&self) -> usize {
        self.disposes.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

pub struct FakeConnector {
    behavior: FakeBehavior,
    stats: Arc<FakeStats>,
    /// 期望的私钥内容；不匹配时认证失败
    expected_key: Option<Vec<u8>>,
    exec_delay: Duration,
}

impl FakeConnector {
    pub fn new(behavior: FakeBehavior) -> Self {
        Self {
            behavior,
            stats: Arc::new(FakeStats::default()),
            expected_key: Some(TEST_KEY.to_vec()),
            exec_delay: Duration::ZERO,
        }
    }

    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, target: &SshTarget, key: &SecretVec<u8>) -> Result<FakeSession> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(expected) = &self.expected_key {
            if key.expose_secret() != expected {
                return Err(AppError::SshAuthenticationError(format!(
                    "public key rejected for {}",
                    target
                )));
            }
        }

        match self.behavior {
            FakeBehavior::RefuseConnect => Err(AppError::SshConnectionError(format!(
                "{}: Connection refused (os error 111)",
                target
            ))),
            FakeBehavior::TimeoutConnect => {
                Err(AppError::SshConnectTimeout(format!("{} after 10s", target)))
            }
            FakeBehavior::RejectAuth => Err(AppError::SshAuthenticationError(format!(
                "public key rejected for {}",
                target
            ))),
            _ => Ok(FakeSession {
                behavior: self.behavior.clone(),
                stats: self.stats.clone(),
                exec_delay: self.exec_delay,
                disposed: false,
            }),
        }
    }
}

pub struct FakeSession {
    behavior: FakeBehavior,
    stats: Arc<FakeStats>,
    exec_delay: Duration,
    disposed: bool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn execute(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        sink: Option<OutputSink>,
    ) -> Result<ExecOutput> {
        if self.disposed {
            return Err(AppError::SshExecutionError("session is closed".to_string()));
        }

        self.stats.commands.lock().unwrap().push(command.to_string());
        self.stats
            .working_dirs
            .lock()
            .unwrap()
            .push(working_dir.map(str::to_string));

        if !self.exec_delay.is_zero() {
            tokio::time::sleep(self.exec_delay).await;
        }

        match self.behavior {
            FakeBehavior::DropMidCommand => {
                if let Some(sink) = &sink {
                    sink(OutputChunk::Stdout("partial".to_string()));
                }
                Err(AppError::SshExecutionError(
                    "session closed before the command reported an exit status".to_string(),
                ))
            }
            FakeBehavior::Hang => std::future::pending().await,
            _ => {
                let (stdout, stderr, exit_code) = interpret(command);
                if let Some(sink) = &sink {
                    if !stdout.is_empty() {
                        sink(OutputChunk::Stdout(stdout.clone()));
                    }
                    if !stderr.is_empty() {
                        sink(OutputChunk::Stderr(stderr.clone()));
                    }
                }
                Ok(ExecOutput {
                    stdout,
                    stderr,
                    exit_code,
                    duration_secs: 0.01,
                })
            }
        }
    }

    async fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.stats.disposes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.stats.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// 极简的命令解释：echo / true / false / exit N，其余视为不存在的命令
fn interpret(command: &str) -> (String, String, i32) {
    let command = command.trim();
    if let Some(rest) = command.strip_prefix("echo ") {
        return (format!("{}\n", rest), String::new(), 0);
    }
    match command {
        "true" => (String::new(), String::new(), 0),
        "false" => (String::new(), String::new(), 1),
        _ => {
            if let Some(code) = command.strip_prefix("exit ").and_then(|c| c.parse().ok()) {
                return (String::new(), String::new(), code);
            }
            let name = command.split_whitespace().next().unwrap_or_default();
            (String::new(), format!("sh: {}: command not found\n", name), 127)
        }
    }
}

// ==================== Service harness ====================

/// 基于假连接器的编排服务
pub struct TestHarness {
    pub service: ServerService<FakeConnector>,
    pub stats: Arc<FakeStats>,
    pub keys: Arc<LocalKeyStore>,
    pub key_dir: TempDir,
}

pub fn harness(behavior: FakeBehavior) -> TestHarness {
    harness_with(FakeConnector::new(behavior), Arc::new(InMemoryProfileRepository::new()))
}

pub fn harness_with(connector: FakeConnector, profiles: Arc<dyn ProfileRepository>) -> TestHarness {
    let key_dir = tempfile::tempdir().expect("tempdir");
    let keys = Arc::new(LocalKeyStore::new(key_dir.path()));
    let stats = connector.stats();

    let service = ServerService::new(
        profiles,
        keys.clone(),
        connector,
        ExecSettings {
            working_directory: Some("/".to_string()),
            probe_before_execute: true,
        },
    );

    TestHarness {
        service,
        stats,
        keys,
        key_dir,
    }
}

impl TestHarness {
    /// 注册一台测试服务器
    pub async fn register(&self, host: &str) -> ServerProfile {
        self.service
            .register_profile(register_request(host, 22, "root"), Some(test_key_upload()))
            .await
            .expect("register profile")
    }

    /// 私钥目录中的文件数（不含临时文件）
    pub fn stored_key_count(&self) -> usize {
        std::fs::read_dir(self.key_dir.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
                    .count()
            })
            .unwrap_or(0)
    }
}

/// 写入总是失败的仓库
pub struct FailingProfileRepository;

#[async_trait]
impl ProfileRepository for FailingProfileRepository {
    async fn save(&self, _profile: NewServerProfile) -> Result<ServerProfile> {
        Err(AppError::Repository("connection reset by peer".to_string()))
    }

    async fn find_by_id(&self, _id: i64) -> Result<Option<ServerProfile>> {
        Err(AppError::Repository("connection reset by peer".to_string()))
    }

    async fn find_all(&self) -> Result<Vec<ServerProfile>> {
        Err(AppError::Repository("connection reset by peer".to_string()))
    }
}
