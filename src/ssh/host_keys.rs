//! 主机密钥验证
//!
//! 指纹为服务器公钥字节的 SHA-256（hex 编码），按 `host:port` 记录。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, Result};

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：未知主机接受，已知主机必须匹配
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// 计算公钥指纹
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_bytes);
    hex::encode(hasher.finalize())
}

/// 已知主机指纹表
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    entries: HashMap<String, String>,
}

impl KnownHosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: &str, port: u16, fingerprint: &str) {
        self.entries
            .insert(host_key(host, port), fingerprint.trim().to_lowercase());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, host: &str, port: u16) -> Option<&str> {
        self.entries.get(&host_key(host, port)).map(String::as_str)
    }

    /// 解析 `host:port fingerprint` 格式，`#` 开头为注释
    pub fn parse(content: &str) -> Result<Self> {
        let mut known = Self::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let (Some(target), Some(fp), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(AppError::Config(format!(
                    "known_hosts line {}: expected `host:port fingerprint`",
                    index + 1
                )));
            };

            let (host, port) = target
                .rsplit_once(':')
                .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h, p)))
                .ok_or_else(|| {
                    AppError::Config(format!("known_hosts line {}: invalid target {}", index + 1, target))
                })?;

            if fp.len() != 64 || !fp.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AppError::Config(format!(
                    "known_hosts line {}: fingerprint must be 64 hex characters",
                    index + 1
                )));
            }

            known.insert(host.trim_matches(|c| c == '[' || c == ']'), port, fp);
        }
        Ok(known)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Config(format!("cannot read known_hosts file {}: {}", path.display(), e))
        })?;
        let known = Self::parse(&content)?;
        info!(path = %path.display(), entries = known.len(), "Known hosts loaded");
        Ok(known)
    }

    /// 根据策略判断是否接受服务器公钥
    pub fn check(
        &self,
        verification: HostKeyVerification,
        host: &str,
        port: u16,
        fingerprint: &str,
    ) -> bool {
        let target = host_key(host, port);

        if verification == HostKeyVerification::Disabled {
            warn!(host = %target, "Host key verification DISABLED - accepting all keys");
            return true;
        }

        match self.lookup(host, port) {
            Some(expected) if expected == fingerprint => {
                debug!(host = %target, "Host key verified");
                true
            }
            Some(expected) => {
                error!(
                    host = %target,
                    expected = %expected,
                    actual = %fingerprint,
                    "Host key mismatch - REJECTING CONNECTION"
                );
                false
            }
            None if verification == HostKeyVerification::Accept => {
                info!(
                    host = %target,
                    fingerprint = %fingerprint,
                    "Unknown host - accepting host key"
                );
                true
            }
            None => {
                error!(host = %target, "Unknown host in strict mode - rejecting connection");
                false
            }
        }
    }
}

fn host_key(host: &str, port: u16) -> String {
    format!("{}:{}", host.to_lowercase(), port)
}
