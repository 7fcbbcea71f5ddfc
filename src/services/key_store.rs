//! 私钥存储
//!
//! 以文件形式持久化私钥内容，对外只暴露不透明的定位符。
//! 每次保存都生成新的定位符，不会覆盖或追加已有内容。

use async_trait::async_trait;
use secrecy::{Secret, SecretVec};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::error::{AppError, Result};
use crate::models::KeyLocator;

/// 私钥存储接口
#[async_trait]
pub trait KeyMaterialStore: Send + Sync {
    /// 以 name 派生的定位符保存私钥，返回定位符
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<KeyLocator>;

    /// 读取私钥；定位符不存在时返回 KeyNotFound
    async fn load(&self, locator: &KeyLocator) -> Result<SecretVec<u8>>;
}

/// 本地文件系统存储
pub struct LocalKeyStore {
    base_path: PathBuf,
}

impl LocalKeyStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// 检查存储目录是否可写（就绪探针使用）
    pub async fn health_check(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await.map_err(|e| {
            AppError::Storage(format!("cannot create {}: {}", self.base_path.display(), e))
        })?;
        let metadata = tokio::fs::metadata(&self.base_path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        if metadata.permissions().readonly() {
            return Err(AppError::Storage(format!(
                "{} is read-only",
                self.base_path.display()
            )));
        }
        Ok(())
    }

    /// 定位符只能是存储目录下的单个文件名
    fn resolve(&self, locator: &KeyLocator) -> Option<PathBuf> {
        let name = locator.as_str();
        if matches!(name, "" | "." | "..") || name.contains(['/', '\\']) {
            return None;
        }
        Some(self.base_path.join(name))
    }
}

/// 将上传文件名规范化为安全的文件名片段
fn sanitize_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    // 连续的 '.' 折叠为一个
    let mut collapsed = String::with_capacity(cleaned.len());
    for c in cleaned.chars() {
        if c == '.' && collapsed.ends_with('.') {
            continue;
        }
        collapsed.push(c);
    }
    let cleaned = collapsed.trim_matches('.');
    if cleaned.is_empty() {
        "id_key".to_string()
    } else {
        cleaned.chars().take(128).collect()
    }
}

#[async_trait]
impl KeyMaterialStore for LocalKeyStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> Result<KeyLocator> {
        if bytes.is_empty() {
            return Err(AppError::validation("no key material provided"));
        }

        tokio::fs::create_dir_all(&self.base_path).await.map_err(|e| {
            error!(path = %self.base_path.display(), error = %e, "Failed to create key directory");
            AppError::Storage(format!("cannot create key directory: {}", e))
        })?;

        let file_name = format!("{}-{}", uuid::Uuid::new_v4().simple(), sanitize_name(name));
        let final_path = self.base_path.join(&file_name);
        let temp_path = self.base_path.join(format!(".{}.tmp", file_name));

        if let Err(e) = write_new_file(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            error!(path = %temp_path.display(), error = %e, "Failed to write key file");
            return Err(AppError::Storage(format!("cannot write key file: {}", e)));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            error!(path = %final_path.display(), error = %e, "Failed to move key file into place");
            return Err(AppError::Storage(format!("cannot store key file: {}", e)));
        }

        info!(locator = %file_name, size = bytes.len(), "Key material stored");
        Ok(KeyLocator::new(file_name))
    }

    async fn load(&self, locator: &KeyLocator) -> Result<SecretVec<u8>> {
        let path = self
            .resolve(locator)
            .ok_or_else(|| AppError::KeyNotFound(locator.to_string()))?;

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                debug!(locator = %locator, "Key material loaded");
                Ok(Secret::new(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::KeyNotFound(locator.to_string()))
            }
            Err(e) => {
                error!(locator = %locator, error = %e, "Failed to read key file");
                Err(AppError::Storage(format!("cannot read key file: {}", e)))
            }
        }
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
