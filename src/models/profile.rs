//! 服务器连接档案模型

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret, SecretVec};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError};

use crate::error::{AppError, Result};

/// 密钥存储中的定位符，不包含任何密钥内容
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyLocator(String);

impl KeyLocator {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 已持久化的服务器档案
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_locator: KeyLocator,
    pub created_at: DateTime<Utc>,
}

/// 待写入仓库的档案（id 由仓库分配）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewServerProfile {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub key_locator: KeyLocator,
}

/// 注册/测试连接请求中的主机信息
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterProfileRequest {
    #[validate(length(min = 1, max = 255), custom(function = "not_blank"))]
    pub host: String,
    #[validate(range(min = 1, max = 65535))]
    pub port: i64,
    #[validate(length(min = 1, max = 255), custom(function = "not_blank"))]
    pub username: String,
}

impl RegisterProfileRequest {
    /// 校验后返回规范化的 (host, port, username)
    pub fn validated(&self) -> Result<(String, u16, String)> {
        self.validate()?;
        let port = u16::try_from(self.port)
            .map_err(|_| AppError::Validation(format!("port out of range: {}", self.port)))?;
        Ok((self.host.trim().to_string(), port, self.username.trim().to_string()))
    }
}

fn not_blank(value: &str) -> std::result::Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// 上传的私钥
pub struct KeyUpload {
    /// 原始文件名，用于派生存储名称
    pub file_name: Option<String>,
    pub bytes: SecretVec<u8>,
}

impl KeyUpload {
    pub fn new(file_name: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name,
            bytes: Secret::new(bytes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.expose_secret().is_empty()
    }

    /// 存储名称：原始文件名，缺省为 id_key
    pub fn store_name(&self) -> &str {
        self.file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("id_key")
    }
}

// 只输出文件名和长度，私钥内容不进入日志
impl fmt::Debug for KeyUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyUpload")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.expose_secret().len())
            .finish_non_exhaustive()
    }
}

/// 列表视图，不暴露密钥定位符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: i64,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

impl From<&ServerProfile> for ProfileSummary {
    fn from(profile: &ServerProfile) -> Self {
        Self {
            id: profile.id,
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            created_at: profile.created_at,
        }
    }
}
