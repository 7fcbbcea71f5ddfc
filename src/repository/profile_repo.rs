//! Server profile repository (服务器档案数据访问)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::{
    error::{AppError, Result},
    models::{KeyLocator, NewServerProfile, ServerProfile},
};

/// 档案仓库接口
///
/// 持久化层错误统一以 `AppError::Repository` 返回，本层不做重试。
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// 分配 id 并保存，返回已保存的记录
    async fn save(&self, profile: NewServerProfile) -> Result<ServerProfile>;

    async fn find_by_id(&self, id: i64) -> Result<Option<ServerProfile>>;

    /// 按插入顺序返回全部档案
    async fn find_all(&self) -> Result<Vec<ServerProfile>>;
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    host: String,
    port: i32,
    username: String,
    key_locator: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for ServerProfile {
    type Error = AppError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let port = u16::try_from(row.port).map_err(|_| {
            AppError::Repository(format!("profile {} has invalid port {}", row.id, row.port))
        })?;
        Ok(ServerProfile {
            id: row.id,
            host: row.host,
            port,
            username: row.username,
            key_locator: KeyLocator::new(row.key_locator),
            created_at: row.created_at,
        })
    }
}

pub struct PgProfileRepository {
    db: PgPool,
}

impl PgProfileRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn save(&self, profile: NewServerProfile) -> Result<ServerProfile> {
        let row = sqlx::query_as::<_, ProfileRow>(
            r#"
            INSERT INTO server_profiles (host, port, username, key_locator)
            VALUES ($1, $2, $3, $4)
            RETURNING id, host, port, username, key_locator, created_at
            "#,
        )
        .bind(&profile.host)
        .bind(i32::from(profile.port))
        .bind(&profile.username)
        .bind(profile.key_locator.as_str())
        .fetch_one(&self.db)
        .await?;

        row.try_into()
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ServerProfile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, host, port, username, key_locator, created_at FROM server_profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(ServerProfile::try_from).transpose()
    }

    async fn find_all(&self) -> Result<Vec<ServerProfile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, host, port, username, key_locator, created_at FROM server_profiles ORDER BY id",
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ServerProfile::try_from).collect()
    }
}

/// 内存仓库，未配置数据库时使用
#[derive(Default)]
pub struct InMemoryProfileRepository {
    profiles: RwLock<Vec<ServerProfile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn save(&self, profile: NewServerProfile) -> Result<ServerProfile> {
        let mut profiles = self.profiles.write().await;
        let id = profiles.last().map_or(1, |p| p.id + 1);
        let stored = ServerProfile {
            id,
            host: profile.host,
            port: profile.port,
            username: profile.username,
            key_locator: profile.key_locator,
            created_at: Utc::now(),
        };
        profiles.push(stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<ServerProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.iter().find(|p| p.id == id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<ServerProfile>> {
        Ok(self.profiles.read().await.clone())
    }
}
