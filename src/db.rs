//! 档案库（PostgreSQL）
//!
//! 启动时建立连接池并迁移 `server_profiles` 表；就绪探针通过 `ping` 检查可用性。
//! 未配置 `database.url` 时不会调用本模块，档案保存在内存中。

use secrecy::{ExposeSecret, Secret};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::DatabaseConfig;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Profile store connection failed: {0}")]
    Connect(String),

    #[error("Profile store migration failed: {0}")]
    Migrate(String),

    #[error("Profile store unavailable: {0}")]
    Unavailable(String),
}

/// 连接档案库并确保表结构为最新
pub async fn connect(url: &Secret<String>, config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .connect(url.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Cannot reach the profile store");
            DbError::Connect(e.to_string())
        })?;

    MIGRATOR.run(&pool).await.map_err(|e| {
        tracing::error!(error = %e, "Profile store migration failed");
        DbError::Migrate(e.to_string())
    })?;

    tracing::info!(
        max_connections = config.max_connections,
        migrations = MIGRATOR.iter().count(),
        "Profile store ready"
    );
    Ok(pool)
}

/// 档案库可用性（就绪探针）
pub async fn ping(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| DbError::Unavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_table_migration_is_embedded() {
        let descriptions: Vec<_> = MIGRATOR.iter().map(|m| m.description.to_string()).collect();
        assert_eq!(descriptions, vec!["create server profiles".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_error_is_reported() {
        // 无效地址在解析阶段即失败，不依赖数据库
        let url = Secret::new("not-a-postgres-url".to_string());
        let config = DatabaseConfig {
            url: None,
            max_connections: 1,
            min_connections: 0,
            acquire_timeout_secs: 1,
            idle_timeout_secs: 60,
            max_lifetime_secs: 60,
        };
        let result = connect(&url, &config).await;
        assert!(matches!(result, Err(DbError::Connect(_))));
    }
}
