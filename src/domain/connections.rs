//! Platform connection queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres};

use super::ConnectionRepository;
use crate::models::{Platform, PlatformConnection};

pub async fn get_connection<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
) -> Result<Option<PlatformConnection>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT user_id, platform, access_token, refresh_token, expires_at, platform_user_id
        FROM platform_connections
        WHERE user_id = $1 AND platform = $2
        "#,
    )
    .bind(user_id)
    .bind(platform)
    .fetch_optional(executor)
    .await
}

pub async fn list_connections<'e, E>(
    executor: E,
    user_id: i64,
) -> Result<Vec<PlatformConnection>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT user_id, platform, access_token, refresh_token, expires_at, platform_user_id
        FROM platform_connections
        WHERE user_id = $1
        ORDER BY platform
        "#,
    )
    .bind(user_id)
    .fetch_all(executor)
    .await
}

pub async fn upsert_connection<'e, E>(
    executor: E,
    connection: &PlatformConnection,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO platform_connections
            (user_id, platform, access_token, refresh_token, expires_at, platform_user_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id, platform) DO UPDATE SET
            access_token = $3,
            refresh_token = COALESCE($4, platform_connections.refresh_token),
            expires_at = $5,
            platform_user_id = COALESCE($6, platform_connections.platform_user_id),
            updated_at = NOW()
        "#,
    )
    .bind(connection.user_id)
    .bind(connection.platform)
    .bind(&connection.access_token)
    .bind(connection.refresh_token.as_deref())
    .bind(connection.expires_at)
    .bind(connection.platform_user_id.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn update_tokens<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE platform_connections SET
            access_token = $3,
            refresh_token = COALESCE($4, refresh_token),
            expires_at = $5,
            updated_at = NOW()
        WHERE user_id = $1 AND platform = $2
        "#,
    )
    .bind(user_id)
    .bind(platform)
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn delete_connection<'e, E>(
    executor: E,
    user_id: i64,
    platform: Platform,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM platform_connections WHERE user_id = $1 AND platform = $2")
        .bind(user_id)
        .bind(platform)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Postgres-backed [`ConnectionRepository`]
#[derive(Clone)]
pub struct PgConnectionRepository {
    db: PgPool,
}

impl PgConnectionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn get_connection(
        &self,
        user_id: i64,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>, sqlx::Error> {
        get_connection(&self.db, user_id, platform).await
    }

    async fn list_connections(&self, user_id: i64) -> Result<Vec<PlatformConnection>, sqlx::Error> {
        list_connections(&self.db, user_id).await
    }

    async fn upsert_connection(&self, connection: &PlatformConnection) -> Result<(), sqlx::Error> {
        upsert_connection(&self.db, connection).await
    }

    async fn update_tokens(
        &self,
        user_id: i64,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        update_tokens(&self.db, user_id, platform, access_token, refresh_token, expires_at).await
    }

    async fn delete_connection(&self, user_id: i64, platform: Platform) -> Result<bool, sqlx::Error> {
        delete_connection(&self.db, user_id, platform).await
    }
}
