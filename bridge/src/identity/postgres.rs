use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{IdentityError, LinkStatus, LinkStore};

/// Durable link store backed by the `connection_links` table.
#[derive(Clone)]
pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    user_id: Option<String>,
    linked: bool,
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn status(&self, connection_id: &str) -> Result<LinkStatus, IdentityError> {
        let row = sqlx::query_as::<_, LinkRow>(
            "SELECT user_id, linked FROM connection_links WHERE connection_id = $1",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(LinkRow {
                user_id: Some(user_id),
                linked: true,
            }) => LinkStatus::Linked { user_id },
            Some(_) => LinkStatus::Pending,
            None => LinkStatus::Unknown,
        })
    }

    async fn mark_pending(
        &self,
        connection_id: &str,
        code_hash: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        sqlx::query(
            "INSERT INTO connection_links \
                 (connection_id, user_id, linked, code_hash, code_issued_at, updated_at) \
             VALUES ($1, NULL, FALSE, $2, $3, NOW()) \
             ON CONFLICT (connection_id) DO UPDATE \
             SET code_hash = EXCLUDED.code_hash, \
                 code_issued_at = EXCLUDED.code_issued_at, \
                 updated_at = NOW() \
             WHERE connection_links.linked = FALSE",
        )
        .bind(connection_id)
        .bind(code_hash)
        .bind(issued_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn link(&self, connection_id: &str, user_id: &str) -> Result<(), IdentityError> {
        sqlx::query(
            "INSERT INTO connection_links (connection_id, user_id, linked, updated_at) \
             VALUES ($1, $2, TRUE, NOW()) \
             ON CONFLICT (connection_id) \
             DO UPDATE SET user_id = EXCLUDED.user_id, linked = TRUE, \
                 code_hash = NULL, code_issued_at = NULL, updated_at = NOW()",
        )
        .bind(connection_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(
        &self,
        connection_id: &str,
        code_hash: &str,
        user_id: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool, IdentityError> {
        let result = sqlx::query(
            "UPDATE connection_links \
             SET user_id = $3, linked = TRUE, code_hash = NULL, code_issued_at = NULL, \
                 updated_at = NOW() \
             WHERE connection_id = $1 AND linked = FALSE \
               AND code_hash = $2 AND code_issued_at >= $4",
        )
        .bind(connection_id)
        .bind(code_hash)
        .bind(user_id)
        .bind(issued_after)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
