//! Handle user database requests.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use crate::error::Result;
use crate::user::User;

/// Inactive users stay on disk but never come back from reads.
const ACTIVE: &str = "active = TRUE";

#[derive(Clone)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a freshly signed-up user.
    pub async fn insert(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: crate::user::Role,
    ) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, name, email, password, role)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email.to_lowercase())
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find an active user by identifier.
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT * FROM users WHERE id = $1 AND {ACTIVE}"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find an active user by email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT * FROM users WHERE email = $1 AND {ACTIVE}"
        ))
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find the active user holding a non-expired reset-token digest.
    pub async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"SELECT * FROM users
                WHERE password_reset_token = $1
                    AND password_reset_expires_at > NOW()
                    AND {ACTIVE}"#
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Store a new password hash. `password_changed_at` backdates one second
    /// so a token issued in the same second stays valid.
    pub async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
                SET password = $1,
                    password_changed_at = NOW() - INTERVAL '1 second',
                    password_reset_token = NULL,
                    password_reset_expires_at = NULL
                WHERE id = $2"#,
        )
        .bind(password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist the one-way digest of a reset token with its expiry.
    pub async fn set_reset_token(
        &self,
        user_id: Uuid,
        digest: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
                SET password_reset_token = $1, password_reset_expires_at = $2
                WHERE id = $3"#,
        )
        .bind(digest)
        .bind(expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop the reset fields, e.g. when the reset mail cannot be sent.
    pub async fn clear_reset_token(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"UPDATE users
                SET password_reset_token = NULL, password_reset_expires_at = NULL
                WHERE id = $1"#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Soft delete: the account disappears from every read.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
