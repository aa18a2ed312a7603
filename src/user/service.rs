//! Account lifecycle: signup, login checks, password change and reset.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto::Crypto;
use crate::error::{Result, ServerError};
use crate::user::{Role, User, UserRepository};

/// Reset tokens die after 10 minutes.
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct UserService {
    pub repo: UserRepository,
    crypto: Arc<Crypto>,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(pool: PgPool, crypto: Arc<Crypto>) -> Self {
        Self {
            repo: UserRepository::new(pool),
            crypto,
        }
    }

    /// Create an account with a hashed password. Role is always `user`:
    /// privileged roles are granted by an admin afterwards.
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User> {
        let hash = self.crypto.pwd.hash_password(password)?;
        self.repo.insert(name, email, &hash, Role::User).await
    }

    /// Verify an email/password pair, never revealing which of the two was
    /// wrong.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self.repo.find_by_email(email).await?;

        match user {
            Some(user)
                if self.crypto.pwd.verify_password(password, &user.password) =>
            {
                Ok(user)
            },
            _ => Err(ServerError::IncorrectCredentials(
                "incorrect email or password",
            )),
        }
    }

    /// Change the password of a logged-in user after re-checking the
    /// current one.
    pub async fn update_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        if !self
            .crypto
            .pwd
            .verify_password(current_password, &user.password)
        {
            return Err(ServerError::IncorrectCredentials(
                "incorrect current password",
            ));
        }

        let hash = self.crypto.pwd.hash_password(new_password)?;
        self.repo.update_password(user.id, &hash).await
    }

    /// Start the reset flow: persist the token digest and return the raw
    /// token for out-of-band delivery. The raw token is never stored.
    pub async fn forgot_password(&self, email: &str) -> Result<(User, String)> {
        let user = self
            .repo
            .find_by_email(email)
            .await?
            .ok_or(ServerError::NotFound("user"))?;

        let (raw, digest) = self.crypto.hasher.generate_reset_token();
        let expires_at = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        self.repo.set_reset_token(user.id, &digest, expires_at).await?;

        Ok((user, raw))
    }

    /// Roll back the reset fields when token delivery failed.
    pub async fn abort_password_reset(&self, user_id: Uuid) -> Result<()> {
        self.repo.clear_reset_token(user_id).await
    }

    /// Finish the reset flow with the raw token from the mail. Single-use:
    /// the digest is cleared together with the password update.
    pub async fn reset_password(
        &self,
        raw_token: &str,
        new_password: &str,
    ) -> Result<User> {
        let digest = self.crypto.hasher.digest(raw_token);
        let user = self
            .repo
            .find_by_reset_digest(&digest)
            .await?
            .ok_or_else(|| {
                ServerError::BadRequest("token is invalid or has expired".into())
            })?;

        let hash = self.crypto.pwd.hash_password(new_password)?;
        self.repo.update_password(user.id, &hash).await?;

        Ok(user)
    }
}
