//! Manage bearer tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServerError};

/// 90 days, matching the `jwt` cookie default.
pub const DEFAULT_EXPIRATION_SECS: u64 = 90 * 24 * 60 * 60;
pub const COOKIE_NAME: &str = "jwt";

/// Pieces of information asserted on a bearer token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Claims {
    /// Identifies the expiration time on or after which the token must not
    /// be accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the token was issued. Compared against
    /// the user's last password change to reject stale credentials.
    pub iat: u64,
    /// Identifies the instance that issued the token.
    pub iss: String,
    /// User ID.
    pub sub: Uuid,
}

/// Sign and verify bearer tokens against the server secret.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expiration: u64,
    cookie_max_age: u64,
    secure_cookies: bool,
}

impl TokenManager {
    /// Create a new [`TokenManager`] from an HMAC secret.
    pub fn new(issuer: &str, secret: &str, expiration: Option<u64>) -> Self {
        let expiration = expiration.unwrap_or(DEFAULT_EXPIRATION_SECS);
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_owned(),
            expiration,
            cookie_max_age: expiration,
            secure_cookies: false,
        }
    }

    /// Mark issued cookies `Secure`. Enabled in production.
    pub fn secure_cookies(&mut self, secure: bool) {
        self.secure_cookies = secure;
    }

    /// Give the `jwt` cookie its own lifetime, in days.
    pub fn cookie_expires_days(&mut self, days: u64) {
        self.cookie_max_age = days * 24 * 60 * 60;
    }

    fn now() -> Result<u64> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| ServerError::Internal {
                details: "system clock before unix epoch".into(),
                source: Some(Box::new(err)),
            })?
            .as_secs())
    }

    /// Create a new signed token for a user.
    pub fn create(&self, user_id: Uuid) -> Result<String> {
        let time = Self::now()?;
        let header = Header::new(self.algorithm);
        let claims = Claims {
            exp: time + self.expiration,
            iat: time,
            iss: self.issuer.clone(),
            sub: user_id,
        };

        Ok(encode(&header, &claims, &self.encoding_key)?)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(self.algorithm);
        Ok(decode::<Claims>(token, &self.decoding_key, &validation)?.claims)
    }

    /// `Set-Cookie` value carrying the token, HttpOnly.
    pub fn cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{COOKIE_NAME}={token}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_max_age
        );
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Short-lived blank cookie overriding the one stored in the browser.
    pub fn logout_cookie(&self) -> String {
        format!("{COOKIE_NAME}=; Max-Age=10; Path=/; HttpOnly; SameSite=Lax")
    }
}

/// Extract the bearer credential from an `Authorization: Bearer <t>` header
/// value or, failing that, from the `jwt` cookie.
pub fn extract_bearer(
    authorization: Option<&str>,
    cookies: Option<&str>,
) -> Option<String> {
    if let Some(header) = authorization {
        if let Some(token) = header.strip_prefix("Bearer ") {
            return Some(token.trim().to_owned());
        }
    }

    cookies.and_then(|cookies| {
        cookies.split(';').find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == COOKIE_NAME && !value.is_empty())
                .then(|| value.to_owned())
        })
    })
}
