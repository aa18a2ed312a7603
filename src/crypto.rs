//! Cryptographic logics: password hashing and one-way token digests.

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::config::Argon2 as ArgonConfig;

const RESET_TOKEN_LENGTH: usize = 32;

type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
}

impl From<CryptoError> for crate::error::ServerError {
    fn from(err: CryptoError) -> Self {
        crate::error::ServerError::Internal {
            details: "password hashing failed".into(),
            source: Some(Box::new(err)),
        }
    }
}

/// Cryptographic manager.
pub struct Crypto {
    pub pwd: PasswordManager,
    pub hasher: Hasher,
}

impl Crypto {
    /// Create a new [`Crypto`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        Ok(Self {
            pwd: PasswordManager::new(config)?,
            hasher: Hasher::new(),
        })
    }
}

/// Password manager that uses Argon2id and PHC string format for hashing and
/// verification.
pub struct PasswordManager {
    params: Params,
}

impl PasswordManager {
    /// Create a new [`PasswordManager`].
    pub fn new(config: Option<ArgonConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();

        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2 {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
    }

    /// Hash password using Argon2id.
    pub fn hash_password(&self, password: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.as_ref(), &salt)
            .map_err(|e| CryptoError::Argon2(e.to_string()))?;

        Ok(hash.to_string())
    }

    /// Verify password against a PHC string.
    pub fn verify_password(
        &self,
        password: impl AsRef<[u8]>,
        phc_hash: &str,
    ) -> bool {
        let Ok(parsed) = PasswordHash::new(phc_hash) else {
            return false;
        };

        self.argon2()
            .verify_password(password.as_ref(), &parsed)
            .is_ok()
    }
}

/// One-way digests for reset tokens: only the digest is persisted, the raw
/// token travels out-of-band.
pub struct Hasher;

impl Hasher {
    /// Create a new [`Hasher`].
    pub fn new() -> Self {
        Self
    }

    /// Digest data into SHA256 hex.
    pub fn digest(&self, data: impl AsRef<[u8]>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&data);
        let hash = hasher.finalize();

        hex::encode(hash)
    }

    /// Generate a random reset token and its persisted digest.
    /// Returns `(raw_token, digest)`.
    pub fn generate_reset_token(&self) -> (String, String) {
        let mut bytes = [0u8; RESET_TOKEN_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let digest = self.digest(&raw);

        (raw, digest)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}
