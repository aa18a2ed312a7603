//! HTTP API, versioned under `/api/v1`.

pub mod auth;
pub mod bookings;
pub mod reviews;
pub mod tours;
pub mod users;
pub mod views;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;
use validator::Validate;

use crate::error::{Result, ServerError};
use crate::query::QueryOptions;

pub const STATUS_SUCCESS: &str = "success";

/// Envelope for a single document.
#[derive(Debug, Serialize)]
pub struct DocResponse<T: Serialize> {
    status: &'static str,
    data: T,
}

impl<T: Serialize> DocResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: STATUS_SUCCESS,
            data,
        }
    }
}

/// Envelope for a collection, with requested fields projected.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    status: &'static str,
    results: usize,
    data: Vec<serde_json::Value>,
}

impl ListResponse {
    pub fn new<T: Serialize>(
        items: &[T],
        options: &QueryOptions,
    ) -> Result<Self> {
        let data = items
            .iter()
            .map(|item| {
                serde_json::to_value(item)
                    .map(|document| options.project(document))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| ServerError::Internal {
                details: "response serialization failed".into(),
                source: Some(Box::new(err)),
            })?;

        Ok(Self {
            status: STATUS_SUCCESS,
            results: data.len(),
            data,
        })
    }
}

/// JSON body extractor running validation before the handler.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(body) = Json::<T>::from_request(req, state).await?;
        body.validate()?;
        Ok(Self(body))
    }
}

/// Parsed filter/sort/pagination parameters from the query string.
pub struct Options(pub QueryOptions);

impl<S: Send + Sync> FromRequestParts<S> for Options {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self(QueryOptions::from_raw(parts.uri.query().unwrap_or(""))))
    }
}

/// Path identifiers come in as text; malformed ones are client errors, not
/// routing misses.
pub fn parse_id(field: &'static str, value: String) -> Result<Uuid> {
    Uuid::parse_str(&value).map_err(|_| ServerError::Cast {
        field: field.to_owned(),
        value,
    })
}

#[cfg(test)]
pub(crate) fn state(pool: sqlx::PgPool) -> crate::AppState {
    use std::sync::Arc;

    use crate::config::{Argon2, Configuration};
    use crate::crypto::Crypto;
    use crate::database::Database;
    use crate::mail::MailManager;
    use crate::payment::CheckoutClient;
    use crate::token::TokenManager;

    // Cheap hashing parameters. Never use them outside tests.
    let argon2 = Argon2 {
        memory_cost: 8 * 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    };

    crate::AppState {
        config: Arc::new(Configuration::default()),
        db: Database { postgres: pool },
        crypto: Arc::new(Crypto::new(Some(argon2)).expect("argon2 setup")),
        token: TokenManager::new(
            "https://trailbound.test/",
            "test-secret",
            None,
        ),
        mail: MailManager::default(),
        payment: CheckoutClient::default(),
        templates: Arc::new(
            tera::Tera::new("templates/**/*.html").expect("templates parse"),
        ),
    }
}

/// Identifier of the admin account seeded by the `admin` fixture.
#[cfg(test)]
pub(crate) const ADMIN_ID: &str = "11111111-1111-4111-8111-111111111111";

#[cfg(test)]
pub(crate) async fn admin_token(state: &crate::AppState) -> String {
    let id = Uuid::parse_str(ADMIN_ID).expect("fixture id");
    state.token.create(id).expect("token signing")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_malformed() {
        let err = parse_id("id", "not-a-uuid".into()).unwrap_err();
        assert!(matches!(err, ServerError::Cast { .. }));

        let id = Uuid::new_v4();
        assert_eq!(parse_id("id", id.to_string()).unwrap(), id);
    }
}
