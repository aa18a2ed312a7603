//! Error handler for trailbound.

use std::sync::OnceLock;

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

use crate::config::Mode;

pub type Result<T> = std::result::Result<T, ServerError>;

static MODE: OnceLock<Mode> = OnceLock::new();

/// Record the runtime mode once at startup; production collapses
/// non-operational errors to a generic message.
pub fn set_mode(mode: Mode) {
    let _ = MODE.set(mode);
}

fn mode() -> Mode {
    MODE.get().copied().unwrap_or_default()
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    BadRequest(String),

    #[error("invalid \"{field}\": \"{value}\"")]
    Cast { field: String, value: String },

    #[error("a document with the same \"{0}\" already exists")]
    Duplicate(String),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("error parsing form data")]
    ParsingForm(Box<dyn std::error::Error + Send + Sync>),

    #[error("SQL request failed: {0}")]
    Sql(SQLxError),

    #[error("you are not logged in, please log in to get access")]
    Unauthenticated,

    #[error("{0}")]
    IncorrectCredentials(&'static str),

    #[error("invalid token, please log in again")]
    InvalidToken,

    #[error("your token has expired, please log in again")]
    TokenExpired,

    #[error("you do not have permission to perform this action")]
    Forbidden,

    #[error("cannot find the {0} with that ID")]
    NotFound(&'static str),

    #[error("something went wrong with our email service, please try again later")]
    Mail(Box<dyn std::error::Error + Send + Sync>),

    #[error("payment provider error: {0}")]
    Payment(String),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Classify errors in operational (public-safe message) and
    /// programming errors which must stay opaque in production.
    fn is_operational(&self) -> bool {
        !matches!(
            self,
            ServerError::Sql(_) | ServerError::Internal { .. } | ServerError::Mail(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_)
            | ServerError::BadRequest(_)
            | ServerError::Cast { .. }
            | ServerError::Duplicate(_)
            | ServerError::Axum(_)
            | ServerError::ParsingForm(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthenticated
            | ServerError::IncorrectCredentials(_)
            | ServerError::InvalidToken
            | ServerError::TokenExpired => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Sql(_)
            | ServerError::Mail(_)
            | ServerError::Payment(_)
            | ServerError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to disclose for the current runtime mode.
    pub fn public_message(&self) -> String {
        if self.is_operational() || mode() == Mode::Development {
            self.to_string()
        } else {
            "Oops! Something went wrong.".to_owned()
        }
    }
}

impl From<SQLxError> for ServerError {
    fn from(err: SQLxError) -> Self {
        match &err {
            SQLxError::RowNotFound => ServerError::NotFound("document"),
            SQLxError::Database(db) if db.is_unique_violation() => {
                ServerError::Duplicate(
                    db.constraint().unwrap_or("key").to_owned(),
                )
            },
            _ => ServerError::Sql(err),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ServerError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                ServerError::TokenExpired
            },
            _ => ServerError::InvalidToken,
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    status: &'static str,
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    pub fn new(code: StatusCode, message: &str) -> Self {
        Self {
            status: if code.is_server_error() { "error" } else { "fail" },
            code: code.as_u16(),
            message: message.to_owned(),
            errors: None,
        }
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> Response {
        match serde_json::to_string(&self) {
            Ok(body) => Response::builder()
                .status(self.code)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
                .unwrap_or_else(|_| internal_server_error()),
            Err(_) => internal_server_error(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if !self.is_operational() {
            tracing::error!(error = %self, "server returned 500 status");
        }

        let response =
            ResponseError::new(self.status_code(), &self.public_message());

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },
            _ => response,
        };

        response.into_response()
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "status": "error",
                "code": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "message": "Oops! Something went wrong.",
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ServerError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::Forbidden.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServerError::NotFound("tour").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::Duplicate("email".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::TokenExpired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServerError::IncorrectCredentials("incorrect email or password")
                .status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_forbidden_distinct_from_unauthenticated() {
        assert_ne!(
            ServerError::Forbidden.status_code(),
            ServerError::Unauthenticated.status_code()
        );
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err: ServerError = SQLxError::RowNotFound.into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_operational_message_is_disclosed() {
        let err = ServerError::NotFound("tour");
        assert_eq!(err.public_message(), "cannot find the tour with that ID");
    }
}
