//! Trailbound is a tour-booking service: a JSON API under `/api/v1` plus
//! server-rendered pages for the same catalogue.

pub mod config;
mod crypto;
mod database;
pub mod error;
mod mail;
mod middleware;
mod payment;
mod query;
mod resource;
mod router;
mod token;
mod upload;

mod booking;
mod review;
mod tour;
mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{Method, header};
use axum::routing::post;
use tera::Tera;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: mail::MailManager,
    pub payment: payment::CheckoutClient,
    pub templates: Arc<Tera>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let api = Router::new()
        .nest("/tours/", router::tours::router(state.clone()))
        .nest("/users/", router::users::router(state.clone()))
        .nest("/reviews/", router::reviews::router(state.clone()))
        .nest("/bookings/", router::bookings::router(state.clone()));

    let assets = ServeDir::new(state.config.uploads.public_dir.clone());

    Router::new()
        .nest("/api/v1", api)
        .route(
            "/webhook-checkout",
            post(router::bookings::webhook_checkout),
        )
        .merge(router::views::router(state.clone()))
        .fallback_service(assets)
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>>
{
    // read configuration file. let it in memory.
    let config = config::Configuration::default().read()?;
    error::set_mode(config.mode);
    tracing::info!(name = %config.name, mode = ?config.mode, "configuration loaded");

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::error!("missing `postgres` entry on `config.yaml` file");
            std::process::exit(1);
        },
    };

    // execute migrations scripts on start.
    sqlx::migrate!().run(&db.postgres).await?;

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    // handle bearer tokens.
    let Some(token_config) = &config.token else {
        tracing::error!("missing `token` entry on `config.yaml` file");
        std::process::exit(1);
    };
    if token_config.secret.is_empty() {
        tracing::error!("empty token secret, set `TOKEN_SECRET`");
        std::process::exit(1);
    }
    let mut token = token::TokenManager::new(
        &config.url,
        &token_config.secret,
        token_config.expires_in,
    );
    token.secure_cookies(config.mode == config::Mode::Production);
    if let Some(days) = token_config.cookie_expires_days {
        token.cookie_expires_days(days);
    }

    // handle mail sender.
    let mail = if let Some(cfg) = &config.mail {
        mail::MailManager::new(cfg).await?
    } else {
        mail::MailManager::default()
    };

    // handle checkout provider.
    let payment = match &config.payment {
        Some(cfg) => payment::CheckoutClient::new(cfg),
        None => payment::CheckoutClient::default(),
    };

    let templates_glob = config
        .uploads
        .templates_dir
        .join("**")
        .join("*.html")
        .display()
        .to_string();
    let templates = Arc::new(Tera::new(&templates_glob)?);

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        payment,
        templates,
    })
}
