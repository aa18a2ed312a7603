//! Request guards: authentication and role checks.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Result, ServerError};
use crate::token;
use crate::user::{Role, User, UserRepository};
use crate::AppState;

/// Authenticated account, available to handlers behind [`authenticate`].
/// View handlers use the optional variant instead.
#[derive(Clone, Debug)]
pub struct MaybeUser(pub Option<User>);

async fn resolve_user(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<User> {
    let authorization =
        headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let cookies = headers.get(COOKIE).and_then(|value| value.to_str().ok());

    let token = token::extract_bearer(authorization, cookies)
        .ok_or(ServerError::Unauthenticated)?;
    let claims = state.token.decode(&token)?;

    let user = UserRepository::new(state.db.postgres.clone())
        .find_by_id(claims.sub)
        .await?
        .ok_or(ServerError::InvalidToken)?;

    // A token minted before the last password change is no longer valid.
    if user.changed_password_after(claims.iat) {
        return Err(ServerError::InvalidToken);
    }

    Ok(user)
}

/// Reject the request unless it carries a valid bearer token, then make the
/// account available as an [`axum::Extension<User>`].
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = resolve_user(&state, request.headers()).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Like [`authenticate`] but never fails, for pages rendered both ways.
pub async fn maybe_authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let user = resolve_user(&state, request.headers()).await.ok();
    request.extensions_mut().insert(MaybeUser(user));
    next.run(request).await
}

/// Layered after [`authenticate`]: rejects accounts outside `allowed`.
pub async fn restrict_to(
    allowed: &[Role],
    request: Request,
    next: Next,
) -> Result<Response> {
    let user = request
        .extensions()
        .get::<User>()
        .ok_or(ServerError::Unauthenticated)?;

    if !allowed.contains(&user.role) {
        return Err(ServerError::Forbidden);
    }

    Ok(next.run(request).await)
}
