//! Signup, login and the password lifecycle.

use axum::extract::{Extension, Path, State};
use axum::http::{StatusCode, header};
use axum::{Json, Router};
use axum::{middleware, routing::get, routing::patch, routing::post};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{STATUS_SUCCESS, ValidJson};
use crate::error::{Result, ServerError};
use crate::mail::Template;
use crate::user::{User, UserService};
use crate::{AppState, middleware as guards};

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/update-my-password", patch(update_my_password))
        .route_layer(middleware::from_fn_with_state(
            state,
            guards::authenticate,
        ));

    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password/{token}", patch(reset_password))
        .merge(protected)
}

fn service(state: &AppState) -> UserService {
    UserService::new(state.db.postgres.clone(), state.crypto.clone())
}

/// Token response the auth routes share, doubling the `Set-Cookie`.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    status: &'static str,
    pub token: String,
    data: UserData,
}

#[derive(Debug, Serialize)]
struct UserData {
    user: User,
}

fn token_response(
    state: &AppState,
    user: User,
    code: StatusCode,
) -> Result<impl axum::response::IntoResponse> {
    let token = state.token.create(user.id)?;
    let cookie = state.token.cookie(&token);

    Ok((
        code,
        [(header::SET_COOKIE, cookie)],
        Json(TokenResponse {
            status: STATUS_SUCCESS,
            token,
            data: UserData { user },
        }),
    ))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SignupBody {
    #[validate(length(min = 2, max = 60))]
    pub name: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub password_confirm: String,
}

pub async fn signup(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<SignupBody>,
) -> Result<impl axum::response::IntoResponse> {
    if body.password != body.password_confirm {
        return Err(ServerError::BadRequest(
            "passwords do not match".to_owned(),
        ));
    }

    let user = service(&state)
        .signup(&body.name, &body.email, &body.password)
        .await?;

    let profile_url = format!("{}me", state.config.url);
    if let Err(err) = state
        .mail
        .publish_event(Template::Welcome, &user, Some(&profile_url))
        .await
    {
        tracing::warn!(error = %err, "welcome mail not published");
    }

    token_response(&state, user, StatusCode::CREATED)
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LoginBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Please provide a password."))]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<LoginBody>,
) -> Result<impl axum::response::IntoResponse> {
    let user = service(&state).login(&body.email, &body.password).await?;
    token_response(&state, user, StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

pub async fn logout(
    State(state): State<AppState>,
) -> (StatusCode, [(header::HeaderName, String); 1], Json<StatusResponse>) {
    (
        StatusCode::OK,
        [(header::SET_COOKIE, state.token.logout_cookie())],
        Json(StatusResponse {
            status: STATUS_SUCCESS,
            message: None,
        }),
    )
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ForgotPasswordBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<ForgotPasswordBody>,
) -> Result<Json<StatusResponse>> {
    let service = service(&state);
    let (user, raw_token) = service.forgot_password(&body.email).await?;

    let reset_url =
        format!("{}reset-password/{raw_token}", state.config.url);
    if let Err(err) = state
        .mail
        .publish_event(Template::PasswordReset, &user, Some(&reset_url))
        .await
    {
        // A dangling digest would lock the flow for ten minutes.
        service.abort_password_reset(user.id).await?;
        return Err(err);
    }

    Ok(Json(StatusResponse {
        status: STATUS_SUCCESS,
        message: Some("Token sent to email.".to_owned()),
    }))
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ResetPasswordBody {
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub password_confirm: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidJson(body): ValidJson<ResetPasswordBody>,
) -> Result<impl axum::response::IntoResponse> {
    if body.password != body.password_confirm {
        return Err(ServerError::BadRequest(
            "passwords do not match".to_owned(),
        ));
    }

    let user = service(&state)
        .reset_password(&token, &body.password)
        .await?;

    token_response(&state, user, StatusCode::OK)
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdatePasswordBody {
    #[validate(length(min = 1, message = "Please provide a password."))]
    pub password_current: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
    pub password_confirm: String,
}

pub async fn update_my_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ValidJson(body): ValidJson<UpdatePasswordBody>,
) -> Result<impl axum::response::IntoResponse> {
    if body.password != body.password_confirm {
        return Err(ServerError::BadRequest(
            "passwords do not match".to_owned(),
        ));
    }

    let service = service(&state);
    service
        .update_password(&user, &body.password_current, &body.password)
        .await?;

    // Re-issue credentials: the old token predates the password change.
    let user = crate::user::UserRepository::new(state.db.postgres.clone())
        .find_by_id(user.id)
        .await?
        .ok_or(ServerError::NotFound("user"))?;
    token_response(&state, user, StatusCode::OK)
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::{app, make_request, router};
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    pub(crate) async fn signup_user(
        app: axum::Router,
        name: &str,
        email: &str,
        password: &str,
    ) -> serde_json::Value {
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/signup",
            None,
            json!({
                "name": name,
                "email": email,
                "password": password,
                "password_confirm": password,
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[sqlx::test]
    async fn test_signup_and_login(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state.clone());

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;

        let token = body["token"].as_str().unwrap();
        assert!(state.token.decode(token).is_ok());
        assert_eq!(body["data"]["user"]["role"], "user");
        // Credentials never leave the server.
        assert!(body["data"]["user"].get("password").is_none());

        let response = make_request(
            app_router,
            Method::POST,
            "/api/v1/users/login",
            None,
            json!({
                "email": "jonas@trailbound.test",
                "password": "pass1234word",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[sqlx::test]
    async fn test_login_with_wrong_password(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;

        let response = make_request(
            app_router,
            Method::POST,
            "/api/v1/users/login",
            None,
            json!({
                "email": "jonas@trailbound.test",
                "password": "wrong password",
            })
            .to_string(),
        )
        .await;
        // Bad credentials are an authentication failure, not a malformed
        // request.
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_wrong_current_password_is_unauthorized(
        pool: Pool<Postgres>,
    ) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap();

        let response = make_request(
            app_router,
            Method::PATCH,
            "/api/v1/users/update-my-password",
            Some(token),
            json!({
                "password_current": "not my password",
                "password": "anoth3r-passw0rd",
                "password_confirm": "anoth3r-passw0rd",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_password_change_invalidates_old_token(
        pool: Pool<Postgres>,
    ) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;
        let old_token = body["token"].as_str().unwrap().to_owned();

        // `password_changed_at` is backdated by one second on change, so
        // the issuance second must be strictly older for the token to go
        // stale.
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        let response = make_request(
            app_router.clone(),
            Method::PATCH,
            "/api/v1/users/update-my-password",
            Some(&old_token),
            json!({
                "password_current": "pass1234word",
                "password": "anoth3r-passw0rd",
                "password_confirm": "anoth3r-passw0rd",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // The pre-change token is now stale.
        let response = make_request(
            app_router,
            Method::GET,
            "/api/v1/users/me",
            Some(&old_token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_protected_route_without_token(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router,
            Method::PATCH,
            "/api/v1/users/update-my-password",
            None,
            json!({
                "password_current": "a",
                "password": "pass1234word",
                "password_confirm": "pass1234word",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
