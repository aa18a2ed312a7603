//! Server-rendered pages.

use axum::body::to_bytes;
use axum::extract::{Extension, Path, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Router, middleware};
use tera::Context;

use crate::error::{Result, ServerError};
use crate::booking::BookingService;
use crate::middleware::MaybeUser;
use crate::query::QueryOptions;
use crate::resource;
use crate::review::ReviewService;
use crate::tour::{Tour, TourRepository};
use crate::user::User;
use crate::{AppState, middleware as guards};

/// Default number of tours shown on the overview page.
const OVERVIEW_LIMIT: i64 = 100;

/// Largest error body the page wrapper will read back.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(account))
        .route("/my-tours", get(my_tours))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::authenticate,
        ));

    Router::new()
        .route("/", get(overview))
        .route("/tour/{slug}", get(tour))
        .route("/login", get(login))
        .route("/signup", get(signup))
        .route("/forgot-password", get(forgot_password))
        .route("/reset-password/{token}", get(reset_password))
        .merge(protected)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::maybe_authenticate,
        ))
        .layer(middleware::from_fn_with_state(state, render_errors))
}

/// Turns JSON error responses into the rendered error page. Browser
/// routes never hand raw API error bodies to the user.
async fn render_errors(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let status = response.status();
    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }
    let already_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));
    if already_html {
        return response;
    }

    let message = match to_bytes(response.into_body(), ERROR_BODY_LIMIT).await
    {
        Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes)
            .ok()
            .and_then(|body| {
                body.get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| "Something went wrong.".to_owned()),
        Err(_) => "Something went wrong.".to_owned(),
    };

    let mut context = page("Something went wrong", None);
    context.insert("message", &message);
    match render(&state, "error.html", &context) {
        Ok(body) => (status, body).into_response(),
        Err(err) => err.into_response(),
    }
}

fn render(
    state: &AppState,
    template: &str,
    context: &Context,
) -> Result<Html<String>> {
    state
        .templates
        .render(template, context)
        .map(Html)
        .map_err(|err| ServerError::Internal {
            details: format!("rendering {template} failed"),
            source: Some(Box::new(err)),
        })
}

fn page(title: &str, user: Option<&User>) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("user", &user);
    context
}

pub async fn overview(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
) -> Result<Html<String>> {
    let options = QueryOptions {
        limit: OVERVIEW_LIMIT,
        ..QueryOptions::default()
    };
    let tours =
        resource::find_all::<Tour>(&state.db.postgres, &options, None)
            .await?;

    let mut context = page("All Tours", user.as_ref());
    context.insert("tours", &tours);
    render(&state, "overview.html", &context)
}

pub async fn tour(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(slug): Path<String>,
) -> Result<Response> {
    let repository = TourRepository::new(state.db.clone());
    let Some(tour) = repository.find_by_slug(&slug).await? else {
        let mut context = page("Page not found", user.as_ref());
        context.insert("message", "There is no tour with that name.");
        let body = render(&state, "error.html", &context)?;
        return Ok((StatusCode::NOT_FOUND, body).into_response());
    };

    let reviews = ReviewService::new(state.db.clone())
        .find_for_tour(tour.id)
        .await?;
    let booked = match &user {
        Some(user) => {
            BookingService::new(state.db.clone())
                .has_booked(user.id, tour.id)
                .await?
        },
        None => false,
    };

    let mut context = page(&format!("{} Tour", tour.name), user.as_ref());
    context.insert("tour", &tour);
    context.insert("reviews", &reviews);
    context.insert("booked", &booked);
    Ok(render(&state, "tour.html", &context)?.into_response())
}

pub async fn login(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
) -> Result<Html<String>> {
    render(
        &state,
        "login.html",
        &page("Log into your account", user.as_ref()),
    )
}

pub async fn signup(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
) -> Result<Html<String>> {
    render(
        &state,
        "signup.html",
        &page("Create your account", user.as_ref()),
    )
}

pub async fn forgot_password(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
) -> Result<Html<String>> {
    render(
        &state,
        "forgot_password.html",
        &page("Forgot your password", user.as_ref()),
    )
}

pub async fn reset_password(
    State(state): State<AppState>,
    Extension(MaybeUser(user)): Extension<MaybeUser>,
    Path(token): Path<String>,
) -> Result<Html<String>> {
    let mut context = page("Reset your password", user.as_ref());
    context.insert("token", &token);
    render(&state, "reset_password.html", &context)
}

pub async fn account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Html<String>> {
    render(&state, "account.html", &page("Your account", Some(&user)))
}

/// Every tour the user has booked, rendered as an overview.
pub async fn my_tours(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Html<String>> {
    let tours = TourRepository::new(state.db.clone())
        .find_booked_by(user.id)
        .await?;

    let mut context = page("My Tours", Some(&user));
    context.insert("tours", &tours);
    render(&state, "overview.html", &context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app, make_request, router};
    use axum::http::Method;
    use http_body_util::BodyExt;
    use sqlx::{Pool, Postgres};

    async fn body_text(
        response: axum::http::Response<axum::body::Body>,
    ) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_overview_lists_tours(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router,
            Method::GET,
            "/",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        assert!(body.contains("The Forest Hiker"));
        assert!(body.contains("The Snow Adventurer"));
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_tour_page_and_missing_slug(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router.clone(),
            Method::GET,
            "/tour/the-forest-hiker",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("The Forest Hiker"));

        let response = make_request(
            app_router,
            Method::GET,
            "/tour/no-such-tour",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    async fn test_account_page_requires_login(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router,
            Method::GET,
            "/me",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Browser routes render the error page instead of the JSON body.
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        assert!(content_type.starts_with("text/html"), "{content_type}");

        let body = body_text(response).await;
        assert!(body.contains("Something went wrong"));
        assert!(!body.contains("\"status\""));
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_missing_tour_keeps_its_own_error_page(
        pool: Pool<Postgres>,
    ) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router,
            Method::GET,
            "/tour/no-such-tour",
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(
            body_text(response)
                .await
                .contains("There is no tour with that name.")
        );
    }
}
