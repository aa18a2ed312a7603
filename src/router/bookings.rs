//! Booking routes: hosted checkout plus the staff CRUD.

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde::Serialize;

use super::{DocResponse, ListResponse, Options, ValidJson, parse_id};
use crate::booking::{
    Booking, BookingService, CreateBooking, UpdateBooking,
};
use crate::error::{Result, ServerError};
use crate::payment::{CheckoutEvent, CheckoutSession};
use crate::resource;
use crate::tour::Tour;
use crate::user::{Role, User};
use crate::{AppState, middleware as guards};

const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "checkout-signature";
const SESSION_COMPLETED: &str = "checkout.session.completed";

pub fn router(state: AppState) -> Router<AppState> {
    let staff = Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(get_one).patch(update).delete(remove))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(STAFF, req, next)
        }));

    Router::new()
        .route("/checkout-session/{tour_id}", get(checkout_session))
        .merge(staff)
        .route_layer(middleware::from_fn_with_state(
            state,
            guards::authenticate,
        ))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    status: &'static str,
    session: CheckoutSession,
}

/// Open a checkout session for the logged-in user and one tour seat.
pub async fn checkout_session(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<SessionResponse>> {
    let tour_id = parse_id("tour_id", tour_id)?;
    let tour =
        resource::find_by_id::<Tour>(&state.db.postgres, tour_id).await?;

    let cover_url =
        format!("{}img/tours/{}", state.config.url, tour.image_cover);
    let session = state
        .payment
        .create_session(&tour, &user, &state.config.url, cover_url)
        .await?;

    Ok(Json(SessionResponse {
        status: super::STATUS_SUCCESS,
        session,
    }))
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    received: bool,
}

/// Provider callback, mounted outside the versioned tree. The payload is
/// trusted only after its signature checks out against the shared secret.
pub async fn webhook_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ServerError::BadRequest("missing webhook signature".to_owned())
        })?;
    state.payment.verify_signature(signature, &body)?;

    let event: CheckoutEvent = serde_json::from_slice(&body)
        .map_err(|err| ServerError::Payment(err.to_string()))?;

    if event.kind == SESSION_COMPLETED {
        let session = event.data.object;
        let booking = BookingService::new(state.db.clone())
            .record_checkout(
                session.client_reference_id,
                &session.customer_email,
                session.amount_total,
            )
            .await?;
        tracing::info!(booking_id = %booking.id, "checkout recorded");
    }

    Ok(Json(WebhookResponse { received: true }))
}

pub async fn list(
    State(state): State<AppState>,
    Options(options): Options,
) -> Result<Json<ListResponse>> {
    let bookings =
        resource::find_all::<Booking>(&state.db.postgres, &options, None)
            .await?;
    Ok(Json(ListResponse::new(&bookings, &options)?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocResponse<Booking>>> {
    let id = parse_id("id", id)?;
    let booking =
        resource::find_by_id::<Booking>(&state.db.postgres, id).await?;
    Ok(Json(DocResponse::new(booking)))
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<CreateBooking>,
) -> Result<(StatusCode, Json<DocResponse<Booking>>)> {
    let booking =
        resource::insert::<Booking, _>(&state.db.postgres, &body).await?;
    Ok((StatusCode::CREATED, Json(DocResponse::new(booking))))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<UpdateBooking>,
) -> Result<Json<DocResponse<Booking>>> {
    let id = parse_id("id", id)?;
    let booking =
        resource::update::<Booking, _>(&state.db.postgres, id, &body)
            .await?;
    Ok(Json(DocResponse::new(booking)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_id("id", id)?;
    resource::delete_by_id::<Booking>(&state.db.postgres, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::auth::tests::signup_user;
    use crate::{app, make_request, router};
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{Method, header};
    use serde_json::json;
    use sqlx::{Pool, Postgres};
    use tower::util::ServiceExt;

    const TOUR: &str = "aaaaaaaa-0001-4000-8000-000000000003";

    async fn post_webhook(
        app_router: axum::Router,
        signature: &str,
    ) -> axum::http::Response<Body> {
        let payload = json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "client_reference_id": TOUR,
                "customer_email": "jonas@trailbound.test",
                "amount_total": 49700,
            }},
        })
        .to_string();

        app_router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/webhook-checkout")
                    .header(SIGNATURE_HEADER, signature)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_webhook_rejects_bad_signature(pool: Pool<Postgres>) {
        use crate::payment::CheckoutClient;

        let mut state = router::state(pool);
        state.payment = CheckoutClient::new(&crate::config::Payment {
            api_url: "https://pay.example.com".into(),
            secret_key: "sk_test".into(),
            webhook_secret: "whsec_test".into(),
            currency: None,
        });
        let app_router = app(state);

        let response = post_webhook(app_router, "t=0,v1=00").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_webhook_without_secret_accepts_nothing(
        pool: Pool<Postgres>,
    ) {
        // The default client has no webhook secret; even a signature
        // crafted with the empty key must bounce.
        let state = router::state(pool);
        let app_router = app(state);

        let response = post_webhook(app_router, "t=0,v1=00").await;
        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_checkout_session_requires_login(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let response = make_request(
            app_router,
            Method::GET,
            &format!("/api/v1/bookings/checkout-session/{TOUR}"),
            None,
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_checkout_session_without_provider(pool: Pool<Postgres>) {
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

        // Test state carries no provider credentials.
        let response = make_request(
            app_router,
            Method::GET,
            &format!("/api/v1/bookings/checkout-session/{TOUR}"),
            Some(token),
            String::new(),
        )
        .await;
        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[sqlx::test(fixtures("tours", "admin"))]
    async fn test_staff_crud(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state.clone());

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;
        let user_id = body["data"]["user"]["id"].as_str().unwrap().to_owned();
        let user_token = body["token"].as_str().unwrap().to_owned();

        let admin_token = router::admin_token(&state).await;
        let response = make_request(
            app_router.clone(),
            Method::POST,
            "/api/v1/bookings/",
            Some(&admin_token),
            json!({
                "tour_id": TOUR,
                "user_id": user_id,
                "price": 497.0,
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        // Plain users cannot reach the staff CRUD.
        let response = make_request(
            app_router,
            Method::GET,
            "/api/v1/bookings/",
            Some(&user_token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
