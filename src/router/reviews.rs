//! Review routes, standalone and nested under a tour.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use uuid::Uuid;

use super::{DocResponse, ListResponse, Options, ValidJson, parse_id};
use crate::error::{Result, ServerError};
use crate::resource;
use crate::review::{
    CreateReview, NewReview, Review, ReviewService, UpdateReview,
};
use crate::user::{Role, User};
use crate::{AppState, middleware as guards};

const AUTHORS: &[Role] = &[Role::User];
const MODERATORS: &[Role] = &[Role::User, Role::Admin];

pub fn router(state: AppState) -> Router<AppState> {
    let authors = Router::new()
        .route("/", post(create))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(AUTHORS, req, next)
        }));

    let moderators = Router::new()
        .route("/{id}", get(get_one).patch(update).delete(remove))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(MODERATORS, req, next)
        }));

    Router::new()
        .route("/", get(list))
        .merge(authors)
        .merge(moderators)
        .route_layer(middleware::from_fn_with_state(
            state,
            guards::authenticate,
        ))
}

/// Routes mounted under `/tours/{id}/reviews`.
pub fn nested_router(state: AppState) -> Router<AppState> {
    let authors = Router::new()
        .route("/", post(create_for_tour))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(AUTHORS, req, next)
        }));

    Router::new()
        .route("/", get(list_for_tour))
        .merge(authors)
        .route_layer(middleware::from_fn_with_state(
            state,
            guards::authenticate,
        ))
}

fn service(state: &AppState) -> ReviewService {
    ReviewService::new(state.db.clone())
}

pub async fn list(
    State(state): State<AppState>,
    Options(options): Options,
) -> Result<Json<ListResponse>> {
    let reviews =
        resource::find_all::<Review>(&state.db.postgres, &options, None)
            .await?;
    Ok(Json(ListResponse::new(&reviews, &options)?))
}

pub async fn list_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Options(options): Options,
) -> Result<Json<ListResponse>> {
    let tour_id = parse_id("tour_id", tour_id)?;
    let reviews = resource::find_all::<Review>(
        &state.db.postgres,
        &options,
        Some(("tour_id", tour_id)),
    )
    .await?;
    Ok(Json(ListResponse::new(&reviews, &options)?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocResponse<Review>>> {
    let id = parse_id("id", id)?;
    let review =
        resource::find_by_id::<Review>(&state.db.postgres, id).await?;
    Ok(Json(DocResponse::new(review)))
}

async fn insert(
    state: &AppState,
    body: CreateReview,
    tour_id: Uuid,
    user: &User,
) -> Result<(StatusCode, Json<DocResponse<Review>>)> {
    let review = service(state)
        .create(NewReview {
            review: body.review,
            rating: body.rating,
            tour_id,
            user_id: user.id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(DocResponse::new(review))))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    ValidJson(body): ValidJson<CreateReview>,
) -> Result<(StatusCode, Json<DocResponse<Review>>)> {
    let tour_id = body.tour_id.ok_or_else(|| {
        ServerError::BadRequest("please provide a tour_id".to_owned())
    })?;
    insert(&state, body, tour_id, &user).await
}

/// Nested create: the tour comes from the path, the author from the token.
pub async fn create_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    Extension(user): Extension<User>,
    ValidJson(body): ValidJson<CreateReview>,
) -> Result<(StatusCode, Json<DocResponse<Review>>)> {
    let tour_id = parse_id("tour_id", tour_id)?;
    insert(&state, body, tour_id, &user).await
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<UpdateReview>,
) -> Result<Json<DocResponse<Review>>> {
    let id = parse_id("id", id)?;
    let review = service(&state).update(id, &body).await?;
    Ok(Json(DocResponse::new(review)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_id("id", id)?;
    service(&state).delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::auth::tests::signup_user;
    use crate::{app, make_request, router};
    use axum::http::Method;
    use http_body_util::BodyExt;
    use serde_json::json;
    use sqlx::{Pool, Postgres};

    const TOUR: &str = "aaaaaaaa-0001-4000-8000-000000000003";

    async fn tour_ratings(pool: &Pool<Postgres>) -> (f64, i32) {
        sqlx::query_as(
            "SELECT ratings_average, ratings_quantity FROM tours \
             WHERE id = $1::uuid",
        )
        .bind(TOUR)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_review_lifecycle_keeps_ratings_in_sync(
        pool: Pool<Postgres>,
    ) {
        let state = router::state(pool.clone());
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap().to_owned();

        let response = make_request(
            app_router.clone(),
            Method::POST,
            &format!("/api/v1/tours/{TOUR}/reviews/"),
            Some(&token),
            json!({ "review": "Amazing hike.", "rating": 4.0 }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body =
            response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let review_id = body["data"]["id"].as_str().unwrap().to_owned();

        // The only review counts 1 and averages itself.
        let (average, quantity) = tour_ratings(&pool).await;
        assert_eq!(quantity, 1);
        assert!((average - 4.0).abs() < 1e-9);

        let response = make_request(
            app_router.clone(),
            Method::PATCH,
            &format!("/api/v1/reviews/{review_id}"),
            Some(&token),
            json!({ "rating": 5.0 }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let (average, _) = tour_ratings(&pool).await;
        assert!((average - 5.0).abs() < 1e-9);

        let response = make_request(
            app_router,
            Method::DELETE,
            &format!("/api/v1/reviews/{review_id}"),
            Some(&token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Last review gone: back to the defaults.
        let (average, quantity) = tour_ratings(&pool).await;
        assert_eq!(quantity, 0);
        assert!((average - 4.5).abs() < 1e-9);
    }

    #[sqlx::test(fixtures("tours"))]
    async fn test_one_review_per_tour_and_user(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Jonas",
            "jonas@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap().to_owned();

        for expected in
            [StatusCode::CREATED, StatusCode::BAD_REQUEST]
        {
            let response = make_request(
                app_router.clone(),
                Method::POST,
                &format!("/api/v1/tours/{TOUR}/reviews/"),
                Some(&token),
                json!({ "review": "Once is enough.", "rating": 5.0 })
                    .to_string(),
            )
            .await;
            assert_eq!(response.status(), expected);
        }
    }

    #[sqlx::test(fixtures("tours", "admin"))]
    async fn test_admins_cannot_author_reviews(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state.clone());

        let token = router::admin_token(&state).await;
        let response = make_request(
            app_router,
            Method::POST,
            &format!("/api/v1/tours/{TOUR}/reviews/"),
            Some(&token),
            json!({ "review": "Fine.", "rating": 3.0 }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
