//! Account profile routes and the admin-only user CRUD.

use axum::extract::{Extension, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch};
use axum::{Json, Router, middleware};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use validator::Validate;

use super::{DocResponse, ListResponse, Options, ValidJson, auth, parse_id};
use crate::error::{Result, ServerError};
use crate::resource::{self, Assignments, UpdateDto};
use crate::upload::{self, ImageKind};
use crate::user::{Role, User, UserRepository};
use crate::{AppState, middleware as guards};

const ADMIN: &[Role] = &[Role::Admin];

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(me))
        .route("/update-me", patch(update_me))
        .route("/delete-me", delete(delete_me))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::authenticate,
        ));

    let admin = Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_one).patch(update).delete(remove))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(ADMIN, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::authenticate,
        ));

    auth::router(state).merge(protected).merge(admin)
}

pub async fn me(
    Extension(user): Extension<User>,
) -> Json<DocResponse<User>> {
    Json(DocResponse::new(user))
}

#[derive(Debug, Default, Deserialize, Validate)]
struct UpdateMe {
    #[validate(length(min = 2, max = 60))]
    name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    email: Option<String>,
    #[validate(length(min = 1))]
    photo: Option<String>,
}

impl UpdateDto for UpdateMe {
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool {
        let mut set = Assignments::new(qb);

        if let Some(name) = &self.name {
            set.set("name", name.clone());
        }
        if let Some(email) = &self.email {
            set.set("email", email.to_lowercase());
        }
        if let Some(photo) = &self.photo {
            set.set("photo", photo.clone());
        }

        set.any()
    }
}

/// Profile update from a multipart form: `name`, `email` and an optional
/// `photo` image, resized to a 500x500 square.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut form: Multipart,
) -> Result<Json<DocResponse<User>>> {
    let mut changes = UpdateMe::default();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|err| ServerError::ParsingForm(Box::new(err)))?
    {
        match field.name().unwrap_or_default() {
            "name" => {
                changes.name = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| ServerError::ParsingForm(Box::new(err)))?,
                );
            },
            "email" => {
                changes.email = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| ServerError::ParsingForm(Box::new(err)))?,
                );
            },
            "photo" => {
                let buffer = field
                    .bytes()
                    .await
                    .map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
                let filename = upload::process_and_save(
                    &state.config.uploads.public_dir,
                    ImageKind::UserPhoto,
                    upload::user_photo_filename(user.id),
                    buffer.to_vec(),
                )
                .await?;
                changes.photo = Some(filename);
            },
            "password" | "password_confirm" => {
                return Err(ServerError::BadRequest(
                    "This route is not for password updates. \
                     Please use /update-my-password."
                        .to_owned(),
                ));
            },
            _ => {},
        }
    }

    changes.validate()?;
    let user =
        resource::update::<User, _>(&state.db.postgres, user.id, &changes)
            .await?;

    Ok(Json(DocResponse::new(user)))
}

/// Soft delete: the account stays on record but leaves every read scope.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<StatusCode> {
    UserRepository::new(state.db.postgres.clone())
        .deactivate(user.id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list(
    State(state): State<AppState>,
    Options(options): Options,
) -> Result<Json<ListResponse>> {
    let users =
        resource::find_all::<User>(&state.db.postgres, &options, None)
            .await?;
    Ok(Json(ListResponse::new(&users, &options)?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocResponse<User>>> {
    let id = parse_id("id", id)?;
    let user = resource::find_by_id::<User>(&state.db.postgres, id).await?;
    Ok(Json(DocResponse::new(user)))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct AdminUpdateUser {
    #[validate(length(min = 2, max = 60))]
    pub name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    pub role: Option<Role>,
}

impl UpdateDto for AdminUpdateUser {
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool {
        let mut set = Assignments::new(qb);

        if let Some(name) = &self.name {
            set.set("name", name.clone());
        }
        if let Some(email) = &self.email {
            set.set("email", email.to_lowercase());
        }
        if let Some(role) = self.role {
            set.set("role", role);
        }

        set.any()
    }
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<AdminUpdateUser>,
) -> Result<Json<DocResponse<User>>> {
    let id = parse_id("id", id)?;
    let user =
        resource::update::<User, _>(&state.db.postgres, id, &body).await?;
    Ok(Json(DocResponse::new(user)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_id("id", id)?;
    resource::delete_by_id::<User>(&state.db.postgres, id).await?;
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

    #[sqlx::test]
    async fn test_me_returns_profile(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Monica",
            "monica@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap();

        let response = make_request(
            app_router,
            Method::GET,
            "/api/v1/users/me",
            Some(token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["data"]["email"], "monica@trailbound.test");
        assert!(body["data"].get("password").is_none());
    }

    #[sqlx::test]
    async fn test_admin_routes_reject_plain_users(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Monica",
            "monica@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap();

        let response = make_request(
            app_router,
            Method::GET,
            "/api/v1/users/",
            Some(token),
            String::new(),
        )
        .await;
        // Authenticated but short on privileges: 403, not 401.
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    async fn test_delete_me_soft_deletes(pool: Pool<Postgres>) {
        let state = router::state(pool.clone());
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Monica",
            "monica@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap();

        let response = make_request(
            app_router.clone(),
            Method::DELETE,
            "/api/v1/users/delete-me",
            Some(token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // The row survives, deactivated.
        let (active,): (bool,) = sqlx::query_as(
            "SELECT active FROM users WHERE email = $1",
        )
        .bind("monica@trailbound.test")
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(!active);

        // And the token no longer resolves to an account.
        let response = make_request(
            app_router,
            Method::GET,
            "/api/v1/users/me",
            Some(token),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    async fn test_update_me_rejects_password_fields(pool: Pool<Postgres>) {
        let state = router::state(pool);
        let app_router = app(state);

        let body = signup_user(
            app_router.clone(),
            "Monica",
            "monica@trailbound.test",
            "pass1234word",
        )
        .await;
        let token = body["token"].as_str().unwrap().to_owned();

        let boundary = "bnd000trailbound";
        let form = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"password\"\r\n\r\n\
             sneaky\r\n\
             --{boundary}--\r\n"
        );

        use axum::body::Body;
        use axum::extract::Request;
        use axum::http::header;
        use tower::util::ServiceExt;

        let response = app_router
            .oneshot(
                Request::builder()
                    .method(Method::PATCH)
                    .uri("/api/v1/users/update-me")
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {token}"),
                    )
                    .body(Body::from(form))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
