//! Tour catalogue routes: CRUD, aggregates and geospatial lookups.

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router, middleware};
use serde::Serialize;

use super::{DocResponse, ListResponse, Options, ValidJson, parse_id};
use crate::error::{Result, ServerError};
use crate::query::{Direction, QueryOptions};
use crate::resource;
use crate::tour::{
    CreateTour, MonthlyPlanEntry, Tour, TourDistance, TourRepository,
    TourStats, Unit, UpdateTour,
};
use crate::upload::{self, ImageKind};
use crate::user::Role;
use crate::{AppState, middleware as guards};

const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];
const GUIDES: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
const MAX_GALLERY_IMAGES: usize = 3;

pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/", get(list))
        .route("/top-5-best-cheap", get(top_five))
        .route("/tours-statistics", get(statistics))
        .route(
            "/tours-within-radius/{distance}/center/{latlng}/unit/{unit}",
            get(within_radius),
        )
        .route("/distances/{latlng}/unit/{unit}", get(distances))
        .route("/{id}", get(get_one));

    let guides = Router::new()
        .route("/monthly-plan/{year}", get(monthly_plan))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(GUIDES, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::authenticate,
        ));

    let staff = Router::new()
        .route("/", post(create))
        .route("/{id}", patch(update).delete(remove))
        .route("/{id}/images", patch(upload_images))
        .route_layer(middleware::from_fn(|req, next| {
            guards::restrict_to(STAFF, req, next)
        }))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            guards::authenticate,
        ));

    public
        .merge(guides)
        .merge(staff)
        .nest("/{id}/reviews/", super::reviews::nested_router(state))
}

fn repository(state: &AppState) -> TourRepository {
    TourRepository::new(state.db.clone())
}

pub async fn list(
    State(state): State<AppState>,
    Options(options): Options,
) -> Result<Json<ListResponse>> {
    let tours =
        resource::find_all::<Tour>(&state.db.postgres, &options, None)
            .await?;
    Ok(Json(ListResponse::new(&tours, &options)?))
}

/// Preset listing: the five best-rated tours, cheapest first among equals.
pub async fn top_five(
    State(state): State<AppState>,
) -> Result<Json<ListResponse>> {
    let options = QueryOptions {
        limit: 5,
        sort: vec![
            ("ratings_average".to_owned(), Direction::Desc),
            ("price".to_owned(), Direction::Asc),
        ],
        fields: Some(
            ["name", "price", "ratings_average", "summary", "difficulty"]
                .map(str::to_owned)
                .to_vec(),
        ),
        ..QueryOptions::default()
    };

    let tours =
        resource::find_all::<Tour>(&state.db.postgres, &options, None)
            .await?;
    Ok(Json(ListResponse::new(&tours, &options)?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocResponse<Tour>>> {
    let id = parse_id("id", id)?;
    let tour = resource::find_by_id::<Tour>(&state.db.postgres, id).await?;
    Ok(Json(DocResponse::new(tour)))
}

pub async fn create(
    State(state): State<AppState>,
    ValidJson(body): ValidJson<CreateTour>,
) -> Result<(StatusCode, Json<DocResponse<Tour>>)> {
    let tour = resource::insert::<Tour, _>(&state.db.postgres, &body).await?;
    Ok((StatusCode::CREATED, Json(DocResponse::new(tour))))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ValidJson(body): ValidJson<UpdateTour>,
) -> Result<Json<DocResponse<Tour>>> {
    let id = parse_id("id", id)?;
    let tour =
        resource::update::<Tour, _>(&state.db.postgres, id, &body).await?;
    Ok(Json(DocResponse::new(tour)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_id("id", id)?;
    resource::delete_by_id::<Tour>(&state.db.postgres, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Multipart image upload for a tour: one `image_cover` and up to three
/// `images` gallery pictures, all stored as 2000x1333 JPEG.
pub async fn upload_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut form: Multipart,
) -> Result<Json<DocResponse<Tour>>> {
    let id = parse_id("id", id)?;
    // 404 before any image work.
    resource::find_by_id::<Tour>(&state.db.postgres, id).await?;

    let mut cover = None;
    let mut gallery = Vec::new();

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|err| ServerError::ParsingForm(Box::new(err)))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        let buffer = field
            .bytes()
            .await
            .map_err(|err| ServerError::ParsingForm(Box::new(err)))?;

        match name.as_str() {
            "image_cover" => {
                cover = Some(
                    upload::process_and_save(
                        &state.config.uploads.public_dir,
                        ImageKind::TourImage,
                        upload::tour_cover_filename(id),
                        buffer.to_vec(),
                    )
                    .await?,
                );
            },
            "images" => {
                if gallery.len() == MAX_GALLERY_IMAGES {
                    return Err(ServerError::BadRequest(format!(
                        "a tour carries at most {MAX_GALLERY_IMAGES} \
                         gallery images"
                    )));
                }
                gallery.push(
                    upload::process_and_save(
                        &state.config.uploads.public_dir,
                        ImageKind::TourImage,
                        upload::tour_image_filename(id, gallery.len()),
                        buffer.to_vec(),
                    )
                    .await?,
                );
            },
            _ => {},
        }
    }

    let gallery = (!gallery.is_empty()).then_some(gallery);
    let tour = repository(&state).set_images(id, cover, gallery).await?;
    Ok(Json(DocResponse::new(tour)))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    status: &'static str,
    data: Vec<TourStats>,
}

pub async fn statistics(
    State(state): State<AppState>,
) -> Result<Json<StatsResponse>> {
    let stats = repository(&state).stats().await?;
    Ok(Json(StatsResponse {
        status: super::STATUS_SUCCESS,
        data: stats,
    }))
}

pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> Result<Json<DocResponse<Vec<MonthlyPlanEntry>>>> {
    let year: i32 = year.parse().map_err(|_| ServerError::Cast {
        field: "year".to_owned(),
        value: year,
    })?;

    let plan = repository(&state).monthly_plan(year).await?;
    Ok(Json(DocResponse::new(plan)))
}

/// `{latlng}` comes in as `lat,lng`; locations store `[lng, lat]`.
fn parse_center(latlng: &str) -> Result<[f64; 2]> {
    let malformed = || {
        ServerError::BadRequest(
            "Please provide latitude and longitude in the format lat,lng."
                .to_owned(),
        )
    };

    let (lat, lng) = latlng.split_once(',').ok_or_else(malformed)?;
    let lat: f64 = lat.trim().parse().map_err(|_| malformed())?;
    let lng: f64 = lng.trim().parse().map_err(|_| malformed())?;

    Ok([lng, lat])
}

pub async fn within_radius(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> Result<Json<DocResponse<Vec<Tour>>>> {
    let radius: f64 = distance.parse().map_err(|_| ServerError::Cast {
        field: "distance".to_owned(),
        value: distance,
    })?;
    let center = parse_center(&latlng)?;
    let unit = Unit::parse(&unit)?;

    let tours = repository(&state).find_within(center, radius, unit).await?;
    Ok(Json(DocResponse::new(tours)))
}

pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> Result<Json<DocResponse<Vec<TourDistance>>>> {
    let center = parse_center(&latlng)?;
    let unit = Unit::parse(&unit)?;

    let tours = repository(&state).distances_from(center, unit).await?;
    Ok(Json(DocResponse::new(tours)))
}
