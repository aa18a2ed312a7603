mod repository;

pub use repository::*;

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::resource::{Assignments, InsertDto, Model, UpdateDto};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "tour_difficulty", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

/// GeoJSON-style point embedded on a tour.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// `[longitude, latitude]`.
    pub coordinates: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Day of the itinerary this stop belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
}

/// Tour as saved on database.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Tour {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub price: f64,
    pub summary: String,
    pub description: Option<String>,
    pub difficulty: Difficulty,
    pub max_group_size: i32,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub image_cover: String,
    pub images: Vec<String>,
    pub start_dates: Vec<DateTime<Utc>>,
    #[sqlx(json(nullable))]
    pub start_location: Option<Location>,
    #[sqlx(json)]
    pub locations: Vec<Location>,
    pub created_at: DateTime<Utc>,
}

impl Model for Tour {
    const TABLE: &'static str = "tours";
    const NAME: &'static str = "tour";
    const FILTERABLE: &'static [&'static str] = &[
        "name",
        "slug",
        "price",
        "difficulty",
        "max_group_size",
        "ratings_average",
        "ratings_quantity",
    ];
    const SORTABLE: &'static [&'static str] = &[
        "name",
        "price",
        "ratings_average",
        "ratings_quantity",
        "max_group_size",
        "created_at",
    ];
}

/// URL-safe slug derived from the tour name.
pub fn slugify(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM
        .get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static pattern"));

    re.replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_owned()
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTour {
    #[validate(length(min = 3, max = 60))]
    pub name: String,
    #[validate(range(min = 1.0, message = "Price must be positive."))]
    pub price: f64,
    #[validate(length(min = 1))]
    pub summary: String,
    pub description: Option<String>,
    pub difficulty: Difficulty,
    #[validate(range(min = 1))]
    pub max_group_size: i32,
    #[serde(default)]
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub start_dates: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub start_location: Option<Location>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

impl InsertDto for CreateTour {
    fn push_insert(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(
            "(id, name, slug, price, summary, description, difficulty, \
             max_group_size, image_cover, images, start_dates, \
             start_location, locations) VALUES (",
        );
        {
            let mut values = qb.separated(", ");
            values.push_bind(Uuid::new_v4());
            values.push_bind(self.name.clone());
            values.push_bind(slugify(&self.name));
            values.push_bind(self.price);
            values.push_bind(self.summary.clone());
            values.push_bind(self.description.clone());
            values.push_bind(self.difficulty);
            values.push_bind(self.max_group_size);
            values.push_bind(
                self.image_cover
                    .clone()
                    .unwrap_or_else(|| "default-cover.jpg".to_owned()),
            );
            values.push_bind(self.images.clone());
            values.push_bind(self.start_dates.clone());
            values.push_bind(self.start_location.clone().map(Json));
            values.push_bind(Json(self.locations.clone()));
        }
        qb.push(")");
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTour {
    #[validate(length(min = 3, max = 60))]
    pub name: Option<String>,
    #[validate(range(min = 1.0, message = "Price must be positive."))]
    pub price: Option<f64>,
    #[validate(length(min = 1))]
    pub summary: Option<String>,
    pub description: Option<String>,
    pub difficulty: Option<Difficulty>,
    #[validate(range(min = 1))]
    pub max_group_size: Option<i32>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub start_dates: Option<Vec<DateTime<Utc>>>,
    pub start_location: Option<Location>,
    pub locations: Option<Vec<Location>>,
}

impl UpdateDto for UpdateTour {
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool {
        let mut set = Assignments::new(qb);

        if let Some(name) = &self.name {
            set.set("name", name.clone());
            set.set("slug", slugify(name));
        }
        if let Some(price) = self.price {
            set.set("price", price);
        }
        if let Some(summary) = &self.summary {
            set.set("summary", summary.clone());
        }
        if let Some(description) = &self.description {
            set.set("description", description.clone());
        }
        if let Some(difficulty) = self.difficulty {
            set.set("difficulty", difficulty);
        }
        if let Some(max_group_size) = self.max_group_size {
            set.set("max_group_size", max_group_size);
        }
        if let Some(image_cover) = &self.image_cover {
            set.set("image_cover", image_cover.clone());
        }
        if let Some(images) = &self.images {
            set.set("images", images.clone());
        }
        if let Some(start_dates) = &self.start_dates {
            set.set("start_dates", start_dates.clone());
        }
        if let Some(start_location) = &self.start_location {
            set.set("start_location", Json(start_location.clone()));
        }
        if let Some(locations) = &self.locations {
            set.set("locations", Json(locations.clone()));
        }

        set.any()
    }
}
