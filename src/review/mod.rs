mod service;

pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::resource::{Assignments, InsertDto, Model, UpdateDto};

/// Review as saved on database.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Model for Review {
    const TABLE: &'static str = "reviews";
    const NAME: &'static str = "review";
    const FILTERABLE: &'static [&'static str] = &["rating"];
    const SORTABLE: &'static [&'static str] = &["rating", "created_at"];
}

/// Review joined with its author, for the tour detail page.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReviewWithAuthor {
    pub id: Uuid,
    pub review: String,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
    pub author_name: String,
    pub author_photo: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateReview {
    #[validate(length(min = 1))]
    pub review: String,
    #[validate(range(min = 1.0, max = 5.0))]
    pub rating: f64,
    /// Taken from the nested route when omitted.
    pub tour_id: Option<Uuid>,
}

/// Fully resolved insert payload, author and tour fixed by the caller.
#[derive(Debug)]
pub struct NewReview {
    pub review: String,
    pub rating: f64,
    pub tour_id: Uuid,
    pub user_id: Uuid,
}

impl InsertDto for NewReview {
    fn push_insert(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("(id, review, rating, tour_id, user_id) VALUES (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(Uuid::new_v4());
            values.push_bind(self.review.clone());
            values.push_bind(self.rating);
            values.push_bind(self.tour_id);
            values.push_bind(self.user_id);
        }
        qb.push(")");
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateReview {
    #[validate(length(min = 1))]
    pub review: Option<String>,
    #[validate(range(min = 1.0, max = 5.0))]
    pub rating: Option<f64>,
}

impl UpdateDto for UpdateReview {
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool {
        let mut set = Assignments::new(qb);

        if let Some(review) = &self.review {
            set.set("review", review.clone());
        }
        if let Some(rating) = self.rating {
            set.set("rating", rating);
        }

        set.any()
    }
}
