mod service;

pub use service::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::resource::{Assignments, InsertDto, Model, UpdateDto};

/// Booking as saved on database.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Booking {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub user_id: Uuid,
    pub price: f64,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

impl Model for Booking {
    const TABLE: &'static str = "bookings";
    const NAME: &'static str = "booking";
    const FILTERABLE: &'static [&'static str] = &["price", "paid"];
    const SORTABLE: &'static [&'static str] = &["price", "created_at"];
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBooking {
    pub tour_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 0.0))]
    pub price: f64,
    #[serde(default = "default_paid")]
    pub paid: bool,
}

fn default_paid() -> bool {
    true
}

impl InsertDto for CreateBooking {
    fn push_insert(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("(id, tour_id, user_id, price, paid) VALUES (");
        {
            let mut values = qb.separated(", ");
            values.push_bind(Uuid::new_v4());
            values.push_bind(self.tour_id);
            values.push_bind(self.user_id);
            values.push_bind(self.price);
            values.push_bind(self.paid);
        }
        qb.push(")");
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateBooking {
    #[validate(range(min = 0.0))]
    pub price: Option<f64>,
    pub paid: Option<bool>,
}

impl UpdateDto for UpdateBooking {
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool {
        let mut set = Assignments::new(qb);

        if let Some(price) = self.price {
            set.set("price", price);
        }
        if let Some(paid) = self.paid {
            set.set("paid", paid);
        }

        set.any()
    }
}
