use uuid::Uuid;

use super::{Booking, CreateBooking};
use crate::database::Database;
use crate::error::ServerError;
use crate::resource;
use crate::user::User;

#[derive(Clone)]
pub struct BookingService {
    db: Database,
}

impl BookingService {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a booking from a completed checkout session. The checkout
    /// provider only knows the customer's email, so the account is looked
    /// up again here. Amounts come in as cents.
    pub async fn record_checkout(
        &self,
        tour_id: Uuid,
        customer_email: &str,
        amount_total: i64,
    ) -> Result<Booking, ServerError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email = $1 AND active = TRUE",
        )
        .bind(customer_email.to_lowercase())
        .fetch_optional(&self.db.postgres)
        .await?
        .ok_or(ServerError::NotFound("user"))?;

        let booking = CreateBooking {
            tour_id,
            user_id: user.id,
            price: amount_total as f64 / 100.0,
            paid: true,
        };

        resource::insert::<Booking, _>(&self.db.postgres, &booking).await
    }

    pub async fn has_booked(
        &self,
        user_id: Uuid,
        tour_id: Uuid,
    ) -> Result<bool, ServerError> {
        let exists: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM bookings WHERE user_id = $1 AND tour_id = $2 \
             LIMIT 1",
        )
        .bind(user_id)
        .bind(tour_id)
        .fetch_optional(&self.db.postgres)
        .await?;

        Ok(exists.is_some())
    }
}
