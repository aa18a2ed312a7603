use uuid::Uuid;

use super::{NewReview, Review, ReviewWithAuthor, UpdateReview};
use crate::database::Database;
use crate::error::ServerError;
use crate::resource;

/// Review writes go through here so tour rating aggregates stay in sync.
#[derive(Clone)]
pub struct ReviewService {
    db: Database,
}

impl ReviewService {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, new: NewReview) -> Result<Review, ServerError> {
        let review =
            resource::insert::<Review, _>(&self.db.postgres, &new).await?;
        self.recompute_ratings(review.tour_id).await?;
        Ok(review)
    }

    pub async fn update(
        &self,
        id: Uuid,
        changes: &UpdateReview,
    ) -> Result<Review, ServerError> {
        let review =
            resource::update::<Review, _>(&self.db.postgres, id, changes)
                .await?;
        self.recompute_ratings(review.tour_id).await?;
        Ok(review)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServerError> {
        let review =
            resource::find_by_id::<Review>(&self.db.postgres, id).await?;
        resource::delete_by_id::<Review>(&self.db.postgres, id).await?;
        self.recompute_ratings(review.tour_id).await?;
        Ok(())
    }

    pub async fn find_for_tour(
        &self,
        tour_id: Uuid,
    ) -> Result<Vec<ReviewWithAuthor>, ServerError> {
        sqlx::query_as::<_, ReviewWithAuthor>(
            "SELECT reviews.id, reviews.review, reviews.rating, \
                    reviews.created_at, \
                    users.name AS author_name, users.photo AS author_photo \
             FROM reviews JOIN users ON users.id = reviews.user_id \
             WHERE reviews.tour_id = $1 \
             ORDER BY reviews.created_at DESC",
        )
        .bind(tour_id)
        .fetch_all(&self.db.postgres)
        .await
        .map_err(ServerError::from)
    }

    /// Refresh the tour's rating count and mean from its current reviews.
    /// A tour without reviews falls back to the default average.
    async fn recompute_ratings(
        &self,
        tour_id: Uuid,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "UPDATE tours \
             SET ratings_quantity = agg.quantity, \
                 ratings_average = agg.average \
             FROM (SELECT COUNT(*)::INT AS quantity, \
                          COALESCE(AVG(rating), 4.5) AS average \
                   FROM reviews WHERE tour_id = $1) AS agg \
             WHERE tours.id = $1",
        )
        .bind(tour_id)
        .execute(&self.db.postgres)
        .await?;

        Ok(())
    }
}
