use chrono::{TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Tour;
use crate::database::Database;
use crate::error::ServerError;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_MILE: f64 = 1.609344;

/// Distance unit accepted by the geospatial routes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Kilometers,
    Miles,
}

impl Unit {
    pub fn parse(raw: &str) -> Result<Self, ServerError> {
        match raw {
            "km" => Ok(Unit::Kilometers),
            "mi" => Ok(Unit::Miles),
            _ => Err(ServerError::BadRequest(
                "Unit must be either 'km' or 'mi'.".to_owned(),
            )),
        }
    }

    fn from_km(self, km: f64) -> f64 {
        match self {
            Unit::Kilometers => km,
            Unit::Miles => km / KM_PER_MILE,
        }
    }
}

/// Great-circle distance between two `[longitude, latitude]` points.
fn haversine_km(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lng1, lat1) = (a[0].to_radians(), a[1].to_radians());
    let (lng2, lat2) = (b[0].to_radians(), b[1].to_radians());

    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;

    let h = (dlat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Per-difficulty aggregates over well-rated tours.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TourStats {
    pub difficulty: super::Difficulty,
    pub num_tours: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Tour starts grouped by month for one year.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthlyPlanEntry {
    pub month: i32,
    pub num_tour_starts: i64,
    pub tours: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TourDistance {
    pub id: Uuid,
    pub name: String,
    pub distance: f64,
}

#[derive(Clone)]
pub struct TourRepository {
    db: Database,
}

impl TourRepository {
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<Tour>, ServerError> {
        sqlx::query_as::<_, Tour>("SELECT * FROM tours WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.db.postgres)
            .await
            .map_err(ServerError::from)
    }

    /// Tours bought by a user, most recent booking first.
    pub async fn find_booked_by(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Tour>, ServerError> {
        sqlx::query_as::<_, Tour>(
            "SELECT tours.* FROM tours \
             JOIN bookings ON bookings.tour_id = tours.id \
             WHERE bookings.user_id = $1 \
             ORDER BY bookings.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db.postgres)
        .await
        .map_err(ServerError::from)
    }

    pub async fn stats(&self) -> Result<Vec<TourStats>, ServerError> {
        sqlx::query_as::<_, TourStats>(
            "SELECT difficulty, \
                    COUNT(*) AS num_tours, \
                    COALESCE(SUM(ratings_quantity), 0)::BIGINT AS num_ratings, \
                    AVG(ratings_average) AS avg_rating, \
                    AVG(price) AS avg_price, \
                    MIN(price) AS min_price, \
                    MAX(price) AS max_price \
             FROM tours \
             WHERE ratings_average >= 4.5 \
             GROUP BY difficulty \
             ORDER BY avg_price",
        )
        .fetch_all(&self.db.postgres)
        .await
        .map_err(ServerError::from)
    }

    /// Busiest months of a year, derived from every scheduled start date.
    pub async fn monthly_plan(
        &self,
        year: i32,
    ) -> Result<Vec<MonthlyPlanEntry>, ServerError> {
        let from = Utc
            .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| {
                ServerError::BadRequest("Invalid year.".to_owned())
            })?;
        let to = Utc
            .with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| {
                ServerError::BadRequest("Invalid year.".to_owned())
            })?;

        sqlx::query_as::<_, MonthlyPlanEntry>(
            "SELECT EXTRACT(MONTH FROM start_date)::INT AS month, \
                    COUNT(*) AS num_tour_starts, \
                    ARRAY_AGG(name) AS tours \
             FROM tours, UNNEST(start_dates) AS start_date \
             WHERE start_date >= $1 AND start_date < $2 \
             GROUP BY month \
             ORDER BY num_tour_starts DESC, month",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.db.postgres)
        .await
        .map_err(ServerError::from)
    }

    /// Tours whose starting point lies within `radius` of `center`.
    pub async fn find_within(
        &self,
        center: [f64; 2],
        radius: f64,
        unit: Unit,
    ) -> Result<Vec<Tour>, ServerError> {
        let located = self.find_located().await?;
        let radius_km = match unit {
            Unit::Kilometers => radius,
            Unit::Miles => radius * KM_PER_MILE,
        };

        Ok(located
            .into_iter()
            .filter(|tour| {
                tour.start_location.as_ref().is_some_and(|location| {
                    haversine_km(location.coordinates, center) <= radius_km
                })
            })
            .collect())
    }

    /// Distance from `center` to every located tour, closest first.
    pub async fn distances_from(
        &self,
        center: [f64; 2],
        unit: Unit,
    ) -> Result<Vec<TourDistance>, ServerError> {
        let located = self.find_located().await?;

        let mut distances: Vec<TourDistance> = located
            .into_iter()
            .filter_map(|tour| {
                let location = tour.start_location.as_ref()?;
                Some(TourDistance {
                    id: tour.id,
                    name: tour.name,
                    distance: unit
                        .from_km(haversine_km(location.coordinates, center)),
                })
            })
            .collect();

        distances.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(distances)
    }

    async fn find_located(&self) -> Result<Vec<Tour>, ServerError> {
        sqlx::query_as::<_, Tour>(
            "SELECT * FROM tours WHERE start_location IS NOT NULL",
        )
        .fetch_all(&self.db.postgres)
        .await
        .map_err(ServerError::from)
    }

    pub async fn set_images(
        &self,
        id: Uuid,
        cover: Option<String>,
        images: Option<Vec<String>>,
    ) -> Result<Tour, ServerError> {
        sqlx::query_as::<_, Tour>(
            "UPDATE tours \
             SET image_cover = COALESCE($2, image_cover), \
                 images = COALESCE($3, images) \
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(cover)
        .bind(images)
        .fetch_optional(&self.db.postgres)
        .await?
        .ok_or(ServerError::NotFound("tour"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Distance from Los Angeles to San Francisco, roughly 559 km.
    #[test]
    fn test_haversine_known_distance() {
        let los_angeles = [-118.2437, 34.0522];
        let san_francisco = [-122.4194, 37.7749];

        let km = haversine_km(los_angeles, san_francisco);
        assert!((km - 559.0).abs() < 5.0, "got {km} km");
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        let point = [7.2620, 43.7102];
        assert!(haversine_km(point, point) < f64::EPSILON);
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!(Unit::parse("km").unwrap(), Unit::Kilometers);
        assert_eq!(Unit::parse("mi").unwrap(), Unit::Miles);
        assert!(Unit::parse("ft").is_err());
    }

    #[test]
    fn test_unit_conversion() {
        assert!((Unit::Miles.from_km(KM_PER_MILE) - 1.0).abs() < 1e-9);
        assert!((Unit::Kilometers.from_km(5.0) - 5.0).abs() < 1e-9);
    }
}
