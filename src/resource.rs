//! Generic resource operations shared by every aggregate: the per-resource
//! routers compose these with their own typed create/update DTOs.

use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::query::QueryOptions;

/// A persisted aggregate the generic operations know how to fetch.
pub trait Model:
    for<'r> FromRow<'r, PgRow> + Serialize + Send + Unpin
{
    const TABLE: &'static str;
    /// Human name used in not-found messages.
    const NAME: &'static str;
    /// Columns accepted as request filters.
    const FILTERABLE: &'static [&'static str];
    /// Columns accepted in `sort=`.
    const SORTABLE: &'static [&'static str];
    /// Standing predicate every read goes through (soft deletes).
    const SCOPE: Option<&'static str> = None;
}

/// Typed insert payload: the DTO lists exactly the mutable columns, so
/// disallowed fields cannot reach the database.
pub trait InsertDto {
    /// Write `(columns) VALUES (binds)`.
    fn push_insert(&self, qb: &mut QueryBuilder<'_, Postgres>);
}

/// Typed partial-update payload.
pub trait UpdateDto {
    /// Write `col = bind` assignments. Returns false when no field is set.
    fn push_updates(&self, qb: &mut QueryBuilder<'_, Postgres>) -> bool;
}

/// Comma-handling helper for [`UpdateDto`] implementations.
pub struct Assignments<'qb, 'args> {
    qb: &'qb mut QueryBuilder<'args, Postgres>,
    any: bool,
}

impl<'qb, 'args> Assignments<'qb, 'args> {
    pub fn new(qb: &'qb mut QueryBuilder<'args, Postgres>) -> Self {
        Self { qb, any: false }
    }

    pub fn set<T>(&mut self, column: &str, value: T)
    where
        T: sqlx::Encode<'args, Postgres> + sqlx::Type<Postgres> + Send + 'args,
    {
        if self.any {
            self.qb.push(", ");
        }
        self.qb.push(column);
        self.qb.push(" = ");
        self.qb.push_bind(value);
        self.any = true;
    }

    pub fn any(&self) -> bool {
        self.any
    }
}

/// List documents, optionally pre-filtered by a parent resource (nested
/// reviews under a tour), then filter/sort/paginate from the request.
pub async fn find_all<M: Model>(
    pool: &PgPool,
    options: &QueryOptions,
    parent: Option<(&'static str, Uuid)>,
) -> Result<Vec<M>> {
    let mut qb =
        QueryBuilder::new(format!("SELECT * FROM {}", M::TABLE));

    let mut has_where = false;
    if let Some(scope) = M::SCOPE {
        qb.push(" WHERE ");
        qb.push(scope);
        has_where = true;
    }
    if let Some((column, id)) = parent {
        qb.push(if has_where { " AND " } else { " WHERE " });
        qb.push(column);
        qb.push(" = ");
        qb.push_bind(id);
        has_where = true;
    }

    options.push_filters(&mut qb, M::FILTERABLE, has_where);
    options.push_sort(&mut qb, M::SORTABLE);
    options.push_pagination(&mut qb);

    Ok(qb.build_query_as::<M>().fetch_all(pool).await?)
}

/// Fetch one document by identifier.
pub async fn find_by_id<M: Model>(pool: &PgPool, id: Uuid) -> Result<M> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT * FROM {} WHERE id = ",
        M::TABLE
    ));
    qb.push_bind(id);
    if let Some(scope) = M::SCOPE {
        qb.push(" AND ");
        qb.push(scope);
    }

    qb.build_query_as::<M>()
        .fetch_optional(pool)
        .await?
        .ok_or(ServerError::NotFound(M::NAME))
}

/// Insert a typed DTO, returning the stored document.
pub async fn insert<M: Model, D: InsertDto>(
    pool: &PgPool,
    dto: &D,
) -> Result<M> {
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} ", M::TABLE));
    dto.push_insert(&mut qb);
    qb.push(" RETURNING *");

    Ok(qb.build_query_as::<M>().fetch_one(pool).await?)
}

/// Partial update by identifier, returning the new document.
pub async fn update<M: Model, D: UpdateDto>(
    pool: &PgPool,
    id: Uuid,
    dto: &D,
) -> Result<M> {
    let mut qb = QueryBuilder::new(format!("UPDATE {} SET ", M::TABLE));
    if !dto.push_updates(&mut qb) {
        // Nothing to change; behave as a plain read so the caller still
        // gets 404 for unknown identifiers.
        return find_by_id::<M>(pool, id).await;
    }

    qb.push(" WHERE id = ");
    qb.push_bind(id);
    if let Some(scope) = M::SCOPE {
        qb.push(" AND ");
        qb.push(scope);
    }
    qb.push(" RETURNING *");

    qb.build_query_as::<M>()
        .fetch_optional(pool)
        .await?
        .ok_or(ServerError::NotFound(M::NAME))
}

/// Remove by identifier.
pub async fn delete_by_id<M: Model>(pool: &PgPool, id: Uuid) -> Result<()> {
    let mut qb = QueryBuilder::new(format!(
        "DELETE FROM {} WHERE id = ",
        M::TABLE
    ));
    qb.push_bind(id);

    let result = qb.build().execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(ServerError::NotFound(M::NAME));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignments_commas() {
        let mut qb = QueryBuilder::new("UPDATE tours SET ");
        let mut set = Assignments::new(&mut qb);
        assert!(!set.any());

        set.set("name", "Wanderer".to_owned());
        set.set("price", 497.0f64);
        assert!(set.any());
        assert_eq!(qb.sql(), "UPDATE tours SET name = $1, price = $2");
    }
}
