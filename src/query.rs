//! Request-parameter query building: filter, sort, field selection and
//! pagination applied over a [`sqlx::QueryBuilder`] in that fixed order.

use sqlx::{Postgres, QueryBuilder};

/// Keys with a meaning of their own, never treated as filters.
const RESERVED: &[&str] = &["page", "sort", "limit", "fields"];

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 10;
pub const DEFAULT_SORT: &str = "created_at";

/// Comparison operators accepted inside bracketed keys, e.g. `price[gte]=500`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "gt" => Some(Op::Gt),
            "gte" => Some(Op::Gte),
            "lt" => Some(Op::Lt),
            "lte" => Some(Op::Lte),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }
}

/// A filter value, typed from its textual form so comparisons bind with the
/// column's natural type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl From<&str> for Value {
    fn from(raw: &str) -> Self {
        if let Ok(number) = raw.parse::<f64>() {
            Value::Number(number)
        } else if let Ok(boolean) = raw.parse::<bool>() {
            Value::Bool(boolean)
        } else {
            Value::Text(raw.to_owned())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Parsed request parameters, ready to be applied to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub filters: Vec<Filter>,
    pub sort: Vec<(String, Direction)>,
    pub fields: Option<Vec<String>>,
    pub page: i64,
    pub limit: i64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: Vec::new(),
            fields: None,
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl QueryOptions {
    /// Parse a raw URL query string. Unknown bracket operators are dropped;
    /// non-numeric or non-positive pagination values coerce to defaults.
    pub fn from_raw(raw: &str) -> Self {
        let mut options = Self::default();

        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            match key.as_ref() {
                "page" => {
                    options.page = positive_or(&value, DEFAULT_PAGE);
                },
                "limit" => {
                    options.limit = positive_or(&value, DEFAULT_LIMIT);
                },
                "sort" => {
                    options.sort = value
                        .split(',')
                        .filter(|field| !field.is_empty())
                        .map(|field| match field.strip_prefix('-') {
                            Some(field) => {
                                (field.to_owned(), Direction::Desc)
                            },
                            None => (field.to_owned(), Direction::Asc),
                        })
                        .collect();
                },
                "fields" => {
                    options.fields = Some(
                        value
                            .split(',')
                            .filter(|field| !field.is_empty())
                            .map(str::to_owned)
                            .collect(),
                    );
                },
                key if RESERVED.contains(&key) => {},
                key => {
                    if let Some(filter) = parse_filter(key, &value) {
                        options.filters.push(filter);
                    }
                },
            }
        }

        options
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// Push `WHERE`/`AND` comparisons for every filter whose column is in
    /// the allow-list. Returns whether a `WHERE` clause is now present.
    pub fn push_filters(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        filterable: &[&str],
        mut has_where: bool,
    ) -> bool {
        for filter in &self.filters {
            if !filterable.contains(&filter.field.as_str()) {
                continue;
            }

            qb.push(if has_where { " AND " } else { " WHERE " });
            has_where = true;

            qb.push(filter.field.as_str());
            // Textual values compare against the column's text form so
            // enum-typed columns accept them.
            if let Value::Text(_) = filter.value {
                qb.push("::text");
            }
            qb.push(" ");
            qb.push(filter.op.sql());
            qb.push(" ");
            match &filter.value {
                Value::Number(number) => qb.push_bind(*number),
                Value::Bool(boolean) => qb.push_bind(*boolean),
                Value::Text(text) => qb.push_bind(text.clone()),
            };
        }

        has_where
    }

    /// Push `ORDER BY`, defaulting to descending creation time.
    pub fn push_sort(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        sortable: &[&str],
    ) {
        let columns: Vec<&(String, Direction)> = self
            .sort
            .iter()
            .filter(|(field, _)| sortable.contains(&field.as_str()))
            .collect();

        if columns.is_empty() {
            qb.push(format!(" ORDER BY {DEFAULT_SORT} DESC"));
            return;
        }

        qb.push(" ORDER BY ");
        for (position, (field, direction)) in columns.iter().enumerate() {
            if position > 0 {
                qb.push(", ");
            }
            qb.push(field.as_str());
            qb.push(match direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
    }

    /// Push `LIMIT`/`OFFSET` from the parsed pagination.
    pub fn push_pagination(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" LIMIT ");
        qb.push_bind(self.limit);
        qb.push(" OFFSET ");
        qb.push_bind(self.offset());
    }

    /// Field selection, applied on the serialized document: the typed row is
    /// always fetched whole, then trimmed to the requested fields.
    pub fn project(&self, mut document: serde_json::Value) -> serde_json::Value {
        if let Some(fields) = &self.fields {
            if let Some(object) = document.as_object_mut() {
                object.retain(|key, _| fields.iter().any(|field| field == key));
            }
        }

        document
    }
}

fn positive_or(raw: &str, fallback: i64) -> i64 {
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => value,
        _ => fallback,
    }
}

/// Parse `field` or `field[op]` keys into a [`Filter`].
fn parse_filter(key: &str, value: &str) -> Option<Filter> {
    let (field, op) = match key.strip_suffix(']').and_then(|k| k.split_once('['))
    {
        Some((field, keyword)) => (field, Op::parse(keyword)?),
        None => (key, Op::Eq),
    };

    if field.is_empty() {
        return None;
    }

    Some(Filter {
        field: field.to_owned(),
        op,
        value: Value::from(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_operator_rewriting() {
        let options = QueryOptions::from_raw("price[gt]=100");
        assert_eq!(
            options.filters,
            vec![Filter {
                field: "price".into(),
                op: Op::Gt,
                value: Value::Number(100.0),
            }]
        );

        let mut qb = QueryBuilder::new("SELECT * FROM tours");
        let has_where = options.push_filters(&mut qb, &["price"], false);
        assert!(has_where);
        assert_eq!(qb.sql(), "SELECT * FROM tours WHERE price > $1");
    }

    #[test]
    fn test_equality_and_reserved_keys() {
        let options = QueryOptions::from_raw(
            "difficulty=easy&page=2&sort=price&limit=3&fields=name",
        );
        assert_eq!(
            options.filters,
            vec![Filter {
                field: "difficulty".into(),
                op: Op::Eq,
                value: Value::Text("easy".into()),
            }]
        );
        assert_eq!(options.page, 2);
        assert_eq!(options.limit, 3);
    }

    #[test]
    fn test_text_values_compare_as_text() {
        let options = QueryOptions::from_raw("difficulty=easy");
        let mut qb = QueryBuilder::new("SELECT * FROM tours");
        options.push_filters(&mut qb, &["difficulty"], false);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM tours WHERE difficulty::text = $1"
        );
    }

    #[test]
    fn test_unknown_operator_is_dropped() {
        let options = QueryOptions::from_raw("price[in]=100");
        assert!(options.filters.is_empty());
    }

    #[test]
    fn test_unlisted_column_is_not_pushed() {
        let options = QueryOptions::from_raw("password=x");
        let mut qb = QueryBuilder::new("SELECT * FROM users");
        let has_where = options.push_filters(&mut qb, &["name"], false);
        assert!(!has_where);
        assert_eq!(qb.sql(), "SELECT * FROM users");
    }

    #[test]
    fn test_sort_parsing_and_default() {
        let options = QueryOptions::from_raw("sort=-ratings_average,price");
        assert_eq!(
            options.sort,
            vec![
                ("ratings_average".to_owned(), Direction::Desc),
                ("price".to_owned(), Direction::Asc),
            ]
        );

        let mut qb = QueryBuilder::new("SELECT * FROM tours");
        options.push_sort(&mut qb, &["ratings_average", "price"]);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM tours ORDER BY ratings_average DESC, price ASC"
        );

        let mut qb = QueryBuilder::new("SELECT * FROM tours");
        QueryOptions::default().push_sort(&mut qb, &["price"]);
        assert_eq!(qb.sql(), "SELECT * FROM tours ORDER BY created_at DESC");
    }

    #[test]
    fn test_pagination_defaults_and_coercion() {
        assert_eq!(QueryOptions::from_raw("").page, 1);
        assert_eq!(QueryOptions::from_raw("").limit, 10);
        assert_eq!(QueryOptions::from_raw("page=abc&limit=xyz").page, 1);
        assert_eq!(QueryOptions::from_raw("page=abc&limit=xyz").limit, 10);
        assert_eq!(QueryOptions::from_raw("page=0&limit=-2").page, 1);
        assert_eq!(QueryOptions::from_raw("page=0&limit=-2").limit, 10);
    }

    #[test]
    fn test_offset_for_second_page() {
        // page=2, limit=5 over a 12-item collection must return items 6-10.
        let options = QueryOptions::from_raw("page=2&limit=5");
        assert_eq!(options.offset(), 5);
        assert_eq!(options.limit, 5);
    }

    #[test]
    fn test_projection_retains_requested_fields() {
        let options = QueryOptions::from_raw("fields=name,price");
        let document = serde_json::json!({
            "name": "The Forest Hiker",
            "price": 497.0,
            "summary": "quiet walk",
        });

        let trimmed = options.project(document);
        assert_eq!(
            trimmed,
            serde_json::json!({ "name": "The Forest Hiker", "price": 497.0 })
        );

        // Without `fields`, the document passes through untouched.
        let document = serde_json::json!({ "name": "x", "price": 1.0 });
        assert_eq!(
            QueryOptions::default().project(document.clone()),
            document
        );
    }
}
