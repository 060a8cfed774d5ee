//! Values bound to generated statements.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// One positional parameter. Every value reaching PostgreSQL goes through here;
/// nothing user-supplied is spliced into SQL text.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl SqlParam {
    /// JSON number compared against `payload->'field'`; `None` when `raw` is not numeric.
    pub fn json_number(raw: &str) -> Option<Self> {
        if let Ok(i) = raw.trim().parse::<i64>() {
            return Some(SqlParam::Json(Value::from(i)));
        }
        raw.trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| SqlParam::Json(Value::Number(n)))
    }
}

/// Bind every parameter in order.
pub fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p {
            SqlParam::Text(s) => query.bind(s.as_str()),
            SqlParam::TextArray(v) => query.bind(v.as_slice()),
            SqlParam::Json(v) => query.bind(sqlx::types::Json(v)),
            SqlParam::Timestamp(t) => query.bind(*t),
        };
    }
    query
}
