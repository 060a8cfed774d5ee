//! Builds parameterized statements against JSONB document tables
//! (`id`, `payload`, `created_at`, `updated_at`, `deleted_at`).

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::params::SqlParam;
use crate::error::StoreError;
use crate::query::{QueryDescriptor, SortDirection};

const LIVE: &str = "deleted_at IS NULL";

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("valid identifier regex"))
}

/// Field names end up inside SQL string literals, so only plain identifiers pass.
pub fn check_identifier(name: &str) -> Result<&str, StoreError> {
    if identifier_re().is_match(name) {
        Ok(name)
    } else {
        Err(StoreError::Backend(format!("invalid field name '{}'", name)))
    }
}

/// Sort, cursor and projection names that fail the identifier check are dropped.
fn valid(name: &str) -> bool {
    let ok = identifier_re().is_match(name);
    if !ok {
        tracing::debug!(field = %name, "dropping invalid field name");
    }
    ok
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl QueryBuf {
    fn push_param(&mut self, v: SqlParam) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

fn text_of(field: &str) -> String {
    format!("payload->>'{}'", field)
}

fn json_of(field: &str) -> String {
    format!("payload->'{}'", field)
}

fn like_pattern(v: &str) -> String {
    let escaped = v.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

/// WHERE conditions shared by SELECT and COUNT; pagination is not applied.
fn push_predicates(q: &mut QueryBuf, query: &QueryDescriptor) -> Result<Vec<String>, StoreError> {
    let mut conds = vec![LIVE.to_string()];

    let mut filter_conds = Vec::new();
    for (field, values) in &query.filters {
        let field = check_identifier(field)?;
        if query.fuzzy {
            let patterns = values.iter().map(|v| like_pattern(v)).collect();
            let n = q.push_param(SqlParam::TextArray(patterns));
            filter_conds.push(format!("{} ILIKE ANY(${})", text_of(field), n));
        } else {
            let n = q.push_param(SqlParam::TextArray(values.clone()));
            filter_conds.push(format!("{} = ANY(${})", text_of(field), n));
        }
    }
    if !filter_conds.is_empty() {
        let joiner = if query.or { " OR " } else { " AND " };
        conds.push(format!("({})", filter_conds.join(joiner)));
    }

    for (field, values) in &query.excludes {
        let field = check_identifier(field)?;
        let n = q.push_param(SqlParam::TextArray(values.clone()));
        conds.push(format!("COALESCE({}, '') <> ALL(${})", text_of(field), n));
    }

    if let Some(range) = &query.time_range {
        let column = check_identifier(&range.column)?;
        for (bound, op) in [(&range.start, ">="), (&range.end, "<=")] {
            let Some(raw) = bound else { continue };
            match DateTime::parse_from_rfc3339(raw) {
                Ok(t) => {
                    let n = q.push_param(SqlParam::Timestamp(t.with_timezone(&Utc)));
                    conds.push(format!("({})::timestamptz {} ${}", text_of(column), op, n));
                }
                Err(_) => {
                    let n = q.push_param(SqlParam::Text(raw.clone()));
                    conds.push(format!("{} {} ${}", text_of(column), op, n));
                }
            }
        }
    }

    if let Some(raw) = &query.raw_predicate {
        conds.push(format!("({})", raw));
    }
    Ok(conds)
}

fn projection(select: &[String]) -> String {
    if !select.iter().any(|f| valid(f)) {
        return "payload".to_string();
    }
    let mut pairs = vec!["'id', payload->'id'".to_string()];
    for field in select.iter().filter(|f| valid(f)) {
        if field != "id" {
            pairs.push(format!("'{}', {}", field, json_of(field)));
        }
    }
    format!("jsonb_build_object({}) AS payload", pairs.join(", "))
}

/// SELECT honoring predicates, sort, cursor or offset pagination and projection.
/// Backward cursor pages come back nearest-first.
pub fn select(table: &str, query: &QueryDescriptor) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let mut conds = push_predicates(&mut q, query)?;
    let size = query.pagination.size();

    let order = match query.pagination.cursor() {
        Some(cursor) => {
            let fields: Vec<&str> = cursor
                .fields
                .iter()
                .map(String::as_str)
                .filter(|f| valid(f))
                .collect();
            let first = fields.first().copied().unwrap_or("id");
            // Numeric fields compare as jsonb numbers, everything else as text.
            let numeric = cursor.numeric && cursor.fields.first().map(String::as_str) == Some(first);
            let (param, key) = match SqlParam::json_number(&cursor.value) {
                Some(number) if numeric => (number, json_of(first)),
                _ => (SqlParam::Text(cursor.value.clone()), text_of(first)),
            };
            let n = q.push_param(param);
            let (op, dir) = if cursor.next { (">", "ASC") } else { ("<", "DESC") };
            conds.push(format!("{} {} ${}", key, op, n));
            let mut keys = vec![format!("{} {}", key, dir)];
            keys.extend(fields.iter().skip(1).map(|f| format!("{} {}", json_of(f), dir)));
            format!(" ORDER BY {}", keys.join(", "))
        }
        None => {
            let keys: Vec<String> = query
                .sort()
                .into_iter()
                .filter(|c| valid(&c.field))
                .map(|c| {
                    let dir = match c.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{} {}", json_of(&c.field), dir)
                })
                .collect();
            if keys.is_empty() {
                " ORDER BY created_at, id".to_string()
            } else {
                format!(" ORDER BY {}", keys.join(", "))
            }
        }
    };

    let offset = match query.pagination.cursor() {
        Some(_) => String::new(),
        None if query.pagination.offset() > 0 => format!(" OFFSET {}", query.pagination.offset()),
        None => String::new(),
    };

    q.sql = format!(
        "SELECT {} FROM {} WHERE {}{} LIMIT {}{}",
        projection(&query.select),
        table,
        conds.join(" AND "),
        order,
        size,
        offset
    );
    Ok(q)
}

pub fn select_by_id(table: &str, id: &str, select: &[String]) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let n = q.push_param(SqlParam::Text(id.to_string()));
    q.sql = format!(
        "SELECT {} FROM {} WHERE id = ${} AND {}",
        projection(select),
        table,
        n,
        LIVE
    );
    Ok(q)
}

pub fn count(table: &str, query: &QueryDescriptor) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::default();
    let conds = push_predicates(&mut q, query)?;
    q.sql = format!("SELECT COUNT(*) AS total FROM {} WHERE {}", table, conds.join(" AND "));
    Ok(q)
}

pub fn insert(
    table: &str,
    id: &str,
    payload: Value,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
) -> QueryBuf {
    let mut q = QueryBuf::default();
    let id_n = q.push_param(SqlParam::Text(id.to_string()));
    let payload_n = q.push_param(SqlParam::Json(payload));
    let created = stamp(&mut q, created_at);
    let updated = stamp(&mut q, updated_at);
    q.sql = format!(
        "INSERT INTO {} (id, payload, created_at, updated_at) VALUES (${}, ${}, {}, {})",
        table, id_n, payload_n, created, updated
    );
    q
}

/// Replaces the whole document of a live row.
pub fn update(table: &str, id: &str, payload: Value, updated_at: Option<DateTime<Utc>>) -> QueryBuf {
    let mut q = QueryBuf::default();
    let payload_n = q.push_param(SqlParam::Json(payload));
    let updated = stamp(&mut q, updated_at);
    let id_n = q.push_param(SqlParam::Text(id.to_string()));
    q.sql = format!(
        "UPDATE {} SET payload = ${}, updated_at = {} WHERE id = ${} AND {}",
        table, payload_n, updated, id_n, LIVE
    );
    q
}

pub fn soft_delete(table: &str, ids: &[String]) -> QueryBuf {
    let mut q = QueryBuf::default();
    let n = q.push_param(SqlParam::TextArray(ids.to_vec()));
    q.sql = format!(
        "UPDATE {} SET deleted_at = NOW() WHERE id = ANY(${}) AND {}",
        table, n, LIVE
    );
    q
}

pub fn purge(table: &str, ids: &[String]) -> QueryBuf {
    let mut q = QueryBuf::default();
    let n = q.push_param(SqlParam::TextArray(ids.to_vec()));
    q.sql = format!("DELETE FROM {} WHERE id = ANY(${})", table, n);
    q
}

fn stamp(q: &mut QueryBuf, at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(t) => format!("${}", q.push_param(SqlParam::Timestamp(t))),
        None => "NOW()".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Cursor, Pagination, TimeRange};

    const T: &str = "\"lifecycle\".\"user\"";

    #[test]
    fn filters_become_any_predicates() {
        let mut query = QueryDescriptor::default();
        query.filters.insert("name".into(), vec!["a".into(), "b".into()]);
        query.filters.insert("age".into(), vec!["3".into()]);
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("(payload->>'age' = ANY($1) AND payload->>'name' = ANY($2))"));
        assert!(q.sql.contains("deleted_at IS NULL"));
        assert!(q.sql.ends_with("LIMIT 1000"));
        assert_eq!(q.params[1], SqlParam::TextArray(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn fuzzy_or_uses_ilike_and_or() {
        let mut query = QueryDescriptor {
            fuzzy: true,
            or: true,
            ..Default::default()
        };
        query.filters.insert("email".into(), vec!["50%".into()]);
        query.filters.insert("name".into(), vec!["al".into()]);
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("payload->>'email' ILIKE ANY($1) OR payload->>'name' ILIKE ANY($2)"));
        assert_eq!(q.params[0], SqlParam::TextArray(vec!["%50\\%%".into()]));
    }

    #[test]
    fn excludes_time_range_and_offset() {
        let mut query = QueryDescriptor {
            sort_by: Some("age desc,name".into()),
            pagination: Pagination::Offset { page: 3, size: 10 },
            time_range: Some(TimeRange {
                column: "created_at".into(),
                start: Some("2024-01-01T00:00:00Z".into()),
                end: None,
            }),
            ..Default::default()
        };
        query.excludes.insert("name".into(), vec!["root".into()]);
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("COALESCE(payload->>'name', '') <> ALL($1)"));
        assert!(q.sql.contains("(payload->>'created_at')::timestamptz >= $2"));
        assert!(q.sql.contains("ORDER BY payload->'age' DESC, payload->'name' ASC"));
        assert!(q.sql.ends_with("LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn backward_cursor_scans_descending() {
        let query = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "17".into(),
                fields: vec!["age".into()],
                next: false,
                size: 5,
                numeric: true,
            }),
            ..Default::default()
        };
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("payload->'age' < $1"));
        assert!(q.sql.contains("ORDER BY payload->'age' DESC LIMIT 5"));
        assert!(!q.sql.contains("OFFSET"));
        assert_eq!(q.params[0], SqlParam::Json(Value::from(17)));
    }

    #[test]
    fn numeric_looking_id_cursor_compares_as_text() {
        let query = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "1007".into(),
                fields: vec!["id".into()],
                next: true,
                size: 20,
                numeric: false,
            }),
            ..Default::default()
        };
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("payload->>'id' > $1"));
        assert!(q.sql.contains("ORDER BY payload->>'id' ASC LIMIT 20"));
        assert_eq!(q.params[0], SqlParam::Text("1007".into()));
    }

    #[test]
    fn numeric_cursor_with_text_value_falls_back_to_text() {
        let query = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "abc".into(),
                fields: vec!["age".into(), "id".into()],
                next: true,
                size: 5,
                numeric: true,
            }),
            ..Default::default()
        };
        let q = select(T, &query).unwrap();
        assert!(q.sql.contains("payload->>'age' > $1"));
        assert!(q.sql.contains("ORDER BY payload->>'age' ASC, payload->'id' ASC"));
        assert_eq!(q.params[0], SqlParam::Text("abc".into()));
    }

    #[test]
    fn projection_always_keeps_id() {
        let query = QueryDescriptor {
            select: vec!["name".into()],
            ..Default::default()
        };
        let q = select(T, &query).unwrap();
        assert!(q.sql.starts_with("SELECT jsonb_build_object('id', payload->'id', 'name', payload->'name') AS payload"));
    }

    #[test]
    fn rejects_injected_filter_names() {
        let mut query = QueryDescriptor::default();
        query.filters.insert("name' OR '1'='1".into(), vec!["x".into()]);
        assert!(matches!(select(T, &query), Err(StoreError::Backend(_))));
    }

    #[test]
    fn drops_invalid_sort_and_projection_names() {
        let query = QueryDescriptor {
            sort_by: Some("name;drop, age desc".into()),
            select: vec!["x'y".into()],
            ..Default::default()
        };
        let q = select(T, &query).unwrap();
        assert!(q.sql.starts_with("SELECT payload FROM"));
        assert!(q.sql.contains("ORDER BY payload->'age' DESC LIMIT"));
        assert!(!q.sql.contains("drop"));
    }

    #[test]
    fn count_ignores_pagination() {
        let query = QueryDescriptor {
            pagination: Pagination::Offset { page: 2, size: 5 },
            raw_predicate: Some("payload->>'age' <> '0'".into()),
            ..Default::default()
        };
        let q = count(T, &query).unwrap();
        assert_eq!(
            q.sql,
            format!("SELECT COUNT(*) AS total FROM {} WHERE deleted_at IS NULL AND (payload->>'age' <> '0')", T)
        );
    }

    #[test]
    fn writes_use_placeholders() {
        let q = insert(T, "u1", serde_json::json!({"id": "u1"}), None, None);
        assert_eq!(
            q.sql,
            format!("INSERT INTO {} (id, payload, created_at, updated_at) VALUES ($1, $2, NOW(), NOW())", T)
        );
        let q = update(T, "u1", serde_json::json!({}), Some(Utc::now()));
        assert!(q.sql.contains("updated_at = $2 WHERE id = $3"));
        let q = soft_delete(T, &["a".into()]);
        assert!(q.sql.starts_with(&format!("UPDATE {} SET deleted_at = NOW()", T)));
        let q = purge(T, &["a".into()]);
        assert_eq!(q.sql, format!("DELETE FROM {} WHERE id = ANY($1)", T));
    }
}
