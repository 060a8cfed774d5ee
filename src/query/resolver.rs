//! Raw URL parameters -> [`QueryDescriptor`].
//!
//! Decoding is best-effort: malformed booleans decode as `false` and malformed
//! integers as `0` (then defaults apply). The resolver never fails.

use std::collections::BTreeMap;

use super::{Cursor, Expansion, IndexHint, IndexMode, Pagination, QueryDescriptor, TimeRange};
use crate::model::{FieldKind, Model, Schema};

pub const PARAM_FUZZY: &str = "_fuzzy";
pub const PARAM_OR: &str = "_or";
pub const PARAM_EXPAND: &str = "_expand";
pub const PARAM_DEPTH: &str = "_depth";
pub const PARAM_SORTBY: &str = "_sortby";
pub const PARAM_CURSOR_VALUE: &str = "_cursor_value";
pub const PARAM_CURSOR_FIELDS: &str = "_cursor_fields";
pub const PARAM_CURSOR_NEXT: &str = "_cursor_next";
pub const PARAM_PAGE: &str = "page";
pub const PARAM_SIZE: &str = "size";
pub const PARAM_SELECT: &str = "_select";
pub const PARAM_INDEX: &str = "_index";
pub const PARAM_INDEX_MODE: &str = "_index_mode";
pub const PARAM_NOCACHE: &str = "_nocache";
pub const PARAM_NOTOTAL: &str = "_nototal";
pub const PARAM_COLUMN_NAME: &str = "_column_name";
pub const PARAM_START_TIME: &str = "_start_time";
pub const PARAM_END_TIME: &str = "_end_time";

pub const EXPAND_ALL: &str = "all";
pub const MAX_DEPTH: u8 = 99;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_CURSOR_FIELD: &str = "id";
pub const DEFAULT_TIME_COLUMN: &str = "created_at";

/// Values the resolver falls back to when a parameter is absent.
#[derive(Clone, Copy, Debug)]
pub struct QueryDefaults {
    pub page_size: u32,
}

impl Default for QueryDefaults {
    fn default() -> Self {
        QueryDefaults {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s, "1" | "t" | "T" | "true" | "TRUE" | "True")
}

fn parse_u32(s: &str) -> u32 {
    s.trim().parse().unwrap_or(0)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

struct Params<'a> {
    raw: &'a [(String, String)],
}

impl<'a> Params<'a> {
    fn first(&self, key: &str) -> Option<&'a str> {
        self.raw
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn non_empty(&self, key: &str) -> Option<&'a str> {
        self.first(key).filter(|v| !v.trim().is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.first(key).map(parse_bool).unwrap_or(false)
    }
}

/// Resolve raw parameters against the declared fields and relations of `M`.
pub fn resolve_query<M: Model>(
    raw: &[(String, String)],
    schema: &Schema<M>,
    defaults: QueryDefaults,
) -> QueryDescriptor {
    let params = Params { raw };

    let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in raw {
        if key.starts_with('_') || value.is_empty() || !schema.is_queryable(key) {
            continue;
        }
        let values = filters.entry(key.clone()).or_default();
        if !values.contains(value) {
            values.push(value.clone());
        }
    }

    let size = match params.first(PARAM_SIZE).map(parse_u32) {
        Some(n) if n > 0 => n,
        _ => defaults.page_size,
    };
    let pagination = match params.non_empty(PARAM_CURSOR_VALUE) {
        Some(value) => {
            let fields = params
                .non_empty(PARAM_CURSOR_FIELDS)
                .map(split_list)
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| vec![DEFAULT_CURSOR_FIELD.to_string()]);
            let numeric = fields.first().is_some_and(|f| schema.is_numeric(f));
            Pagination::Cursor(Cursor {
                value: value.to_string(),
                fields,
                next: params.first(PARAM_CURSOR_NEXT).map(parse_bool).unwrap_or(true),
                size,
                numeric,
            })
        }
        None => Pagination::Offset {
            page: params.first(PARAM_PAGE).map(parse_u32).unwrap_or(0).max(1),
            size,
        },
    };

    let index_hint = params.non_empty(PARAM_INDEX).map(|name| IndexHint {
        name: name.trim().to_string(),
        mode: params
            .first(PARAM_INDEX_MODE)
            .map(IndexMode::parse)
            .unwrap_or_default(),
    });

    let start = params.non_empty(PARAM_START_TIME).map(str::to_string);
    let end = params.non_empty(PARAM_END_TIME).map(str::to_string);
    let time_range = if start.is_some() || end.is_some() {
        Some(TimeRange {
            column: params
                .non_empty(PARAM_COLUMN_NAME)
                .unwrap_or(DEFAULT_TIME_COLUMN)
                .to_string(),
            start,
            end,
        })
    } else {
        None
    };

    let nocache = params.first(PARAM_NOCACHE).map(parse_bool).unwrap_or(true);

    QueryDescriptor {
        filters,
        excludes: BTreeMap::new(),
        fuzzy: params.flag(PARAM_FUZZY),
        or: params.flag(PARAM_OR),
        raw_predicate: None,
        sort_by: params.non_empty(PARAM_SORTBY).map(str::to_string),
        pagination,
        expand: resolve_expand(&params, schema),
        select: params.non_empty(PARAM_SELECT).map(split_list).unwrap_or_default(),
        index_hint,
        cache_enabled: !nocache,
        time_range,
        no_total: params.flag(PARAM_NOTOTAL),
    }
}

fn resolve_expand<M: Model>(params: &Params<'_>, schema: &Schema<M>) -> Vec<Expansion> {
    let Some(raw) = params.non_empty(PARAM_EXPAND) else {
        return Vec::new();
    };
    let depth = parse_u32(params.first(PARAM_DEPTH).unwrap_or("")).clamp(1, u32::from(MAX_DEPTH)) as u8;

    let names = split_list(raw);
    let selected: Vec<_> = if names.iter().any(|n| n.eq_ignore_ascii_case(EXPAND_ALL)) {
        schema.expandable().collect()
    } else {
        names
            .iter()
            .filter_map(|n| {
                let found = schema.relation(n);
                if found.is_none() {
                    tracing::debug!(relation = %n, resource = schema.resource(), "unknown relation in _expand, ignored");
                }
                found
            })
            .collect()
    };

    let mut out: Vec<Expansion> = Vec::with_capacity(selected.len());
    for spec in selected {
        if out.iter().any(|e| e.relation == spec.name()) {
            continue;
        }
        let many = spec.kind() == FieldKind::Many;
        out.push(Expansion {
            relation: spec.name().to_string(),
            depth: if many { depth } else { 1 },
            many,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortDirection;
    use crate::testing::{Node, Team, User};

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn nodes(pairs: &[(&str, &str)]) -> QueryDescriptor {
        resolve_query(&params(pairs), &Schema::<Node>::new(), QueryDefaults::default())
    }

    fn users(pairs: &[(&str, &str)]) -> QueryDescriptor {
        resolve_query(&params(pairs), &Schema::<User>::new(), QueryDefaults::default())
    }

    #[test]
    fn resolving_twice_is_identical() {
        let raw = [
            ("name", "a"),
            ("_expand", "all"),
            ("_sortby", "name desc"),
            ("_select", "id,name"),
            ("_index", "idx_name"),
        ];
        assert_eq!(users(&raw), users(&raw));
    }

    #[test]
    fn queryable_fields_become_filters() {
        let q = users(&[("name", "a"), ("name", "b"), ("password", "x"), ("unknown", "y"), ("email", "")]);
        assert_eq!(q.filters.len(), 1);
        assert_eq!(q.filters["name"], vec!["a".to_string(), "b".to_string()]);
        assert!(!q.fuzzy);
        assert!(!q.or);
    }

    #[test]
    fn fuzzy_and_or_are_global_flags() {
        let q = users(&[("name", "a"), ("email", "b"), ("_fuzzy", "true"), ("_or", "1")]);
        assert!(q.fuzzy);
        assert!(q.or);
        assert_eq!(q.filters.len(), 2);
    }

    #[test]
    fn collection_expansion_repeats_by_depth() {
        let q = nodes(&[("_expand", "children"), ("_depth", "3")]);
        assert_eq!(q.expand_paths(), vec!["children.children.children"]);
        let q = nodes(&[("_expand", "Children")]);
        assert_eq!(q.expand_paths(), vec!["children"]);
    }

    #[test]
    fn depth_is_clamped() {
        let q = nodes(&[("_expand", "children"), ("_depth", "0")]);
        assert_eq!(q.expand[0].depth, 1);
        let q = nodes(&[("_expand", "children"), ("_depth", "500")]);
        assert_eq!(q.expand[0].depth, MAX_DEPTH);
        let q = nodes(&[("_expand", "children"), ("_depth", "deep")]);
        assert_eq!(q.expand[0].depth, 1);
    }

    #[test]
    fn expand_all_covers_every_relation() {
        let q = nodes(&[("_expand", "all"), ("_depth", "2")]);
        assert_eq!(q.expand_paths(), vec!["parent", "children.children"]);
    }

    #[test]
    fn expansion_is_limited_to_what_the_model_allows() {
        let teams = |pairs: &[(&str, &str)]| {
            resolve_query(&params(pairs), &Schema::<Team>::new(), QueryDefaults::default())
        };
        assert_eq!(teams(&[("_expand", "all")]).expand_paths(), vec!["lead"]);
        assert!(teams(&[("_expand", "members")]).expand.is_empty());
        assert_eq!(teams(&[("_expand", "members,lead")]).expand_paths(), vec!["lead"]);
    }

    #[test]
    fn unknown_relations_are_ignored() {
        let q = nodes(&[("_expand", "siblings,children,children")]);
        assert_eq!(q.expand_paths(), vec!["children"]);
    }

    #[test]
    fn cursor_mode_skips_total_regardless_of_nototal() {
        let q = users(&[("_cursor_value", "u10"), ("_nototal", "false")]);
        assert!(q.skip_total());
        let cursor = q.pagination.cursor().unwrap();
        assert_eq!(cursor.fields, vec!["id".to_string()]);
        assert!(cursor.next);
        assert!(!cursor.numeric);
        assert_eq!(cursor.size, DEFAULT_PAGE_SIZE);

        let q = users(&[("_cursor_value", "u10"), ("_cursor_next", "false"), ("_cursor_fields", "age,id")]);
        let cursor = q.pagination.cursor().unwrap();
        assert!(!cursor.next);
        assert_eq!(cursor.fields, vec!["age".to_string(), "id".to_string()]);
        assert!(cursor.numeric);
    }

    #[test]
    fn offset_mode_defaults() {
        let q = users(&[]);
        assert_eq!(q.pagination, Pagination::Offset { page: 1, size: DEFAULT_PAGE_SIZE });
        assert!(!q.skip_total());
        let q = users(&[("page", "2"), ("size", "10")]);
        assert_eq!(q.pagination, Pagination::Offset { page: 2, size: 10 });
        let q = users(&[("_nototal", "true")]);
        assert!(q.skip_total());
    }

    #[test]
    fn malformed_numbers_degrade_to_defaults() {
        let q = users(&[("page", "two"), ("size", "-5")]);
        assert_eq!(q.pagination, Pagination::Offset { page: 1, size: DEFAULT_PAGE_SIZE });
        let q = resolve_query(&params(&[]), &Schema::<User>::new(), QueryDefaults { page_size: 50 });
        assert_eq!(q.pagination.size(), 50);
    }

    #[test]
    fn malformed_booleans_decode_as_false() {
        let q = users(&[("_fuzzy", "yes"), ("_nototal", "nope")]);
        assert!(!q.fuzzy);
        assert!(!q.no_total);
    }

    #[test]
    fn sort_is_forwarded_verbatim() {
        let q = users(&[("_sortby", "name desc,no_such_field")]);
        assert_eq!(q.sort_by.as_deref(), Some("name desc,no_such_field"));
        assert_eq!(q.sort()[0].direction, SortDirection::Desc);
        assert_eq!(q.sort()[1].field, "no_such_field");
    }

    #[test]
    fn projection_index_and_cache() {
        let q = users(&[("_select", "id, name,"), ("_index", "idx_email")]);
        assert_eq!(q.select, vec!["id".to_string(), "name".to_string()]);
        assert_eq!(
            q.index_hint,
            Some(IndexHint {
                name: "idx_email".into(),
                mode: IndexMode::Use
            })
        );
        assert!(!q.cache_enabled);

        let q = users(&[("_index", "idx_email"), ("_index_mode", "force"), ("_nocache", "false")]);
        assert_eq!(q.index_hint.unwrap().mode, IndexMode::Force);
        assert!(q.cache_enabled);
    }

    #[test]
    fn time_range_needs_a_bound() {
        assert!(users(&[("_column_name", "updated_at")]).time_range.is_none());
        let q = users(&[("_start_time", "2024-01-01T00:00:00Z")]);
        let range = q.time_range.unwrap();
        assert_eq!(range.column, "created_at");
        assert_eq!(range.start.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert!(range.end.is_none());
    }
}
