//! Structured query descriptor handed to the storage capability.

mod resolver;

pub use resolver::{resolve_query, QueryDefaults, DEFAULT_PAGE_SIZE, MAX_DEPTH};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{FieldKind, Model};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SortClause {
    pub field: String,
    pub direction: SortDirection,
}

/// Cursor pagination keyed by the value of a sortable field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Cursor {
    pub value: String,
    pub fields: Vec<String>,
    /// Forward (ascending) when true; backward otherwise. Backward pages are
    /// handed back to the caller in forward order.
    pub next: bool,
    pub size: u32,
    /// The first cursor field stores JSON numbers; otherwise values compare as text.
    pub numeric: bool,
}

/// Offset and cursor modes are exclusive by construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Pagination {
    Offset { page: u32, size: u32 },
    Cursor(Cursor),
}

impl Pagination {
    pub fn size(&self) -> u32 {
        match self {
            Pagination::Offset { size, .. } => *size,
            Pagination::Cursor(c) => c.size,
        }
    }

    /// Rows to skip; pages start at 1 and page 0 is treated as the first page.
    pub fn offset(&self) -> u64 {
        match self {
            Pagination::Offset { page, size } => u64::from(page.saturating_sub(1)) * u64::from(*size),
            Pagination::Cursor(_) => 0,
        }
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        match self {
            Pagination::Cursor(c) => Some(c),
            Pagination::Offset { .. } => None,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination::Offset {
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Recursive relation load: `relation` followed `depth` times when it is a
/// collection, once otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Expansion {
    pub relation: String,
    pub depth: u8,
    pub many: bool,
}

impl Expansion {
    /// Dot-joined join path, e.g. `children.children.children`.
    pub fn path(&self) -> String {
        if !self.many {
            return self.relation.clone();
        }
        vec![self.relation.as_str(); usize::from(self.depth.max(1))].join(".")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    #[default]
    Use,
    Force,
    Ignore,
}

impl IndexMode {
    /// Unknown modes fall back to `use`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "force" => IndexMode::Force,
            "ignore" => IndexMode::Ignore,
            _ => IndexMode::Use,
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexMode::Use => f.write_str("use"),
            IndexMode::Force => f.write_str("force"),
            IndexMode::Ignore => f.write_str("ignore"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexHint {
    pub name: String,
    pub mode: IndexMode,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub column: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueryDescriptor {
    /// Field -> accepted values (a single value is plain equality).
    pub filters: BTreeMap<String, Vec<String>>,
    /// Field -> values that must not match.
    pub excludes: BTreeMap<String, Vec<String>>,
    /// Substring match for every filter in the request.
    pub fuzzy: bool,
    /// OR-combine filters instead of AND.
    pub or: bool,
    /// Storage-level predicate, settable only by hooks.
    pub raw_predicate: Option<String>,
    /// `_sortby` exactly as received.
    pub sort_by: Option<String>,
    pub pagination: Pagination,
    pub expand: Vec<Expansion>,
    pub select: Vec<String>,
    pub index_hint: Option<IndexHint>,
    pub cache_enabled: bool,
    pub time_range: Option<TimeRange>,
    pub no_total: bool,
}

impl QueryDescriptor {
    /// Descriptor matching exactly one identity.
    pub fn by_id(id: &str) -> Self {
        let mut q = QueryDescriptor::default();
        q.filters.insert("id".to_string(), vec![id.to_string()]);
        q
    }

    /// Expands every declared relation of `M` to [`MAX_DEPTH`], so stores
    /// return whole documents. Write paths load through this.
    pub fn with_all_relations<M: Model>(mut self) -> Self {
        self.expand = M::fields()
            .iter()
            .filter(|f| f.kind().is_relation())
            .map(|f| Expansion {
                relation: f.name().to_string(),
                depth: MAX_DEPTH,
                many: f.kind() == FieldKind::Many,
            })
            .collect();
        self
    }

    pub fn is_cursor(&self) -> bool {
        matches!(self.pagination, Pagination::Cursor(_))
    }

    /// Total count is skipped on request and always in cursor mode.
    pub fn skip_total(&self) -> bool {
        self.no_total || self.is_cursor()
    }

    /// Clauses parsed from `_sortby` (`field[ asc|desc]`, comma separated).
    /// Field names are not validated here.
    pub fn sort(&self) -> Vec<SortClause> {
        let Some(raw) = self.sort_by.as_deref() else {
            return Vec::new();
        };
        raw.split(',')
            .filter_map(|part| {
                let mut words = part.split_whitespace();
                let field = words.next()?.to_string();
                let direction = match words.next().map(|d| d.to_ascii_lowercase()) {
                    Some(d) if d == "desc" => SortDirection::Desc,
                    _ => SortDirection::Asc,
                };
                Some(SortClause { field, direction })
            })
            .collect()
    }

    pub fn expand_paths(&self) -> Vec<String> {
        self.expand.iter().map(Expansion::path).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_path_repeats_for_collections() {
        let e = Expansion {
            relation: "children".into(),
            depth: 3,
            many: true,
        };
        assert_eq!(e.path(), "children.children.children");
        let one = Expansion {
            relation: "parent".into(),
            depth: 3,
            many: false,
        };
        assert_eq!(one.path(), "parent");
    }

    #[test]
    fn sort_clauses_parse_leniently() {
        let q = QueryDescriptor {
            sort_by: Some("name desc, age,  created_at ASC".into()),
            ..Default::default()
        };
        let clauses = q.sort();
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0].direction, SortDirection::Desc);
        assert_eq!(clauses[1].field, "age");
        assert_eq!(clauses[1].direction, SortDirection::Asc);
        assert_eq!(clauses[2].direction, SortDirection::Asc);
    }

    #[test]
    fn offset_from_page() {
        let p = Pagination::Offset { page: 3, size: 20 };
        assert_eq!(p.offset(), 40);
        assert_eq!(Pagination::Offset { page: 0, size: 20 }.offset(), 0);
    }

    #[test]
    fn by_id_filters_identity() {
        let q = QueryDescriptor::by_id("u1");
        assert_eq!(q.filters.get("id"), Some(&vec!["u1".to_string()]));
        assert!(!q.skip_total());
    }
}
