//! In-memory store evaluating descriptors over the JSON form of each resource.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{relation_names, shape_relations, Store};
use crate::error::StoreError;
use crate::model::Model;
use crate::query::{QueryDescriptor, SortDirection};

/// Insertion-ordered rows; soft-deleted rows move to a trash list.
pub struct MemoryStore<M> {
    rows: RwLock<Vec<M>>,
    trash: RwLock<Vec<M>>,
}

impl<M: Model> Default for MemoryStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> MemoryStore<M> {
    pub fn new() -> Self {
        MemoryStore {
            rows: RwLock::new(Vec::new()),
            trash: RwLock::new(Vec::new()),
        }
    }

    pub fn with_rows(rows: Vec<M>) -> Self {
        MemoryStore {
            rows: RwLock::new(rows),
            trash: RwLock::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Vec<M> {
        self.read().clone()
    }

    pub fn trash(&self) -> Vec<M> {
        self.trash
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<M>> {
        self.rows.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<M>> {
        self.rows.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rows matching predicates, as (json, model) pairs in storage order.
    fn matching(&self, query: &QueryDescriptor) -> Result<Vec<(Map<String, Value>, M)>, StoreError> {
        if query.raw_predicate.is_some() {
            tracing::debug!("raw predicates are not evaluated by the memory store");
        }
        let rows = self.read();
        let mut out = Vec::new();
        for row in rows.iter() {
            let json = match serde_json::to_value(row)? {
                Value::Object(map) => map,
                _ => continue,
            };
            if matches_query(&json, query) {
                out.push((json, row.clone()));
            }
        }
        Ok(out)
    }
}

fn text(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn matches_query(row: &Map<String, Value>, query: &QueryDescriptor) -> bool {
    let mut checks = query.filters.iter().map(|(field, values)| {
        let actual = text(row.get(field));
        if query.fuzzy {
            let actual = actual.to_lowercase();
            values.iter().any(|v| actual.contains(&v.to_lowercase()))
        } else {
            values.iter().any(|v| *v == actual)
        }
    });
    let filters_ok = if query.filters.is_empty() {
        true
    } else if query.or {
        checks.any(|ok| ok)
    } else {
        checks.all(|ok| ok)
    };
    if !filters_ok {
        return false;
    }

    let excluded = query
        .excludes
        .iter()
        .any(|(field, values)| values.contains(&text(row.get(field))));
    if excluded {
        return false;
    }

    if let Some(range) = &query.time_range {
        let actual = text(row.get(&range.column));
        if actual.is_empty() {
            return false;
        }
        if let Some(start) = &range.start {
            if compare_time(&actual, start) == Ordering::Less {
                return false;
            }
        }
        if let Some(end) = &range.end {
            if compare_time(&actual, end) == Ordering::Greater {
                return false;
            }
        }
    }
    true
}

fn compare_time(a: &str, b: &str) -> Ordering {
    match (
        DateTime::parse_from_rfc3339(a).map(|d| d.with_timezone(&Utc)),
        DateTime::parse_from_rfc3339(b).map(|d| d.with_timezone(&Utc)),
    ) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => text(a).cmp(&text(b)),
    }
}

/// Compare a stored value with a cursor value given as text.
fn compare_to_cursor(actual: Option<&Value>, cursor: &str) -> Ordering {
    if let Some(Value::Number(n)) = actual {
        if let (Some(x), Ok(y)) = (n.as_f64(), cursor.parse::<f64>()) {
            return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        }
    }
    text(actual).as_str().cmp(cursor)
}

/// Applies expansion and projection; rows pass through untouched when neither applies.
fn shape<M: Model>(
    mut row: Map<String, Value>,
    model: M,
    query: &QueryDescriptor,
    relations: &[&'static str],
) -> Result<M, StoreError> {
    if query.select.is_empty() && relations.is_empty() {
        return Ok(model);
    }
    shape_relations(&mut row, relations, &query.expand);
    let select = &query.select;
    let kept: Map<String, Value> = row
        .into_iter()
        .filter(|(k, _)| select.is_empty() || k == "id" || select.iter().any(|s| s == k))
        .collect();
    Ok(serde_json::from_value(Value::Object(kept))?)
}

#[async_trait]
impl<M: Model> Store<M> for MemoryStore<M> {
    async fn create(&self, items: &[M], _atomic: bool) -> Result<(), StoreError> {
        let mut rows = self.write();
        for (i, item) in items.iter().enumerate() {
            let duplicate = rows.iter().any(|r| r.id() == item.id())
                || items[..i].iter().any(|r| r.id() == item.id());
            if duplicate {
                return Err(StoreError::Conflict(format!("duplicate id '{}'", item.id())));
            }
        }
        rows.extend(items.iter().cloned());
        Ok(())
    }

    async fn update(&self, items: &[M], _atomic: bool) -> Result<(), StoreError> {
        let mut rows = self.write();
        for item in items {
            if let Some(slot) = rows.iter_mut().find(|r| r.id() == item.id()) {
                *slot = item.clone();
            }
        }
        Ok(())
    }

    async fn delete(&self, items: &[M], purge: bool) -> Result<(), StoreError> {
        let mut rows = self.write();
        let mut removed = Vec::new();
        rows.retain(|r| {
            if items.iter().any(|i| i.id() == r.id()) {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        if !purge {
            self.trash
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .extend(removed);
        }
        Ok(())
    }

    async fn list(&self, query: &QueryDescriptor) -> Result<Vec<M>, StoreError> {
        let mut rows = self.matching(query)?;
        let size = query.pagination.size() as usize;

        let page: Vec<(Map<String, Value>, M)> = match query.pagination.cursor() {
            Some(cursor) => {
                let field = cursor.fields.first().map(String::as_str).unwrap_or("id");
                rows.retain(|(json, _)| {
                    let ord = compare_to_cursor(json.get(field), &cursor.value);
                    if cursor.next {
                        ord == Ordering::Greater
                    } else {
                        ord == Ordering::Less
                    }
                });
                rows.sort_by(|(a, _), (b, _)| {
                    for f in &cursor.fields {
                        let ord = compare_values(a.get(f), b.get(f));
                        if ord != Ordering::Equal {
                            return if cursor.next { ord } else { ord.reverse() };
                        }
                    }
                    Ordering::Equal
                });
                rows.into_iter().take(size).collect()
            }
            None => {
                let clauses = query.sort();
                if !clauses.is_empty() {
                    rows.sort_by(|(a, _), (b, _)| {
                        for c in &clauses {
                            let ord = compare_values(a.get(&c.field), b.get(&c.field));
                            if ord != Ordering::Equal {
                                return match c.direction {
                                    SortDirection::Asc => ord,
                                    SortDirection::Desc => ord.reverse(),
                                };
                            }
                        }
                        Ordering::Equal
                    });
                }
                rows.into_iter()
                    .skip(query.pagination.offset() as usize)
                    .take(size)
                    .collect()
            }
        };

        let relations = relation_names::<M>();
        page.into_iter()
            .map(|(json, model)| shape(json, model, query, &relations))
            .collect()
    }

    async fn get(&self, id: &str, query: &QueryDescriptor) -> Result<Option<M>, StoreError> {
        let found = self.read().iter().find(|r| r.id() == id).cloned();
        match found {
            Some(model) => {
                let json = match serde_json::to_value(&model)? {
                    Value::Object(map) => map,
                    _ => return Ok(Some(model)),
                };
                shape(json, model, query, &relation_names::<M>()).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn count(&self, query: &QueryDescriptor) -> Result<u64, StoreError> {
        Ok(self.matching(query)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Cursor, Expansion, Pagination, TimeRange};
    use crate::testing::{user, Node, User};

    fn store() -> MemoryStore<User> {
        let mut rows = vec![
            user("u1", "alice", "alice@x.com"),
            user("u2", "bob", "bob@y.com"),
            user("u3", "carol", "carol@x.com"),
            user("u4", "dave", "dave@z.com"),
        ];
        for (i, r) in rows.iter_mut().enumerate() {
            r.age = 20 + i as u32;
        }
        MemoryStore::with_rows(rows)
    }

    fn ids(rows: &[User]) -> Vec<&str> {
        rows.iter().map(|r| r.id()).collect()
    }

    #[tokio::test]
    async fn equality_and_multi_value_filters() {
        let s = store();
        let mut q = QueryDescriptor::default();
        q.filters.insert("name".into(), vec!["bob".into(), "dave".into()]);
        assert_eq!(ids(&s.list(&q).await.unwrap()), vec!["u2", "u4"]);
        assert_eq!(s.count(&q).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fuzzy_and_or_combinators() {
        let s = store();
        let mut q = QueryDescriptor::default();
        q.fuzzy = true;
        q.filters.insert("email".into(), vec!["@x.".into()]);
        assert_eq!(ids(&s.list(&q).await.unwrap()), vec!["u1", "u3"]);

        q.filters.insert("name".into(), vec!["bo".into()]);
        assert!(s.list(&q).await.unwrap().is_empty());
        q.or = true;
        assert_eq!(ids(&s.list(&q).await.unwrap()), vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn excludes_remove_rows() {
        let s = store();
        let mut q = QueryDescriptor::default();
        q.excludes.insert("name".into(), vec!["alice".into()]);
        assert_eq!(s.count(&q).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn sort_and_offset_pagination() {
        let s = store();
        let q = QueryDescriptor {
            sort_by: Some("age desc".into()),
            pagination: Pagination::Offset { page: 2, size: 2 },
            ..Default::default()
        };
        assert_eq!(ids(&s.list(&q).await.unwrap()), vec!["u2", "u1"]);
    }

    #[tokio::test]
    async fn cursor_forward_and_backward() {
        let s = store();
        let forward = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "u2".into(),
                fields: vec!["id".into()],
                next: true,
                size: 10,
                numeric: false,
            }),
            ..Default::default()
        };
        assert_eq!(ids(&s.list(&forward).await.unwrap()), vec!["u3", "u4"]);

        let backward = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "u4".into(),
                fields: vec!["id".into()],
                next: false,
                size: 2,
                numeric: false,
            }),
            ..Default::default()
        };
        // nearest-first scan order; the orchestrator restores forward order
        assert_eq!(ids(&s.list(&backward).await.unwrap()), vec!["u3", "u2"]);
    }

    #[tokio::test]
    async fn numeric_cursor_compares_numbers() {
        let s = store();
        let q = QueryDescriptor {
            pagination: Pagination::Cursor(Cursor {
                value: "21".into(),
                fields: vec!["age".into()],
                next: true,
                size: 10,
                numeric: true,
            }),
            ..Default::default()
        };
        assert_eq!(ids(&s.list(&q).await.unwrap()), vec!["u3", "u4"]);
    }

    #[tokio::test]
    async fn projection_keeps_id_and_selected() {
        let s = store();
        let q = QueryDescriptor {
            select: vec!["name".into()],
            ..Default::default()
        };
        let rows = s.list(&q).await.unwrap();
        assert_eq!(rows[0].name, "alice");
        assert_eq!(rows[0].id(), "u1");
        assert!(rows[0].email.is_empty());
    }

    #[tokio::test]
    async fn time_range_filters_rows_without_timestamps() {
        let s = store();
        let q = QueryDescriptor {
            time_range: Some(TimeRange {
                column: "created_at".into(),
                start: Some("2020-01-01T00:00:00Z".into()),
                end: None,
            }),
            ..Default::default()
        };
        assert_eq!(s.count(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_delete_soft_or_purge() {
        let s = store();
        let err = s.create(&[user("u1", "x", "x")], false).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        s.delete(&[user("u1", "", "")], false).await.unwrap();
        s.delete(&[user("u2", "", "")], true).await.unwrap();
        assert_eq!(s.snapshot().len(), 2);
        assert_eq!(ids(&s.trash()), vec!["u1"]);
        assert!(s.get("u1", &QueryDescriptor::default()).await.unwrap().is_none());
    }

    fn tree() -> MemoryStore<Node> {
        let mut grandchild = Node::default();
        grandchild.base.id = "g".into();
        let mut child = Node::default();
        child.base.id = "c".into();
        child.children = vec![grandchild];
        let mut root = Node::default();
        root.base.id = "r".into();
        root.children = vec![child];
        MemoryStore::with_rows(vec![root])
    }

    fn expanding(relation: &str, depth: u8) -> QueryDescriptor {
        QueryDescriptor {
            expand: vec![Expansion {
                relation: relation.into(),
                depth,
                many: true,
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unexpanded_relations_are_dropped() {
        let s = tree();
        let rows = s.list(&QueryDescriptor::default()).await.unwrap();
        assert!(rows[0].children.is_empty());
        let one = s.get("r", &QueryDescriptor::default()).await.unwrap().unwrap();
        assert!(one.children.is_empty());
        // stored rows keep their relations
        assert_eq!(s.snapshot()[0].children.len(), 1);
    }

    #[tokio::test]
    async fn expansion_depth_limits_nesting() {
        let s = tree();
        let shallow = s.list(&expanding("children", 1)).await.unwrap();
        assert_eq!(shallow[0].children.len(), 1);
        assert!(shallow[0].children[0].children.is_empty());

        let deep = s.get("r", &expanding("children", 2)).await.unwrap().unwrap();
        assert_eq!(deep.children[0].children.len(), 1);
        assert_eq!(deep.children[0].children[0].id(), "g");
    }

    #[tokio::test]
    async fn whole_documents_keep_every_relation() {
        let s = tree();
        let q = QueryDescriptor::by_id("r").with_all_relations::<Node>();
        let rows = s.list(&q).await.unwrap();
        assert_eq!(rows[0].children[0].children.len(), 1);
    }
}
