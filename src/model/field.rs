//! Declarative field-descriptor table, built once per resource type.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Model;
use crate::case;

/// Zero test and log rendering for a field value. Zero means "not supplied" for
/// partial updates; `Option::None` renders as `nil`.
pub trait FieldValue {
    /// Stored as a JSON number.
    const NUMERIC: bool = false;

    fn is_zero(&self) -> bool;
    fn render(&self) -> String;
}

impl FieldValue for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
    fn render(&self) -> String {
        self.clone()
    }
}

impl FieldValue for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
    fn render(&self) -> String {
        self.to_string()
    }
}

macro_rules! numeric_field_value {
    ($($t:ty),*) => {
        $(
            impl FieldValue for $t {
                const NUMERIC: bool = true;

                fn is_zero(&self) -> bool {
                    *self == 0 as $t
                }
                fn render(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

numeric_field_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64);

impl FieldValue for DateTime<Utc> {
    fn is_zero(&self) -> bool {
        self.timestamp() == 0 && self.timestamp_subsec_nanos() == 0
    }
    fn render(&self) -> String {
        self.to_rfc3339()
    }
}

impl FieldValue for Value {
    fn is_zero(&self) -> bool {
        self.is_null()
    }
    fn render(&self) -> String {
        self.to_string()
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const NUMERIC: bool = T::NUMERIC;

    fn is_zero(&self) -> bool {
        self.is_none()
    }
    fn render(&self) -> String {
        match self {
            Some(v) => v.render(),
            None => "nil".to_string(),
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
    fn render(&self) -> String {
        let parts: Vec<String> = self.iter().map(FieldValue::render).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// Shape of a declared field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    /// Single related resource (non-slice).
    One,
    /// Related collection (slice); expands recursively with `_depth`.
    Many,
}

impl FieldKind {
    pub fn is_relation(self) -> bool {
        !matches!(self, FieldKind::Scalar)
    }
}

/// One row of the descriptor table.
pub struct FieldSpec<M> {
    name: &'static str,
    kind: FieldKind,
    queryable: bool,
    numeric: bool,
    is_zero: fn(&M) -> bool,
    render: fn(&M) -> String,
    assign: fn(&mut M, &M),
}

impl<M> Clone for FieldSpec<M> {
    fn clone(&self) -> Self {
        FieldSpec {
            name: self.name,
            kind: self.kind,
            queryable: self.queryable,
            numeric: self.numeric,
            is_zero: self.is_zero,
            render: self.render,
            assign: self.assign,
        }
    }
}

impl<M> std::fmt::Debug for FieldSpec<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queryable", &self.queryable)
            .field("numeric", &self.numeric)
            .finish()
    }
}

impl<M> FieldSpec<M> {
    pub fn new(
        name: &'static str,
        kind: FieldKind,
        is_zero: fn(&M) -> bool,
        render: fn(&M) -> String,
        assign: fn(&mut M, &M),
    ) -> Self {
        FieldSpec {
            name,
            kind,
            queryable: kind == FieldKind::Scalar,
            numeric: false,
            is_zero,
            render,
            assign,
        }
    }

    /// Excludes the field from URL equality filters.
    pub fn not_queryable(mut self) -> Self {
        self.queryable = false;
        self
    }

    /// Marks values as JSON numbers, so cursors compare them numerically.
    pub fn numeric(mut self, numeric: bool) -> Self {
        self.numeric = numeric;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_numeric(&self) -> bool {
        self.numeric
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_queryable(&self) -> bool {
        self.queryable
    }

    pub fn is_zero(&self, m: &M) -> bool {
        (self.is_zero)(m)
    }

    pub fn render(&self, m: &M) -> String {
        (self.render)(m)
    }

    /// Copy this field from `src` into `dst`.
    pub fn assign(&self, dst: &mut M, src: &M) {
        (self.assign)(dst, src)
    }
}

/// Scalar field descriptor: `field!(User, name)`.
#[macro_export]
macro_rules! field {
    ($model:ty, $name:ident) => {
        $crate::model::FieldSpec::<$model>::new(
            stringify!($name),
            $crate::model::FieldKind::Scalar,
            |m: &$model| $crate::model::FieldValue::is_zero(&m.$name),
            |m: &$model| $crate::model::FieldValue::render(&m.$name),
            |dst: &mut $model, src: &$model| dst.$name = src.$name.clone(),
        )
        .numeric($crate::model::numeric_of(|m: &$model| &m.$name))
    };
}

/// Whether the field reached through `get` is stored as a JSON number.
pub fn numeric_of<M, T, F>(_get: F) -> bool
where
    T: FieldValue,
    F: Fn(&M) -> &T,
{
    T::NUMERIC
}

/// Relation to a collection of resources: `has_many!(Node, children)`.
#[macro_export]
macro_rules! has_many {
    ($model:ty, $name:ident) => {
        $crate::model::FieldSpec::<$model>::new(
            stringify!($name),
            $crate::model::FieldKind::Many,
            |m: &$model| m.$name.is_empty(),
            |m: &$model| format!("[{} items]", m.$name.len()),
            |dst: &mut $model, src: &$model| dst.$name = src.$name.clone(),
        )
    };
}

/// Relation to a single resource held as `Option<_>`: `has_one!(Node, parent)`.
#[macro_export]
macro_rules! has_one {
    ($model:ty, $name:ident) => {
        $crate::model::FieldSpec::<$model>::new(
            stringify!($name),
            $crate::model::FieldKind::One,
            |m: &$model| m.$name.is_none(),
            |m: &$model| match &m.$name {
                Some(_) => "{..}".to_string(),
                None => "nil".to_string(),
            },
            |dst: &mut $model, src: &$model| dst.$name = src.$name.clone(),
        )
    };
}

/// Base fields that URL parameters may filter on.
pub const BASE_QUERYABLE: [&str; 4] = ["id", "created_by", "updated_by", "remark"];

/// Per-type descriptor table resolved at registration.
#[derive(Debug)]
pub struct Schema<M> {
    resource: &'static str,
    table: String,
    fields: Vec<FieldSpec<M>>,
    /// `fields` followed by the two allow-listed base fields.
    patchable: Vec<FieldSpec<M>>,
    /// Relations `_expand` may name, from [`Model::expands`].
    expandable: Vec<&'static str>,
}

impl<M: Model> Schema<M> {
    pub fn new() -> Self {
        let fields = M::fields();
        let mut patchable = fields.clone();
        patchable.push(FieldSpec::new(
            "remark",
            FieldKind::Scalar,
            |m: &M| m.base().remark.is_zero(),
            |m: &M| m.base().remark.render(),
            |dst: &mut M, src: &M| dst.base_mut().remark = src.base().remark.clone(),
        ));
        patchable.push(FieldSpec::new(
            "order",
            FieldKind::Scalar,
            |m: &M| m.base().order.is_zero(),
            |m: &M| m.base().order.render(),
            |dst: &mut M, src: &M| dst.base_mut().order = src.base().order,
        )
        .numeric(true));
        Schema {
            resource: M::resource_name(),
            table: M::table_name(),
            fields,
            patchable,
            expandable: M::default().expands(),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[FieldSpec<M>] {
        &self.fields
    }

    pub fn patchable(&self) -> &[FieldSpec<M>] {
        &self.patchable
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec<M>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &FieldSpec<M>> {
        self.fields.iter().filter(|f| f.kind.is_relation())
    }

    /// Declared relations the model allows `_expand` to load.
    pub fn expandable(&self) -> impl Iterator<Item = &FieldSpec<M>> {
        self.relations().filter(|f| self.expandable.contains(&f.name))
    }

    /// Expandable relation lookup tolerant of case and underscores
    /// (`Children` == `children`).
    pub fn relation(&self, name: &str) -> Option<&FieldSpec<M>> {
        let wanted = case::fold(name);
        self.expandable().find(|f| case::fold(f.name) == wanted)
    }

    /// Whether cursor values on `name` compare as numbers.
    pub fn is_numeric(&self, name: &str) -> bool {
        self.patchable.iter().any(|f| f.numeric && f.name == name)
    }

    pub fn is_queryable(&self, name: &str) -> bool {
        BASE_QUERYABLE.contains(&name)
            || self.fields.iter().any(|f| f.queryable && f.name == name)
    }

    /// Every top-level key that may appear in the JSON form of `M`.
    pub fn known_keys(&self) -> Vec<&'static str> {
        let mut keys = vec![
            "id",
            "created_at",
            "updated_at",
            "created_by",
            "updated_by",
            "remark",
            "order",
        ];
        keys.extend(self.fields.iter().map(|f| f.name));
        keys
    }
}

impl<M: Model> Default for Schema<M> {
    fn default() -> Self {
        Self::new()
    }
}
