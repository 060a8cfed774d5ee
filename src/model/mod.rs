//! Model contract: the capability set every resource type satisfies.
//!
//! A resource embeds [`Base`] (flattened on the wire) and declares its field shape
//! once through [`Model::fields`]; the engine builds a [`Schema`] from that table at
//! registration time and never reflects over values at request time.

mod batch;
mod field;

pub use batch::{BatchEnvelope, BatchOptions, BatchSummary};
pub use field::{numeric_of, FieldKind, FieldSpec, FieldValue, Schema};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation tag attached to every span and audit record of an orchestrated call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
    Update,
    Patch,
    List,
    Get,
    CreateMany,
    DeleteMany,
    UpdateMany,
    PatchMany,
    Import,
    Export,
}

impl Operation {
    pub const ALL_CRUD: [Operation; 10] = [
        Operation::Create,
        Operation::Delete,
        Operation::Update,
        Operation::Patch,
        Operation::List,
        Operation::Get,
        Operation::CreateMany,
        Operation::DeleteMany,
        Operation::UpdateMany,
        Operation::PatchMany,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Delete => "delete",
            Operation::Update => "update",
            Operation::Patch => "patch",
            Operation::List => "list",
            Operation::Get => "get",
            Operation::CreateMany => "create_many",
            Operation::DeleteMany => "delete_many",
            Operation::UpdateMany => "update_many",
            Operation::PatchMany => "patch_many",
            Operation::Import => "import",
            Operation::Export => "export",
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Operation::List | Operation::Get | Operation::Export)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-phase of a hooked step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Before,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Before => f.write_str("before"),
            Phase::After => f.write_str("after"),
        }
    }
}

/// Common audit sub-structure embedded (flattened) in every resource.
///
/// Only `remark` and `order` take part in partial updates; the rest is owned by
/// the engine and the storage layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Base {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub updated_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

/// Capability interface for a resource type. None of the provided methods panic
/// on a `Default` instance.
///
/// Implementors embed [`Base`] with `#[serde(flatten)]` and should mark the struct
/// `#[serde(default)]` so partial payloads (patch bodies, projections) decode.
pub trait Model: Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Logical resource name used in spans, audit records and default routes.
    fn resource_name() -> &'static str;

    /// Physical storage name.
    fn table_name() -> String {
        crate::case::to_snake_case(Self::resource_name())
    }

    /// Declared field shape (scalars and relations), excluding [`Base`].
    fn fields() -> Vec<FieldSpec<Self>>;

    fn base(&self) -> &Base;
    fn base_mut(&mut self) -> &mut Base;

    /// Relation field names eligible for `_expand`, in declaration order.
    fn expands(&self) -> Vec<&'static str> {
        Self::fields()
            .iter()
            .filter(|f| f.kind().is_relation())
            .map(|f| f.name())
            .collect()
    }

    /// Field name -> values that List must never return.
    fn excludes(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    /// Hard delete when true, soft delete otherwise.
    fn purge(&self) -> bool {
        false
    }

    fn id(&self) -> &str {
        &self.base().id
    }

    /// Sets the identity, generating a UUIDv4 when `id` is empty.
    fn set_id(&mut self, id: &str) {
        self.base_mut().id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };
    }

    fn clear_id(&mut self) {
        self.base_mut().id.clear();
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.base().created_at
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.base_mut().created_at = Some(at);
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.base().updated_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.base_mut().updated_at = Some(at);
    }

    fn created_by(&self) -> &str {
        &self.base().created_by
    }

    fn set_created_by(&mut self, actor: &str) {
        self.base_mut().created_by = actor.to_string();
    }

    fn updated_by(&self) -> &str {
        &self.base().updated_by
    }

    fn set_updated_by(&mut self, actor: &str) {
        self.base_mut().updated_by = actor.to_string();
    }
}

/// Stub instance carrying only an identity. Used for delete and get.
pub fn stub<M: Model>(id: &str) -> M {
    let mut m = M::default();
    m.base_mut().id = id.to_string();
    m
}
