//! Wire structure for batch operations.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Run all writes in one storage transaction.
    pub atomic: bool,
    /// Hard delete instead of soft delete.
    pub purge: bool,
}

/// Output-only counts, filled after the persistence step completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// `items` (create/update/patch) and `ids` (delete) are mutually exclusive inputs.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchEnvelope<M> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<M>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    pub options: BatchOptions,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub summary: Option<BatchSummary>,
}

impl<M> Default for BatchEnvelope<M> {
    fn default() -> Self {
        BatchEnvelope {
            items: Vec::new(),
            ids: Vec::new(),
            options: BatchOptions::default(),
            summary: None,
        }
    }
}

impl<M> BatchEnvelope<M> {
    pub fn of_items(items: Vec<M>) -> Self {
        BatchEnvelope {
            items,
            ids: Vec::new(),
            options: BatchOptions::default(),
            summary: None,
        }
    }

    pub fn of_ids(ids: Vec<String>) -> Self {
        BatchEnvelope {
            items: Vec::new(),
            ids,
            options: BatchOptions::default(),
            summary: None,
        }
    }

    /// Rejects envelopes carrying both inputs.
    pub fn check_exclusive(&self) -> Result<(), crate::error::AppError> {
        if !self.items.is_empty() && !self.ids.is_empty() {
            return Err(crate::error::AppError::Validation(
                "items and ids are mutually exclusive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_output_only() {
        let env: BatchEnvelope<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "ids": ["a"],
            "options": {"purge": true},
            "summary": {"total": 9, "succeeded": 9, "failed": 0}
        }))
        .unwrap();
        assert!(env.summary.is_none());
        assert!(env.options.purge);
        assert!(!env.options.atomic);
    }

    #[test]
    fn items_and_ids_are_exclusive() {
        let mut env = BatchEnvelope::of_items(vec![serde_json::json!({"id": "x"})]);
        assert!(env.check_exclusive().is_ok());
        env.ids.push("x".into());
        assert!(env.check_exclusive().is_err());
    }
}
