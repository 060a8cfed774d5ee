//! Partial-update merge over the declared field table.

use crate::model::{Model, Schema};

/// Copy every non-zero field of `incoming` onto `existing`. Of the embedded
/// base only `remark` and `order` take part. Each transition is logged before
/// the field is overwritten. Returns the names of overwritten fields.
pub fn merge<M: Model>(existing: &mut M, incoming: &M, schema: &Schema<M>) -> Vec<&'static str> {
    let mut changed = Vec::new();
    for spec in schema.patchable() {
        if spec.is_zero(incoming) {
            continue;
        }
        tracing::info!(
            resource = schema.resource(),
            id = %existing.id(),
            field = spec.name(),
            "{}: {} -> {}",
            spec.name(),
            spec.render(existing),
            spec.render(incoming)
        );
        spec.assign(existing, incoming);
        changed.push(spec.name());
    }
    changed
}
