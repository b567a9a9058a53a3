//! Selection-driven projection of documents.
//!
//! A live observation publishes only the fields the query selected, and
//! only resolves nested cursor fields that were selected.

use crate::cursor::Document;
use crate::directive::CURSOR_DIRECTIVE;
use crate::schema::{FieldDef, ObjectDef};
use crate::selection::FieldSelection;
use indexmap::IndexSet;
use std::sync::Arc;

/// Whether a child selection applies to `object`.
fn applies(child: &FieldSelection, object: &ObjectDef) -> bool {
    match &child.type_condition {
        None => true,
        Some(condition) => condition == &object.name || object.implements.contains(condition),
    }
}

/// Names of the fields of `object` selected by `selection`.
///
/// Aliases are followed to the underlying field name. Without a
/// sub-selection every declared field counts as selected.
pub fn selected_field_names(selection: &FieldSelection, object: &ObjectDef) -> IndexSet<String> {
    if !selection.has_selection_set {
        return object.fields.keys().cloned().collect();
    }
    selection
        .children
        .iter()
        .filter(|child| applies(child, object))
        .map(|child| child.name.as_str())
        .filter(|name| *name != "__typename" && object.fields.contains_key(*name))
        .map(str::to_string)
        .collect()
}

/// Restricts a document to the selected fields. `_id` travels separately
/// and is never part of the projection.
pub fn project(fields: &Document, selected: &IndexSet<String>) -> Document {
    fields
        .iter()
        .filter(|(name, _)| name.as_str() != "_id" && selected.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// The selected children of `selection` that are live-cursor fields of
/// `object`, optionally limited to the field names in `only`.
pub fn cursor_children<'o>(
    selection: &FieldSelection,
    object: &'o ObjectDef,
    only: Option<&IndexSet<String>>,
) -> Vec<(Arc<FieldSelection>, &'o FieldDef)> {
    selection
        .children
        .iter()
        .filter(|child| applies(child, object))
        .filter(|child| only.map_or(true, |names| names.contains(child.name.as_str())))
        .filter_map(|child| {
            let field = object.fields.get(&child.name)?;
            field
                .has_directive(CURSOR_DIRECTIVE)
                .then(|| (Arc::clone(child), field))
        })
        .collect()
}
