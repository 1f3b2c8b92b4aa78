//! Relation resolution.
//!
//! A declared relation can be queried from either of its sides: the "many"
//! collection holding the foreign key, or the "one" collection through its
//! reverse alias. Both lookups must yield the same descriptor.

use warden_types::schema::{Relation, SchemaOverview};

/// How a collection+field pair relates to the resolved relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Many-to-one: the field is the foreign key on `relation.collection`.
    One,
    /// One-to-many: the field is the reverse alias on the related side.
    Many,
    /// Any-to-one: the field is a discriminated foreign key.
    Any,
}

/// Find the relation a collection+field pair refers to.
///
/// Matches the foreign-key side (`relation.collection == collection &&
/// relation.field == field`) or the reverse-alias side
/// (`relation.related_collection == collection && meta.one_field == field`)
/// and returns the same underlying descriptor either way. `None` means the
/// field is non-relational.
pub fn get_relation<'a>(
    schema: &'a SchemaOverview,
    collection: &str,
    field: &str,
) -> Option<&'a Relation> {
    schema.relations.iter().find(|relation| {
        (relation.collection == collection && relation.field == field)
            || (relation.related_collection.as_deref() == Some(collection)
                && relation.meta.one_field.as_deref() == Some(field))
    })
}

/// Classify which side of `relation` the collection+field pair sits on.
///
/// Returns `None` when the pair does not belong to the relation at all.
pub fn relation_kind(relation: &Relation, collection: &str, field: &str) -> Option<RelationKind> {
    if relation.collection == collection && relation.field == field {
        if relation.is_any() {
            return Some(RelationKind::Any);
        }
        return Some(RelationKind::One);
    }

    if relation.related_collection.as_deref() == Some(collection)
        && relation.meta.one_field.as_deref() == Some(field)
    {
        return Some(RelationKind::Many);
    }

    None
}
