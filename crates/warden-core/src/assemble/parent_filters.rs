//! Batched child-fetch derivation.
//!
//! After a batch of parent rows is fetched, each nested node needs a filter
//! that pulls exactly the children those parents reference. Many-to-one
//! nodes filter the related primary key by the distinct join values seen
//! across the batch; one-to-many nodes filter the foreign key by the
//! distinct parent primary keys; any-to-one nodes split the batch by
//! discriminator and produce one fetch per distinct target collection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;
use warden_types::ast::AstNode;
use warden_types::filter::Filter;
use warden_types::schema::SchemaOverview;
use warden_types::value::Value;

use crate::error::{Error, Result};
use crate::permissions::merge::{merge_filters, MergeStrategy};

/// One fetched parent row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A derived fetch for one nested node against one concrete collection.
///
/// Any-to-one nodes yield several of these, one per target collection
/// present in the parent batch; everything else yields exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFetch {
    /// Output key of the node this fetch feeds.
    pub field_key: String,
    /// Collection to fetch from.
    pub collection: String,
    /// Derived batch filter, and-merged with the node's own sub-query
    /// filter when one is set.
    pub filter: Filter,
    /// Upper bound on rows needed, set only for any-to-one batches.
    pub limit: Option<usize>,
    /// Columns that must be fetched even when not selected, because they
    /// are needed to reattach children to their parents.
    pub extra_fields: Vec<String>,
}

/// Derive the child-fetch filters for every nested node under a batch of
/// already-fetched parent rows.
pub fn apply_parent_filters(
    schema: &SchemaOverview,
    nodes: &[AstNode],
    parent_rows: &[Row],
) -> Result<Vec<ChildFetch>> {
    let mut fetches = Vec::new();

    for node in nodes {
        match node {
            AstNode::Field(_) | AstNode::FunctionField(_) => {}
            AstNode::NestedOne(one) => {
                let related_pk = schema
                    .primary_key(&one.collection)
                    .ok_or_else(|| Error::CollectionNotFound(one.collection.clone()))?;

                let keys = distinct_non_null(parent_rows, &one.relation.field);
                trace!(
                    field = %one.field_key,
                    count = keys.len(),
                    "many-to-one batch keys"
                );

                fetches.push(ChildFetch {
                    field_key: one.field_key.clone(),
                    collection: one.collection.clone(),
                    filter: batch_filter(related_pk, keys, one.query.filter.clone()),
                    limit: None,
                    extra_fields: Vec::new(),
                });
            }
            AstNode::NestedMany(many) => {
                let parent_collection =
                    many.relation.related_collection.as_deref().ok_or_else(|| {
                        Error::Internal(format!(
                            "one-to-many relation on {}.{} has no related collection",
                            many.relation.collection, many.relation.field
                        ))
                    })?;
                let parent_pk = schema
                    .primary_key(parent_collection)
                    .ok_or_else(|| Error::CollectionNotFound(parent_collection.to_owned()))?;

                let keys = distinct_non_null(parent_rows, parent_pk);

                // The foreign key (and declared sort field) must come back
                // even when not selected; reattachment depends on them.
                let mut extra_fields = vec![many.relation.field.clone()];
                if let Some(sort_field) = &many.relation.meta.sort_field {
                    extra_fields.push(sort_field.clone());
                }

                fetches.push(ChildFetch {
                    field_key: many.field_key.clone(),
                    collection: many.collection.clone(),
                    filter: batch_filter(&many.relation.field, keys, many.query.filter.clone()),
                    limit: None,
                    extra_fields,
                });
            }
            AstNode::NestedAny(any) => {
                let discriminator =
                    any.relation.meta.one_collection_field.as_deref().ok_or_else(|| {
                        Error::Internal(format!(
                            "any-to-one relation on {}.{} has no discriminator column",
                            any.relation.collection, any.relation.field
                        ))
                    })?;

                for (target, keys) in group_by_target(parent_rows, discriminator, &any.relation.field)
                {
                    let related_pk = schema
                        .primary_key(&target)
                        .ok_or_else(|| Error::CollectionNotFound(target.clone()))?;
                    let query_filter = any
                        .queries
                        .get(&target)
                        .and_then(|query| query.filter.clone());

                    // Bound the fetch to the ids this batch actually needs.
                    let limit = keys.len();
                    fetches.push(ChildFetch {
                        field_key: any.field_key.clone(),
                        collection: target,
                        filter: batch_filter(related_pk, keys, query_filter),
                        limit: Some(limit),
                        extra_fields: Vec::new(),
                    });
                }
            }
        }
    }

    Ok(fetches)
}

/// Distinct non-null values of one column across the batch, in first-seen
/// order.
fn distinct_non_null(rows: &[Row], column: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for row in rows {
        let Some(value) = row.get(column) else {
            continue;
        };
        if value.is_null() || value.is_undefined() {
            continue;
        }
        if !out.contains(value) {
            out.push(value.clone());
        }
    }
    out
}

/// Split the batch's join keys by discriminator value. Rows with a null
/// discriminator or a null join key reference nothing and are dropped.
fn group_by_target(
    rows: &[Row],
    discriminator: &str,
    join_field: &str,
) -> BTreeMap<String, Vec<Value>> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for row in rows {
        let Some(target) = row.get(discriminator).and_then(Value::as_str) else {
            continue;
        };
        let Some(key) = row.get(join_field) else {
            continue;
        };
        if key.is_null() || key.is_undefined() {
            continue;
        }
        let keys = groups.entry(target.to_owned()).or_default();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    groups
}

fn batch_filter(key_field: &str, keys: Vec<Value>, node_filter: Option<Filter>) -> Filter {
    let derived = Filter::is_in(key_field, keys);
    // And-merge can only return None when both sides are None; derived is
    // always present.
    merge_filters(MergeStrategy::And, Some(derived), node_filter)
        .unwrap_or_else(|| Filter::is_in(key_field, Vec::new()))
}
