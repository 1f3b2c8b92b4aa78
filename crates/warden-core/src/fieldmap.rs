//! Field map construction.
//!
//! The field map records, per tree path, which collection is in scope and
//! which of its fields the query touches. Fields that are emitted to the
//! caller land in the `read` map; fields reached only through a node's own
//! sub-query (filter/sort) land in the `other` map. The two maps are
//! validated against different permission actions, so the split matters for
//! anything other than a plain read request.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;
use warden_types::ast::{Ast, AstNode, NodeQuery, QueryFunction};
use warden_types::filter::strip_function;
use warden_types::schema::SchemaOverview;

use crate::relations::get_relation;

/// Ordered path of output-key segments from the tree root.
pub type Path = Vec<String>;

/// Collection scope and touched fields for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapEntry {
    /// Collection in scope at this path.
    pub collection: String,
    /// Touched (function-stripped) field names.
    pub fields: BTreeSet<String>,
}

impl FieldMapEntry {
    fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_owned(),
            fields: BTreeSet::new(),
        }
    }
}

/// Path-indexed field usage for one query tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    /// Fields emitted to the caller.
    pub read: BTreeMap<Path, FieldMapEntry>,
    /// Fields used only for filtering/sorting.
    pub other: BTreeMap<Path, FieldMapEntry>,
}

/// Which of the two maps a visit writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Emitted,
    QueryOnly,
}

impl FieldMap {
    fn entry(&mut self, usage: Usage, path: &Path, collection: &str) -> &mut FieldMapEntry {
        let map = match usage {
            Usage::Emitted => &mut self.read,
            Usage::QueryOnly => &mut self.other,
        };
        map.entry(path.clone())
            .or_insert_with(|| FieldMapEntry::new(collection))
    }

    /// Every collection referenced by either map, deduplicated.
    pub fn collections(&self) -> BTreeSet<String> {
        self.read
            .values()
            .chain(self.other.values())
            .map(|entry| entry.collection.clone())
            .collect()
    }
}

/// The synthetic path segment for an any-to-one branch: the field key and
/// the target collection, joined so each target gets its own scope.
pub fn any_path_segment(field_key: &str, collection: &str) -> String {
    format!("{field_key}__{collection}")
}

/// Build the field map for a query tree.
pub fn field_map_from_ast(ast: &Ast, schema: &SchemaOverview) -> FieldMap {
    let mut map = FieldMap::default();
    extract_children(&ast.collection, &ast.children, &mut map, schema, &Vec::new());
    extract_query(&ast.collection, &ast.query, &mut map, schema, &Vec::new());
    trace!(
        read_paths = map.read.len(),
        other_paths = map.other.len(),
        collection = %ast.collection,
        "field map built"
    );
    map
}

fn extract_children(
    collection: &str,
    children: &[AstNode],
    map: &mut FieldMap,
    schema: &SchemaOverview,
    path: &Path,
) {
    // The collection context exists even when no field survives, so
    // zero-field scopes still get their collection-level checks.
    map.entry(Usage::Emitted, path, collection);

    for child in children {
        match child {
            AstNode::Field(node) => {
                map.entry(Usage::Emitted, path, collection)
                    .fields
                    .insert(node.name.clone());
            }
            AstNode::FunctionField(node) => {
                map.entry(Usage::Emitted, path, collection)
                    .fields
                    .insert(node.name.clone());

                // The aggregate queries related rows without exposing any of
                // their content: register an existence-only visit.
                let mut child_path = path.clone();
                child_path.push(node.field_key.clone());
                map.entry(Usage::QueryOnly, &child_path, &node.related_collection);
                extract_query(&node.related_collection, &node.query, map, schema, &child_path);
            }
            AstNode::NestedOne(node) => {
                // The join field itself is read to know whether a related
                // row exists at all.
                map.entry(Usage::Emitted, path, collection)
                    .fields
                    .insert(node.name.clone());

                let mut child_path = path.clone();
                child_path.push(node.field_key.clone());
                extract_children(&node.collection, &node.children, map, schema, &child_path);
                extract_query(&node.collection, &node.query, map, schema, &child_path);
            }
            AstNode::NestedMany(node) => {
                map.entry(Usage::Emitted, path, collection)
                    .fields
                    .insert(node.name.clone());

                let mut child_path = path.clone();
                child_path.push(node.field_key.clone());
                extract_children(&node.collection, &node.children, map, schema, &child_path);
                extract_query(&node.collection, &node.query, map, schema, &child_path);
            }
            AstNode::NestedAny(node) => {
                map.entry(Usage::Emitted, path, collection)
                    .fields
                    .insert(node.name.clone());

                for (target, target_children) in &node.children {
                    let mut child_path = path.clone();
                    child_path.push(any_path_segment(&node.field_key, target));
                    extract_children(target, target_children, map, schema, &child_path);
                    if let Some(query) = node.queries.get(target) {
                        extract_query(target, query, map, schema, &child_path);
                    }
                }
            }
        }
    }
}

fn extract_query(
    collection: &str,
    query: &NodeQuery,
    map: &mut FieldMap,
    schema: &SchemaOverview,
    path: &Path,
) {
    let mut fields: BTreeSet<String> = BTreeSet::new();

    if let Some(filter) = &query.filter {
        fields.extend(filter.fields());

        // A `count(alias)` reference in a filter queries the related
        // collection's rows; that collection needs its own existence-only
        // read check.
        for raw in filter_function_fields(filter) {
            register_counted_relation(collection, &raw, map, schema, path);
        }
    }

    for sort in &query.sort {
        let (function, name) = strip_function(&sort.field);
        fields.insert(name.to_owned());
        if function == Some(QueryFunction::Count.as_str()) {
            register_counted_relation(collection, &sort.field, map, schema, path);
        }
    }

    if !fields.is_empty() {
        map.entry(Usage::QueryOnly, path, collection)
            .fields
            .extend(fields);
    }
}

fn register_counted_relation(
    collection: &str,
    field_ref: &str,
    map: &mut FieldMap,
    schema: &SchemaOverview,
    path: &Path,
) {
    let (function, name) = strip_function(field_ref);
    if function != Some(QueryFunction::Count.as_str()) {
        return;
    }
    if let Some(relation) = get_relation(schema, collection, name) {
        let mut child_path = path.clone();
        child_path.push(name.to_owned());
        map.entry(Usage::QueryOnly, &child_path, &relation.collection);
    }
}

fn filter_function_fields(filter: &warden_types::filter::Filter) -> Vec<String> {
    use warden_types::filter::Filter;

    let mut out = Vec::new();
    let mut stack = vec![filter];
    while let Some(current) = stack.pop() {
        match current {
            Filter::And(branches) | Filter::Or(branches) => stack.extend(branches.iter()),
            Filter::Condition { field, .. } => {
                if strip_function(field).0.is_some() {
                    out.push(field.clone());
                }
            }
        }
    }
    out
}
