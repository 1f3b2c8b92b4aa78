//! Case injection: row-level masking branches.
//!
//! For every collection scope in the tree, each child field falls into one
//! of three buckets: granted unconditionally by some permission row (no
//! masking, the cheapest path), granted only conditionally (masking
//! branches attached in policy order), or not granted at all, which the
//! path validator has already rejected. This pass consumes the tree and
//! returns a new annotated one; nothing is mutated in place.

use std::collections::BTreeSet;

use tracing::{debug, trace};
use warden_types::ast::{Ast, AstNode, CaseBranch, CaseMap};
use warden_types::permission::{Action, Permission, FIELD_WILDCARD};

use crate::error::{Error, Result};

/// Per-scope view of one collection's permissions for the request action.
struct CollectionScope {
    /// Conditional branches keyed by field or `*`, in policy order.
    cases: CaseMap,
    /// Fields granted by at least one unconditional row.
    unconditional: BTreeSet<String>,
    /// Whether some unconditional row grants `*`.
    all_unconditional: bool,
}

impl CollectionScope {
    fn build(collection: &str, permissions: &[Permission], action: Action) -> Self {
        let mut cases = CaseMap::new();
        let mut unconditional = BTreeSet::new();
        let mut all_unconditional = false;

        for row in permissions
            .iter()
            .filter(|p| p.collection == collection && p.action == action)
        {
            match &row.permissions {
                None => {
                    if row.grants_all_fields() {
                        all_unconditional = true;
                    }
                    unconditional.extend(row.fields.iter().cloned());
                }
                Some(filter) => {
                    for field in &row.fields {
                        cases
                            .entry(field.clone())
                            .or_default()
                            .push(CaseBranch::reveal(filter.clone()));
                    }
                }
            }
        }

        Self {
            cases,
            unconditional,
            all_unconditional,
        }
    }

    /// Whether the field is visible on every row this identity can see.
    fn is_unconditional(&self, field: &str) -> bool {
        self.all_unconditional || self.unconditional.contains(field)
    }

    /// Masking branches for one field: the `*`-keyed branches followed by
    /// the field-keyed ones, since a wildcard grant can be conditional too.
    fn branches_for(&self, field: &str) -> Vec<CaseBranch> {
        let mut branches = Vec::new();
        if let Some(wildcard) = self.cases.get(FIELD_WILDCARD) {
            branches.extend(wildcard.iter().cloned());
        }
        if let Some(exact) = self.cases.get(field) {
            branches.extend(exact.iter().cloned());
        }
        branches
    }

    /// The case map exposed on the parent node: the `*` entry plus one
    /// entry per masked child field.
    fn case_map_for(&self, masked_fields: &BTreeSet<String>) -> CaseMap {
        let mut out = CaseMap::new();
        if let Some(wildcard) = self.cases.get(FIELD_WILDCARD) {
            out.insert(FIELD_WILDCARD.to_owned(), wildcard.clone());
        }
        for field in masked_fields {
            if let Some(branches) = self.cases.get(field) {
                out.insert(field.clone(), branches.clone());
            }
        }
        out
    }
}

/// Annotate a validated tree with masking cases.
///
/// `permissions` is the identity's resolved rule set in policy order; only
/// rows for the requested action participate, the same rows the path
/// validator accepted the emitted fields against. Returns
/// [`Error::Internal`] if a field reached this pass without any covering
/// grant, which the path validator is expected to have made impossible.
pub fn inject_cases(ast: Ast, permissions: &[Permission], action: Action) -> Result<Ast> {
    let Ast {
        collection,
        children,
        query,
        cases: _,
    } = ast;

    let (children, cases) = annotate_children(&collection, children, permissions, action)?;
    debug!(collection = %collection, masked = cases.len(), "cases injected");

    Ok(Ast {
        collection,
        children,
        query,
        cases,
    })
}

fn annotate_children(
    collection: &str,
    children: Vec<AstNode>,
    permissions: &[Permission],
    action: Action,
) -> Result<(Vec<AstNode>, CaseMap)> {
    let scope = CollectionScope::build(collection, permissions, action);
    let mut masked_fields = BTreeSet::new();
    let mut annotated = Vec::with_capacity(children.len());

    for child in children {
        let name = child.name().to_owned();
        let when_case = if scope.is_unconditional(&name) {
            trace!(collection, field = %name, "field granted unconditionally, no masking");
            Vec::new()
        } else {
            let branches = scope.branches_for(&name);
            if branches.is_empty() {
                return Err(Error::Internal(format!(
                    "field \"{name}\" in collection \"{collection}\" passed validation but has \
                     no case branch"
                )));
            }
            masked_fields.insert(name.clone());
            branches
        };

        annotated.push(annotate_node(child, when_case, permissions, action)?);
    }

    Ok((annotated, scope.case_map_for(&masked_fields)))
}

fn annotate_node(
    node: AstNode,
    when_case: Vec<CaseBranch>,
    permissions: &[Permission],
    action: Action,
) -> Result<AstNode> {
    let node = match node {
        AstNode::Field(mut inner) => {
            inner.when_case = when_case;
            AstNode::Field(inner)
        }
        AstNode::FunctionField(mut inner) => {
            inner.when_case = when_case;
            AstNode::FunctionField(inner)
        }
        AstNode::NestedOne(mut inner) => {
            let (children, cases) =
                annotate_children(&inner.collection, inner.children, permissions, action)?;
            inner.children = children;
            inner.cases = cases;
            inner.when_case = when_case;
            AstNode::NestedOne(inner)
        }
        AstNode::NestedMany(mut inner) => {
            let (children, cases) =
                annotate_children(&inner.collection, inner.children, permissions, action)?;
            inner.children = children;
            inner.cases = cases;
            inner.when_case = when_case;
            AstNode::NestedMany(inner)
        }
        AstNode::NestedAny(mut inner) => {
            // Polymorphic targets are masked independently: the same field
            // may be conditional under one target collection and
            // unconditional under another.
            let mut annotated_children = std::collections::BTreeMap::new();
            let mut all_cases = std::collections::BTreeMap::new();
            for (target, target_children) in inner.children {
                let (children, cases) =
                    annotate_children(&target, target_children, permissions, action)?;
                annotated_children.insert(target.clone(), children);
                all_cases.insert(target, cases);
            }
            inner.children = annotated_children;
            inner.cases = all_cases;
            inner.when_case = when_case;
            AstNode::NestedAny(inner)
        }
    };
    Ok(node)
}
