//! Top-level compilation pipeline.
//!
//! `process_ast` takes a parsed query tree and an identity and returns the
//! tree annotated with masking cases, or an error. The order is fixed:
//! existence is validated for every path before any permission check, so a
//! malformed query never masquerades as a permission denial, admins
//! included.

use std::sync::Arc;

use tracing::debug;
use warden_types::accountability::Accountability;
use warden_types::ast::Ast;
use warden_types::permission::{Action, Permission};
use warden_types::schema::SchemaOverview;

use crate::bus::EventBus;
use crate::cases::inject_cases;
use crate::error::Result;
use crate::fieldmap::field_map_from_ast;
use crate::permissions::{AccessStore, FetchPermissionsArgs, PermissionCache};
use crate::validate::validate_field_map;

/// The access store, permission cache, and invalidation bus bundled for
/// the pipeline. Mutation publishers share the bus via [`bus`](Self::bus).
pub struct AccessService {
    store: Arc<dyn AccessStore>,
    cache: PermissionCache,
    bus: Arc<EventBus>,
}

impl AccessService {
    /// Wire a service around a store, with a fresh bus and empty cache.
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        let bus = Arc::new(EventBus::new());
        Self::with_bus(store, bus)
    }

    /// Wire a service around a store and an existing bus.
    pub fn with_bus(store: Arc<dyn AccessStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            cache: PermissionCache::new(Arc::clone(&bus)),
            bus,
        }
    }

    /// The invalidation bus mutations must publish on.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The cache layer, exposed for stats.
    pub fn cache(&self) -> &PermissionCache {
        &self.cache
    }

    /// Resolve the permission rows relevant to a query: the requested
    /// action plus read, restricted to the touched collections.
    fn permissions_for(
        &self,
        accountability: &Accountability,
        action: Action,
        collections: &[String],
    ) -> Result<Arc<Vec<Permission>>> {
        let policies = self.cache.fetch_policies(self.store.as_ref(), accountability)?;

        let mut actions = vec![action];
        if action != Action::Read {
            actions.push(Action::Read);
        }

        let args = FetchPermissionsArgs {
            policies: &policies,
            actions: &actions,
            collections: Some(collections),
            accountability,
        };
        self.cache.fetch_permissions(self.store.as_ref(), &args)
    }
}

/// Compile a query tree against an identity's permissions.
///
/// Steps: build the field map, validate existence for every path, short
/// circuit for admins, resolve permissions (the accountability's
/// pre-resolved rows win over a fetch), validate permissions per path,
/// then inject the masking cases and return the annotated tree.
pub fn process_ast(
    ast: Ast,
    action: Action,
    accountability: &Accountability,
    schema: &SchemaOverview,
    access: &AccessService,
) -> Result<Ast> {
    let field_map = field_map_from_ast(&ast, schema);

    if accountability.admin {
        // Admins skip permission checks, never existence checks.
        validate_field_map(&field_map, schema, None, action)?;
        debug!(collection = %ast.collection, "admin query, no case injection");
        return Ok(ast);
    }

    let collections: Vec<String> = field_map.collections().into_iter().collect();
    let fetched;
    let permissions: &[Permission] = match &accountability.permissions {
        Some(resolved) => resolved,
        None => {
            fetched = access.permissions_for(accountability, action, &collections)?;
            &fetched
        }
    };

    validate_field_map(&field_map, schema, Some(permissions), action)?;

    let annotated = inject_cases(ast, permissions, action)?;
    debug!(collection = %annotated.collection, action = %action, "query compiled");
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::permissions::fetch::tests::MemoryStore;
    use crate::permissions::fetch::AccessRow;
    use warden_types::ast::{AstNode, FieldNode, NestedOneNode, NodeQuery};
    use warden_types::filter::Filter;
    use warden_types::permission::Policy;
    use warden_types::schema::{CollectionOverview, FieldOverview, FieldType, Relation};

    fn schema() -> SchemaOverview {
        SchemaOverview::new()
            .with_collection(
                CollectionOverview::new("articles", "id")
                    .with_field(FieldOverview::new("title", FieldType::String))
                    .with_field(FieldOverview::new("author", FieldType::BigInteger)),
            )
            .with_collection(
                CollectionOverview::new("users", "id")
                    .with_field(FieldOverview::new("name", FieldType::String)),
            )
            .with_relation(Relation::many_to_one("articles", "author", "users"))
    }

    fn author_query() -> Ast {
        Ast::new(
            "articles",
            vec![
                AstNode::Field(FieldNode::new("title")),
                AstNode::NestedOne(NestedOneNode {
                    field_key: "author".into(),
                    name: "author".into(),
                    relation: Relation::many_to_one("articles", "author", "users"),
                    collection: "users".into(),
                    children: vec![AstNode::Field(FieldNode::new("name"))],
                    query: NodeQuery::default(),
                    when_case: Vec::new(),
                    cases: Default::default(),
                }),
            ],
        )
    }

    fn service(permissions: Vec<Permission>) -> AccessService {
        let store = MemoryStore::new(
            vec![AccessRow {
                id: "a1".into(),
                sort: 1,
                policy: Policy::new("p1"),
            }],
            permissions,
        );
        AccessService::new(Arc::new(store))
    }

    #[test]
    fn test_admin_skips_permissions_not_existence() {
        let admin = Accountability::admin("root");
        let access = service(Vec::new());

        let out = process_ast(
            author_query(),
            Action::Read,
            &admin,
            &schema(),
            &access,
        )
        .unwrap();
        assert!(out.cases.is_empty());

        let bad = Ast::new("articles", vec![AstNode::Field(FieldNode::new("ghost"))]);
        let err = process_ast(bad, Action::Read, &admin, &schema(), &access).unwrap_err();
        assert!(matches!(err, Error::FieldNotFound { .. }));
    }

    #[test]
    fn test_missing_collection_grant_is_forbidden() {
        let user = Accountability::user("u1");
        let access = service(vec![
            Permission::allow_all("articles", Action::Read).for_policy("p1")
        ]);

        let err = process_ast(author_query(), Action::Read, &user, &schema(), &access)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Forbidden {
                ref collection,
                field: None,
            } if collection == "users"
        ));
    }

    #[test]
    fn test_conditional_grant_attaches_when_case() {
        let user = Accountability::user("u1");
        let access = service(vec![
            Permission::allow_all("articles", Action::Read).for_policy("p1"),
            Permission::allow_all("users", Action::Read)
                .for_policy("p1")
                .with_fields(vec!["name".into()])
                .with_filter(Filter::eq("id", "$CURRENT_USER")),
        ]);

        let out = process_ast(author_query(), Action::Read, &user, &schema(), &access).unwrap();

        let AstNode::NestedOne(author) = &out.children[1] else {
            panic!("author node changed kind");
        };
        let AstNode::Field(name) = &author.children[0] else {
            panic!("name node changed kind");
        };
        assert!(!name.when_case.is_empty());
    }

    #[test]
    fn test_update_filtering_on_readable_field_passes() {
        let user = Accountability::user("u1");
        let access = service(vec![
            Permission::allow_all("articles", Action::Read).for_policy("p1"),
            Permission::allow_all("articles", Action::Update)
                .for_policy("p1")
                .with_fields(vec!["title".into()]),
        ]);

        // Emit title (update-granted), filter on author (read-granted only).
        let ast = Ast::new("articles", vec![AstNode::Field(FieldNode::new("title"))])
            .with_query(NodeQuery::filtered(Filter::eq("author", "u1")));

        process_ast(ast, Action::Update, &user, &schema(), &access).unwrap();
    }

    #[test]
    fn test_update_with_only_read_grant_is_forbidden() {
        let user = Accountability::user("u1");
        let access = service(vec![
            Permission::allow_all("articles", Action::Read).for_policy("p1")
        ]);

        let ast = Ast::new("articles", vec![AstNode::Field(FieldNode::new("title"))]);
        let err = process_ast(ast, Action::Update, &user, &schema(), &access).unwrap_err();
        assert!(matches!(
            err,
            Error::Forbidden {
                ref collection,
                field: None,
            } if collection == "articles"
        ));
    }

    #[test]
    fn test_preresolved_permissions_bypass_store() {
        let store = MemoryStore::new(Vec::new(), Vec::new());
        let access = AccessService::new(Arc::new(store));

        let user = Accountability::user("u1").with_permissions(vec![
            Permission::allow_all("articles", Action::Read),
            Permission::allow_all("users", Action::Read),
        ]);

        let out = process_ast(author_query(), Action::Read, &user, &schema(), &access).unwrap();
        assert_eq!(out.collection, "articles");
        assert_eq!(access.cache().stats().misses(), 0);
    }
}
