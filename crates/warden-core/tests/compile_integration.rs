//! Integration tests for the compilation pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use warden_core::assemble::{apply_parent_filters, Row};
use warden_core::bus::{MutationEvent, MutationKind, Topic};
use warden_core::permissions::{AccessRow, AccessStore, BoxError, POLICIES_COLLECTION};
use warden_core::process::{process_ast, AccessService};
use warden_core::Error;
use warden_types::accountability::Accountability;
use warden_types::ast::{
    Ast, AstNode, FieldNode, NestedAnyNode, NestedManyNode, NestedOneNode, NodeQuery,
};
use warden_types::filter::Filter;
use warden_types::ip::IpRange;
use warden_types::permission::{Action, Permission, Policy};
use warden_types::schema::{CollectionOverview, FieldOverview, FieldType, Relation, SchemaOverview};
use warden_types::value::Value;

/// Store backed by fixed rows, counting fetches.
struct TestStore {
    access: Vec<AccessRow>,
    permissions: Vec<Permission>,
    fetches: Mutex<usize>,
}

impl TestStore {
    fn new(access: Vec<AccessRow>, permissions: Vec<Permission>) -> Self {
        Self {
            access,
            permissions,
            fetches: Mutex::new(0),
        }
    }
}

impl AccessStore for TestStore {
    fn access_rows(&self, _: &Accountability) -> Result<Vec<AccessRow>, BoxError> {
        *self.fetches.lock() += 1;
        Ok(self.access.clone())
    }

    fn permissions_for(
        &self,
        policy_ids: &[String],
        actions: &[Action],
        collections: Option<&[String]>,
    ) -> Result<Vec<Permission>, BoxError> {
        *self.fetches.lock() += 1;
        Ok(self
            .permissions
            .iter()
            .filter(|p| {
                p.policy
                    .as_ref()
                    .is_some_and(|policy| policy_ids.contains(policy))
            })
            .filter(|p| actions.contains(&p.action))
            .filter(|p| match collections {
                Some(collections) => collections.contains(&p.collection),
                None => true,
            })
            .cloned()
            .collect())
    }
}

struct TestContext {
    schema: SchemaOverview,
    access: AccessService,
    store: Arc<TestStore>,
}

impl TestContext {
    fn new(permissions: Vec<Permission>) -> Self {
        Self::with_policies(
            vec![AccessRow {
                id: "assignment-1".into(),
                sort: 1,
                policy: Policy::new("p1"),
            }],
            permissions,
        )
    }

    fn with_policies(access: Vec<AccessRow>, permissions: Vec<Permission>) -> Self {
        let store = Arc::new(TestStore::new(access, permissions));
        Self {
            schema: blog_schema(),
            access: AccessService::new(Arc::clone(&store) as Arc<dyn AccessStore>),
            store,
        }
    }

    fn compile(&self, ast: Ast, accountability: &Accountability) -> Result<Ast, Error> {
        process_ast(ast, Action::Read, accountability, &self.schema, &self.access)
    }
}

fn blog_schema() -> SchemaOverview {
    SchemaOverview::new()
        .with_collection(
            CollectionOverview::new("articles", "id")
                .with_field(FieldOverview::new("title", FieldType::String))
                .with_field(FieldOverview::new("author", FieldType::BigInteger))
                .with_field(FieldOverview::new("links", FieldType::Alias)),
        )
        .with_collection(
            CollectionOverview::new("users", "id")
                .with_field(FieldOverview::new("name", FieldType::String))
                .with_field(FieldOverview::new("email", FieldType::String)),
        )
        .with_collection(
            CollectionOverview::new("links", "id")
                .with_field(FieldOverview::new("article", FieldType::BigInteger))
                .with_field(FieldOverview::new("url", FieldType::String)),
        )
        .with_collection(
            CollectionOverview::new("comments", "id")
                .with_field(FieldOverview::new("item", FieldType::BigInteger))
                .with_field(FieldOverview::new("item_collection", FieldType::String))
                .with_field(FieldOverview::new("body", FieldType::Text)),
        )
        .with_collection(
            CollectionOverview::new("pages", "id")
                .with_field(FieldOverview::new("slug", FieldType::String)),
        )
        .with_relation(Relation::many_to_one("articles", "author", "users"))
        .with_relation(
            Relation::many_to_one("links", "article", "articles").with_one_field("links"),
        )
        .with_relation(Relation::any_to_one(
            "comments",
            "item",
            "item_collection",
            vec!["articles".into(), "pages".into()],
        ))
}

fn author_relation() -> Relation {
    Relation::many_to_one("articles", "author", "users")
}

fn links_relation() -> Relation {
    Relation::many_to_one("links", "article", "articles").with_one_field("links")
}

fn author_name_query() -> Ast {
    Ast::new(
        "articles",
        vec![
            AstNode::Field(FieldNode::new("title")),
            AstNode::NestedOne(NestedOneNode {
                field_key: "author".into(),
                name: "author".into(),
                relation: author_relation(),
                collection: "users".into(),
                children: vec![AstNode::Field(FieldNode::new("name"))],
                query: NodeQuery::default(),
                when_case: Vec::new(),
                cases: Default::default(),
            }),
        ],
    )
}

fn grant(collection: &str, fields: &[&str]) -> Permission {
    Permission::allow_all(collection, Action::Read)
        .for_policy("p1")
        .with_fields(fields.iter().map(|f| (*f).to_owned()).collect())
}

#[test]
fn test_conditional_author_grant_masks_name() {
    let ctx = TestContext::new(vec![
        grant("articles", &["*"]),
        grant("users", &["name"]).with_filter(Filter::eq("id", "$CURRENT_USER")),
    ]);
    let user = Accountability::user("u1");

    let out = ctx.compile(author_name_query(), &user).unwrap();

    let AstNode::NestedOne(author) = &out.children[1] else {
        panic!("author node changed kind");
    };
    let AstNode::Field(name) = &author.children[0] else {
        panic!("name node changed kind");
    };
    assert!(!name.when_case.is_empty());
    assert_eq!(name.when_case[0].when, Filter::eq("id", "$CURRENT_USER"));
}

#[test]
fn test_unconditional_second_grant_unmasks_name() {
    let ctx = TestContext::new(vec![
        grant("articles", &["*"]),
        grant("users", &["name"]).with_filter(Filter::eq("id", "$CURRENT_USER")),
        grant("users", &["name"]),
    ]);
    let user = Accountability::user("u1");

    let out = ctx.compile(author_name_query(), &user).unwrap();

    let AstNode::NestedOne(author) = &out.children[1] else {
        panic!("author node changed kind");
    };
    assert!(author.children[0].when_case().is_empty());
}

#[test]
fn test_no_collection_grant_is_forbidden() {
    let ctx = TestContext::new(vec![grant("articles", &["*"])]);
    let user = Accountability::user("u1");

    let err = ctx.compile(author_name_query(), &user).unwrap_err();
    assert!(matches!(
        err,
        Error::Forbidden {
            ref collection,
            field: None,
        } if collection == "users"
    ));
}

#[test]
fn test_existence_error_beats_permission_error() {
    // No grant on users at all, but the queried field does not exist
    // either; the existence error must win.
    let ctx = TestContext::new(vec![grant("articles", &["*"])]);
    let user = Accountability::user("u1");

    let ast = Ast::new(
        "articles",
        vec![AstNode::NestedOne(NestedOneNode {
            field_key: "author".into(),
            name: "author".into(),
            relation: author_relation(),
            collection: "users".into(),
            children: vec![AstNode::Field(FieldNode::new("shoe_size"))],
            query: NodeQuery::default(),
            when_case: Vec::new(),
            cases: Default::default(),
        })],
    );

    let err = ctx.compile(ast, &user).unwrap_err();
    assert!(matches!(
        err,
        Error::FieldNotFound {
            ref collection,
            ref field,
        } if collection == "users" && field == "shoe_size"
    ));
}

#[test]
fn test_o2m_fetch_always_includes_foreign_key() {
    let ctx = TestContext::new(vec![grant("articles", &["*"]), grant("links", &["*"])]);
    let user = Accountability::user("u1");

    let ast = Ast::new(
        "articles",
        vec![AstNode::NestedMany(NestedManyNode {
            field_key: "links".into(),
            name: "links".into(),
            relation: links_relation(),
            collection: "links".into(),
            children: vec![AstNode::Field(FieldNode::new("url"))],
            query: NodeQuery::default(),
            when_case: Vec::new(),
            cases: Default::default(),
        })],
    );

    let out = ctx.compile(ast, &user).unwrap();

    let parents: Vec<Row> = vec![
        [("id".to_owned(), Value::Integer(1))].into_iter().collect(),
        [("id".to_owned(), Value::Integer(2))].into_iter().collect(),
    ];
    let fetches = apply_parent_filters(&ctx.schema, &out.children, &parents).unwrap();

    assert_eq!(fetches.len(), 1);
    assert!(fetches[0].extra_fields.contains(&"article".to_owned()));
    assert_eq!(
        fetches[0].filter,
        Filter::is_in("article", vec![Value::Integer(1), Value::Integer(2)])
    );
}

#[test]
fn test_a2o_partial_visibility_per_target() {
    // Articles are granted conditionally, pages unconditionally; the same
    // polymorphic child field masks under one target and not the other.
    let ctx = TestContext::new(vec![
        grant("comments", &["*"]),
        grant("articles", &["title"]).with_filter(Filter::eq("status", "published")),
        grant("pages", &["slug"]),
    ]);
    let user = Accountability::user("u1");

    let mut children = BTreeMap::new();
    children.insert(
        "articles".to_owned(),
        vec![AstNode::Field(FieldNode::new("title"))],
    );
    children.insert(
        "pages".to_owned(),
        vec![AstNode::Field(FieldNode::new("slug"))],
    );

    let ast = Ast::new(
        "comments",
        vec![
            AstNode::Field(FieldNode::new("body")),
            AstNode::NestedAny(NestedAnyNode {
                field_key: "item".into(),
                name: "item".into(),
                relation: Relation::any_to_one(
                    "comments",
                    "item",
                    "item_collection",
                    vec!["articles".into(), "pages".into()],
                ),
                children,
                queries: BTreeMap::new(),
                when_case: Vec::new(),
                cases: BTreeMap::new(),
            }),
        ],
    );

    let out = ctx.compile(ast, &user).unwrap();

    let AstNode::NestedAny(item) = &out.children[1] else {
        panic!("item node changed kind");
    };
    assert!(!item.children["articles"][0].when_case().is_empty());
    assert!(item.children["pages"][0].when_case().is_empty());
}

#[test]
fn test_ip_restricted_policy_only_applies_from_inside() {
    let restricted = Policy::new("p1").with_ip_access(vec!["10.0.0.0/8".parse::<IpRange>().unwrap()]);
    let permissions = vec![grant("articles", &["*"]), grant("users", &["*"])];
    let access_rows = vec![AccessRow {
        id: "assignment-1".into(),
        sort: 1,
        policy: restricted,
    }];

    let inside = TestContext::with_policies(access_rows.clone(), permissions.clone());
    let user = Accountability::user("u1").with_ip("10.1.2.3".parse().unwrap());
    assert!(inside.compile(author_name_query(), &user).is_ok());

    let outside = TestContext::with_policies(access_rows, permissions);
    let user = Accountability::user("u1").with_ip("192.168.0.1".parse().unwrap());
    let err = outside.compile(author_name_query(), &user).unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));
}

#[test]
fn test_cache_reuse_and_invalidation_across_compiles() {
    let ctx = TestContext::new(vec![grant("articles", &["*"]), grant("users", &["*"])]);
    let user = Accountability::user("u1");

    ctx.compile(author_name_query(), &user).unwrap();
    let fetches_after_first = *ctx.store.fetches.lock();
    assert_eq!(fetches_after_first, 2);

    // Second compile is served entirely from cache.
    ctx.compile(author_name_query(), &user).unwrap();
    assert_eq!(*ctx.store.fetches.lock(), fetches_after_first);

    // Mutating the backing policy clears both entries; the next compile
    // hits the store again.
    ctx.access.bus().publish(&MutationEvent {
        topic: Topic::new(POLICIES_COLLECTION, MutationKind::Update),
        keys: vec!["p1".into()],
    });
    ctx.compile(author_name_query(), &user).unwrap();
    assert_eq!(*ctx.store.fetches.lock(), fetches_after_first + 2);
}

#[test]
fn test_admin_compiles_without_store_or_annotation() {
    let ctx = TestContext::new(Vec::new());
    let admin = Accountability::admin("root");

    let out = ctx.compile(author_name_query(), &admin).unwrap();
    assert!(out.cases.is_empty());
    assert_eq!(*ctx.store.fetches.lock(), 0);
}
