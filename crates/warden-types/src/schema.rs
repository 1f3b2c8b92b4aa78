//! Read-only schema overview supplied by the external schema service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar type of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInteger,
    /// Floating point.
    Float,
    /// Fixed-precision decimal.
    Decimal,
    /// Short string.
    String,
    /// Long text.
    Text,
    /// Boolean.
    Boolean,
    /// UUID.
    Uuid,
    /// Date without time.
    Date,
    /// Timestamp with timezone.
    Timestamp,
    /// Structured JSON.
    Json,
    /// Presentation-only field with no stored column (one-to-many reverse
    /// aliases, any-to-one groupings).
    Alias,
}

impl FieldType {
    /// Whether values of this type are numeric (drives operator coercion).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::BigInteger | FieldType::Float | FieldType::Decimal
        )
    }

    /// Whether this type coerces to integers rather than floats.
    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::BigInteger)
    }

    /// Whether date-part functions apply to this type.
    pub fn is_datetime(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Timestamp)
    }
}

/// Metadata for one field of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOverview {
    /// Field name.
    pub field: String,
    /// Scalar type.
    pub field_type: FieldType,
    /// Whether null is a legal stored value.
    pub nullable: bool,
}

impl FieldOverview {
    /// Create a nullable field.
    pub fn new(field: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field: field.into(),
            field_type,
            nullable: true,
        }
    }

    /// Mark the field non-nullable.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Metadata for one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOverview {
    /// Collection name.
    pub collection: String,
    /// Primary key field name.
    pub primary_key: String,
    /// Fields keyed by name.
    pub fields: BTreeMap<String, FieldOverview>,
}

impl CollectionOverview {
    /// Create a collection with the given primary key (pre-registered as a
    /// big-integer field; override with [`with_field`](Self::with_field)).
    pub fn new(collection: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let collection = collection.into();
        let primary_key = primary_key.into();
        let mut fields = BTreeMap::new();
        fields.insert(
            primary_key.clone(),
            FieldOverview::new(primary_key.clone(), FieldType::BigInteger).not_null(),
        );
        Self {
            collection,
            primary_key,
            fields,
        }
    }

    /// Add or replace a field.
    pub fn with_field(mut self, field: FieldOverview) -> Self {
        self.fields.insert(field.field.clone(), field);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldOverview> {
        self.fields.get(name)
    }
}

/// Extra metadata on a relation.
///
/// `one_field` names the alias on the "one" side that exposes the related
/// many-rows; the `one_collection_field` / `one_allowed_collections` pair
/// describes any-to-one discriminators.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationMeta {
    /// Alias field on the related ("one") collection, if declared.
    pub one_field: Option<String>,
    /// Junction field for relations routed through a join collection.
    pub junction_field: Option<String>,
    /// Field holding manual sort order for one-to-many children.
    pub sort_field: Option<String>,
    /// Discriminator column naming the target collection (any-to-one only).
    pub one_collection_field: Option<String>,
    /// Collections the discriminator may name (any-to-one only).
    pub one_allowed_collections: Vec<String>,
}

/// A declared relation between two collections.
///
/// `collection`/`field` always name the "many" side holding the foreign
/// key. Any-to-one relations leave `related_collection` unset and list the
/// possible targets in `meta.one_allowed_collections`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Collection holding the foreign key.
    pub collection: String,
    /// Foreign key field.
    pub field: String,
    /// Target collection, unset for any-to-one relations.
    pub related_collection: Option<String>,
    /// Relation metadata.
    pub meta: RelationMeta,
}

impl Relation {
    /// Declare a many-to-one relation (with its one-to-many reverse alias).
    pub fn many_to_one(
        collection: impl Into<String>,
        field: impl Into<String>,
        related_collection: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            related_collection: Some(related_collection.into()),
            meta: RelationMeta::default(),
        }
    }

    /// Declare an any-to-one relation over the given discriminator column.
    pub fn any_to_one(
        collection: impl Into<String>,
        field: impl Into<String>,
        one_collection_field: impl Into<String>,
        one_allowed_collections: Vec<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            related_collection: None,
            meta: RelationMeta {
                one_collection_field: Some(one_collection_field.into()),
                one_allowed_collections,
                ..RelationMeta::default()
            },
        }
    }

    /// Name the reverse alias on the "one" side.
    pub fn with_one_field(mut self, one_field: impl Into<String>) -> Self {
        self.meta.one_field = Some(one_field.into());
        self
    }

    /// Declare a manual sort field for one-to-many children.
    pub fn with_sort_field(mut self, sort_field: impl Into<String>) -> Self {
        self.meta.sort_field = Some(sort_field.into());
        self
    }

    /// Whether this relation is any-to-one (polymorphic).
    pub fn is_any(&self) -> bool {
        self.related_collection.is_none() && !self.meta.one_allowed_collections.is_empty()
    }
}

/// A snapshot of the full schema: collections plus declared relations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaOverview {
    /// Collections keyed by name.
    pub collections: BTreeMap<String, CollectionOverview>,
    /// Declared relations.
    pub relations: Vec<Relation>,
}

impl SchemaOverview {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a collection.
    pub fn with_collection(mut self, collection: CollectionOverview) -> Self {
        self.collections
            .insert(collection.collection.clone(), collection);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Look up a collection by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionOverview> {
        self.collections.get(name)
    }

    /// Primary key field name for a collection.
    pub fn primary_key(&self, collection: &str) -> Option<&str> {
        self.collections
            .get(collection)
            .map(|c| c.primary_key.as_str())
    }
}
