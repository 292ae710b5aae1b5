//! Entity trait for types managed by the engine.

use crate::entity::key::Key;
use crate::error::{CoreResult, Violation};
use crate::schema::EntitySchema;
use reldb_storage::Record;

/// Trait for types that can be managed as entities by RelDB.
///
/// Implementors declare their schema statically and convert between the
/// domain value and its stored record. There is no runtime reflection:
/// the schema returned by [`Entity::schema`] is the engine's only source
/// of truth about the type.
///
/// Relationship fields on the domain type are key references
/// ([`super::Ref`] / [`super::RefSet`]); the engine reads and writes
/// them through [`Entity::relation_keys`] / [`Entity::set_relation_keys`]
/// using the relation names declared in the schema.
///
/// # Example
///
/// ```rust,ignore
/// use reldb_core::{Entity, EntitySchema, Key, Ref, RelationshipDescriptor};
/// use reldb_core::{Cardinality, DeleteBehavior};
/// use reldb_storage::Record;
///
/// struct Car {
///     id: String,
///     price: f64,
///     owner: Ref<Owner>,
/// }
///
/// static CAR_SCHEMA: EntitySchema = EntitySchema {
///     name: "Car",
///     key_field: "id",
///     fields: &["price"],
///     relations: &[RelationshipDescriptor {
///         name: "owner",
///         cardinality: Cardinality::ManyToOne,
///         related: "Owner",
///         on_delete: DeleteBehavior::None,
///     }],
/// };
///
/// impl Entity for Car {
///     fn schema() -> &'static EntitySchema { &CAR_SCHEMA }
///     fn key(&self) -> Key { Key::new(&self.id) }
///     // ... to_record / from_record / relation accessors
/// }
/// ```
pub trait Entity: Clone + 'static {
    /// Returns the static schema for this entity type.
    fn schema() -> &'static EntitySchema;

    /// Returns the entity's key (the value of its key field).
    fn key(&self) -> Key;

    /// Encodes the persisted fields, including the key field, as a
    /// record.
    ///
    /// Relationship fields are not encoded here; the engine derives
    /// foreign-key fields and junction rows from the declared relations.
    fn to_record(&self) -> Record;

    /// Decodes an entity from a stored record.
    ///
    /// Only persisted fields are restored; relationship references are
    /// attached afterwards by the relationship resolver.
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidRecord`] if a required field is
    /// missing or unparseable.
    fn from_record(record: &Record) -> CoreResult<Self>;

    /// Returns the canonical key list for a declared relation: at most
    /// one key for a *-to-one relation, ascending sorted keys for a
    /// *-to-many relation.
    ///
    /// An undeclared `relation` name returns an empty list.
    fn relation_keys(&self, relation: &str) -> Vec<Key>;

    /// Replaces the keys held by a declared relation field.
    ///
    /// An undeclared `relation` name is ignored.
    fn set_relation_keys(&mut self, relation: &str, keys: Vec<Key>);

    /// Validates the entity against its declared rules.
    ///
    /// Invoked by the context immediately before persisting the entity.
    /// A non-empty violation list aborts this entity's persistence; the
    /// save cycle reports all failures as one batch.
    fn validate(&self) -> Result<(), Vec<Violation>> {
        Ok(())
    }
}
