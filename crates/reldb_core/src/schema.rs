//! Static entity schemas and the schema registry.
//!
//! Schemas replace runtime reflection: each entity type declares its key
//! field, persisted fields, and relationship descriptors as `'static`
//! data. The registry is built once when a context is constructed,
//! validated there, and never mutated afterwards. Every misdeclaration
//! is a construction-time [`CoreError::Schema`], not a runtime surprise.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Relationship shape between two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one on both sides; the declaring side owns the foreign
    /// key.
    OneToOne,
    /// The declaring side is the "one"; related records carry the
    /// foreign key.
    OneToMany,
    /// The declaring side is the "many" and owns the foreign key.
    ManyToOne,
    /// Any number on both sides, stored in a junction table.
    ManyToMany,
}

/// What happens to the other side of a relationship when one side is
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteBehavior {
    /// Delete the related records too.
    Cascade,
    /// Clear the foreign key on the related records and keep them.
    SetNull,
    /// No action; the reference is left dangling by design.
    Restrict,
    /// The related record is cleaned up by the post-save orphan sweep
    /// once no owner references it.
    Orphan,
    /// No action.
    None,
}

/// Declares one relationship of an entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipDescriptor {
    /// The relation field name on the declaring type.
    pub name: &'static str,
    /// The relationship shape.
    pub cardinality: Cardinality,
    /// Type name of the related entity.
    pub related: &'static str,
    /// Delete behavior applied across this relationship.
    pub on_delete: DeleteBehavior,
}

impl RelationshipDescriptor {
    /// Returns `true` for the *-to-one shapes, where the declaring side
    /// holds the foreign key.
    #[must_use]
    pub fn is_to_one(&self) -> bool {
        matches!(
            self.cardinality,
            Cardinality::OneToOne | Cardinality::ManyToOne
        )
    }
}

/// Static description of one entity type.
///
/// The single `key_field` makes the exactly-one-key invariant
/// structural; `fields` lists the remaining persisted fields.
#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    /// The entity type name; also the table name.
    pub name: &'static str,
    /// The key field name.
    pub key_field: &'static str,
    /// Persisted non-key field names.
    pub fields: &'static [&'static str],
    /// Declared relationships.
    pub relations: &'static [RelationshipDescriptor],
}

impl EntitySchema {
    /// Returns the descriptor for a declared relation name.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }
}

/// Legal `(cardinality, delete behavior)` combinations.
///
/// Anything outside this table is a schema-construction error.
fn behavior_is_legal(cardinality: Cardinality, behavior: DeleteBehavior) -> bool {
    use Cardinality::*;
    use DeleteBehavior::*;
    match cardinality {
        OneToOne => matches!(behavior, Cascade | SetNull | Orphan),
        OneToMany => matches!(behavior, Cascade | SetNull),
        ManyToOne => matches!(behavior, None | Restrict | SetNull | Cascade),
        ManyToMany => matches!(behavior, Cascade | None),
    }
}

/// Returns the deterministic foreign-key field name for records
/// referencing `related`: `<TypeName>_<key field>`.
#[must_use]
pub fn fk_field(related: &EntitySchema) -> String {
    format!("{}_{}", related.name, related.key_field)
}

/// Returns the deterministic junction table name for a many-to-many
/// relationship between two types: the type names joined with `_` in
/// ascending alphabetical order, so both sides resolve the same table.
#[must_use]
pub fn junction_table(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

/// The set of entity schemas a context manages.
///
/// Built once by the context builder and immutable afterwards.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<&'static str, &'static EntitySchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type's schema.
    ///
    /// # Errors
    ///
    /// Returns a schema error for a duplicate registration or a
    /// misdeclared schema (see [`SchemaRegistry::check_schema`]).
    pub fn register<T: Entity>(&mut self) -> CoreResult<()> {
        let schema = T::schema();
        Self::check_schema(schema)?;
        if self.schemas.insert(schema.name, schema).is_some() {
            return Err(CoreError::schema(format!(
                "entity type '{}' registered twice",
                schema.name
            )));
        }
        Ok(())
    }

    /// Returns the schema for a type name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if the type was never
    /// registered.
    pub fn get(&self, name: &str) -> CoreResult<&'static EntitySchema> {
        self.schemas
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    /// Returns `true` if the type name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Returns an iterator over the registered schemas in name order.
    pub fn iter(&self) -> impl Iterator<Item = &'static EntitySchema> + '_ {
        self.schemas.values().copied()
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns `true` if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validates one schema in isolation.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the key field reappears in the field
    /// list, a field or relation name is duplicated, or a relation
    /// declares an illegal `(cardinality, delete behavior)` pair.
    fn check_schema(schema: &EntitySchema) -> CoreResult<()> {
        if schema.name.is_empty() || schema.key_field.is_empty() {
            return Err(CoreError::schema(format!(
                "entity type '{}' must declare a non-empty name and key field",
                schema.name
            )));
        }
        if schema.fields.contains(&schema.key_field) {
            return Err(CoreError::schema(format!(
                "'{}': key field '{}' must not reappear in the field list",
                schema.name, schema.key_field
            )));
        }
        for (i, field) in schema.fields.iter().enumerate() {
            if schema.fields[..i].contains(field) {
                return Err(CoreError::schema(format!(
                    "'{}': duplicate field '{}'",
                    schema.name, field
                )));
            }
        }
        for (i, relation) in schema.relations.iter().enumerate() {
            if schema.relations[..i].iter().any(|r| r.name == relation.name) {
                return Err(CoreError::schema(format!(
                    "'{}': duplicate relation '{}'",
                    schema.name, relation.name
                )));
            }
            if !behavior_is_legal(relation.cardinality, relation.on_delete) {
                return Err(CoreError::schema(format!(
                    "'{}.{}': {:?} is not a legal delete behavior for {:?}",
                    schema.name, relation.name, relation.on_delete, relation.cardinality
                )));
            }
        }
        Ok(())
    }

    /// Validates cross-type consistency after all types are registered.
    ///
    /// # Errors
    ///
    /// Returns a schema error if a relation references an unregistered
    /// type, two *-to-one relations of one type would share a
    /// foreign-key field, a many-to-many relation is self-referential,
    /// or a type declares more than one many-to-many relation to the
    /// same related type (the reverse-descriptor lookup used by delete
    /// propagation would be ambiguous).
    pub fn validate(&self) -> CoreResult<()> {
        for schema in self.iter() {
            for relation in schema.relations {
                if !self.contains(relation.related) {
                    return Err(CoreError::schema(format!(
                        "'{}.{}' references unregistered type '{}'",
                        schema.name, relation.name, relation.related
                    )));
                }
            }

            let to_one: Vec<_> = schema.relations.iter().filter(|r| r.is_to_one()).collect();
            for (i, relation) in to_one.iter().enumerate() {
                if to_one[..i].iter().any(|r| r.related == relation.related) {
                    return Err(CoreError::schema(format!(
                        "'{}': two to-one relations to '{}' would share \
                         the foreign-key field",
                        schema.name, relation.related
                    )));
                }
            }

            let many_to_many: Vec<_> = schema
                .relations
                .iter()
                .filter(|r| r.cardinality == Cardinality::ManyToMany)
                .collect();
            for (i, relation) in many_to_many.iter().enumerate() {
                if relation.related == schema.name {
                    return Err(CoreError::schema(format!(
                        "'{}.{}': self-referential many-to-many is not supported",
                        schema.name, relation.name
                    )));
                }
                if many_to_many[..i].iter().any(|r| r.related == relation.related) {
                    return Err(CoreError::schema(format!(
                        "'{}': more than one many-to-many relation to '{}' \
                         is not supported",
                        schema.name, relation.related
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the many-to-many descriptor on `related` that points back
    /// to `type_name`, if declared.
    ///
    /// Unambiguous by construction: [`SchemaRegistry::validate`] rejects
    /// multiple candidates.
    pub(crate) fn reverse_many_to_many(
        &self,
        related: &EntitySchema,
        type_name: &str,
    ) -> Option<&'static RelationshipDescriptor> {
        related
            .relations
            .iter()
            .find(|r| r.cardinality == Cardinality::ManyToMany && r.related == type_name)
    }
}
