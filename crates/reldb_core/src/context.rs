//! Context: the engine's facade and save-cycle orchestrator.

use crate::entity::{Entity, Key};
use crate::error::{CoreError, CoreResult};
use crate::graph::DependencyGraph;
use crate::query::{OrderKey, QueryBuilder, QueryCondition};
use crate::resolver::{self, SaveEnv, TableWorkspace};
use crate::schema::SchemaRegistry;
use crate::set::{EntitySet, EntitySetOps};
use reldb_storage::TableStore;
use std::collections::BTreeMap;
use tracing::debug;

/// Builds a [`Context`] from entity type registrations.
///
/// Registration errors are deferred and surfaced by
/// [`ContextBuilder::build`], so the chain stays fluent. All schema
/// validation happens at build time; a built context never raises a
/// schema error.
#[derive(Default)]
pub struct ContextBuilder {
    registry: SchemaRegistry,
    sets: BTreeMap<&'static str, Box<dyn EntitySetOps>>,
    deferred: Option<CoreError>,
}

impl ContextBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type with the context under construction.
    #[must_use]
    pub fn register<T: Entity>(mut self) -> Self {
        if self.deferred.is_some() {
            return self;
        }
        match self.registry.register::<T>() {
            Ok(()) => {
                self.sets
                    .insert(T::schema().name, Box::new(EntitySet::<T>::new()));
            }
            Err(error) => self.deferred = Some(error),
        }
        self
    }

    /// Validates the registered schemas and builds the context over the
    /// given store.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, or a schema error from
    /// cross-type validation (unregistered related types, ambiguous
    /// many-to-many declarations, foreign-key field collisions).
    pub fn build(self, store: Box<dyn TableStore>) -> CoreResult<Context> {
        if let Some(error) = self.deferred {
            return Err(error);
        }
        self.registry.validate()?;
        Ok(Context {
            registry: self.registry,
            sets: self.sets,
            store,
        })
    }
}

/// The engine facade: owns the schema registry, one entity set per
/// registered type, and the table store handle.
///
/// A context is single-threaded and synchronous; `save_changes` and
/// query execution run to completion on the calling thread. Dropping
/// the context releases the store handle.
///
/// # Example
///
/// ```rust,ignore
/// use reldb_core::Context;
/// use reldb_storage::InMemoryStore;
///
/// let mut ctx = Context::builder()
///     .register::<Owner>()
///     .register::<Car>()
///     .build(Box::new(InMemoryStore::new()))?;
///
/// ctx.set::<Owner>()?.add(owner);
/// ctx.set::<Car>()?.add(car);
/// ctx.save_changes()?;
/// ```
pub struct Context {
    registry: SchemaRegistry,
    sets: BTreeMap<&'static str, Box<dyn EntitySetOps>>,
    store: Box<dyn TableStore>,
}

impl Context {
    /// Starts building a context.
    #[must_use]
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Returns the schema registry.
    #[must_use]
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Returns the entity set for a registered type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownType`] if `T` was not registered.
    pub fn set<T: Entity>(&mut self) -> CoreResult<&mut EntitySet<T>> {
        let name = T::schema().name;
        let ops = self
            .sets
            .get_mut(name)
            .ok_or_else(|| CoreError::unknown_type(name))?;
        ops.as_any_mut()
            .downcast_mut::<EntitySet<T>>()
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    fn typed_set<T: Entity>(&self) -> CoreResult<&EntitySet<T>> {
        let name = T::schema().name;
        let ops = self
            .sets
            .get(name)
            .ok_or_else(|| CoreError::unknown_type(name))?;
        ops.as_any()
            .downcast_ref::<EntitySet<T>>()
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    /// Loads an entity by key, expecting it to exist.
    ///
    /// An already-tracked entity is returned as-is. Otherwise the
    /// record is fetched, its reachable relationship subgraph hydrated,
    /// and the result tracked.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no such record exists or the
    /// tracked entity is marked deleted.
    pub fn find<T: Entity>(&mut self, key: impl Into<Key>) -> CoreResult<T> {
        let key = key.into();
        let schema = T::schema();
        let name = schema.name;

        {
            let set = self.typed_set::<T>()?;
            if let Some(value) = set.get(&key) {
                return Ok(value.clone());
            }
            if set.is_marked_deleted(&key) {
                return Err(CoreError::not_found(name, key.as_str()));
            }
        }

        let mut workspace = TableWorkspace::new(self.store.as_ref());
        let Some(record) = resolver::find_record(&mut workspace, schema, &key)? else {
            return Err(CoreError::not_found(name, key.as_str()));
        };
        resolver::hydrate_graph(&self.registry, &mut self.sets, &mut workspace, name, record)?;

        self.typed_set::<T>()?
            .get(&key)
            .cloned()
            .ok_or_else(|| CoreError::not_found(name, key.as_str()))
    }

    /// Starts a query over one entity type.
    #[must_use]
    pub fn query<T: Entity>(&mut self) -> QueryBuilder<'_, T> {
        QueryBuilder::new(self)
    }

    /// Persists every pending change in dependency order.
    ///
    /// The cycle:
    /// 1. builds the dependency graph and topologically sorts it - a
    ///    cycle aborts the whole call before any write;
    /// 2. runs each type's save pass in reverse topological order,
    ///    dependents first, so cascades still find the types they touch
    ///    unfinalized;
    /// 3. runs the orphan sweep;
    /// 4. flushes every dirty table.
    ///
    /// # Errors
    ///
    /// [`CoreError::Cycle`] and [`CoreError::DuplicateKey`] abort the
    /// call with nothing flushed. Validation failures are collected
    /// across the whole pass and returned as one
    /// [`CoreError::Validation`] batch after the other entities have
    /// been persisted.
    pub fn save_changes(&mut self) -> CoreResult<()> {
        let order = DependencyGraph::build(&self.registry).save_order()?;
        debug!(?order, "save cycle");

        let mut workspace = TableWorkspace::new(self.store.as_ref());
        let mut failures = Vec::new();

        for type_name in order {
            let Some(mut set) = self.sets.remove(type_name) else {
                continue;
            };
            let result = set.save_pass(&mut SaveEnv {
                registry: &self.registry,
                workspace: &mut workspace,
                sets: &mut self.sets,
                failures: &mut failures,
            });
            self.sets.insert(type_name, set);
            result?;
        }

        let swept = resolver::orphan_sweep(&self.registry, &mut workspace)?;
        for (type_name, key) in swept {
            if let Some(set) = self.sets.get_mut(type_name) {
                set.untrack(&key);
            }
        }

        workspace.flush()?;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation { failures })
        }
    }

    pub(crate) fn run_query<T: Entity>(
        &mut self,
        conditions: &[QueryCondition],
        order: &[OrderKey],
        skip: Option<usize>,
        take: Option<usize>,
    ) -> CoreResult<Vec<T>> {
        let schema = T::schema();
        if !self.registry.contains(schema.name) {
            return Err(CoreError::unknown_type(schema.name));
        }

        let mut workspace = TableWorkspace::new(self.store.as_ref());

        let mut selected: Vec<_> = workspace
            .table(schema.name)?
            .iter()
            .filter(|record| conditions.iter().all(|c| c.matches(record)))
            .cloned()
            .collect();
        crate::query::order_records(&mut selected, order);

        let paged = selected.into_iter().skip(skip.unwrap_or(0));
        let selected: Vec<_> = match take {
            Some(n) => paged.take(n).collect(),
            None => paged.collect(),
        };

        for record in &selected {
            resolver::hydrate_graph(
                &self.registry,
                &mut self.sets,
                &mut workspace,
                schema.name,
                record.clone(),
            )?;
        }

        let set = self.typed_set::<T>()?;
        let mut results = Vec::with_capacity(selected.len());
        for record in &selected {
            let Some(key) = record.get(schema.key_field) else {
                return Err(CoreError::invalid_record(
                    schema.name,
                    format!("missing key field '{}'", schema.key_field),
                ));
            };
            // A record whose tracked instance is marked deleted is
            // pending removal; it is not handed back.
            if let Some(entity) = set.get(&Key::from(key)) {
                results.push(entity.clone());
            }
        }
        Ok(results)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("types", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, DeleteBehavior, EntitySchema, RelationshipDescriptor};
    use reldb_storage::{InMemoryStore, Record};

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    static NOTE_SCHEMA: EntitySchema = EntitySchema {
        name: "Note",
        key_field: "id",
        fields: &["text"],
        relations: &[],
    };

    impl Entity for Note {
        fn schema() -> &'static EntitySchema {
            &NOTE_SCHEMA
        }
        fn key(&self) -> Key {
            Key::new(&self.id)
        }
        fn to_record(&self) -> Record {
            let mut record = Record::new();
            record.set("id", &self.id);
            record.set("text", &self.text);
            record
        }
        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                id: record.get("id").unwrap_or_default().to_string(),
                text: record.get("text").unwrap_or_default().to_string(),
            })
        }
        fn relation_keys(&self, _relation: &str) -> Vec<Key> {
            Vec::new()
        }
        fn set_relation_keys(&mut self, _relation: &str, _keys: Vec<Key>) {}
    }

    fn context() -> Context {
        Context::builder()
            .register::<Note>()
            .build(Box::new(InMemoryStore::new()))
            .unwrap()
    }

    #[test]
    fn unregistered_type_is_an_error() {
        #[derive(Clone)]
        struct Ghost;
        static GHOST_SCHEMA: EntitySchema = EntitySchema {
            name: "Ghost",
            key_field: "id",
            fields: &[],
            relations: &[],
        };
        impl Entity for Ghost {
            fn schema() -> &'static EntitySchema {
                &GHOST_SCHEMA
            }
            fn key(&self) -> Key {
                Key::new("")
            }
            fn to_record(&self) -> Record {
                Record::new()
            }
            fn from_record(_record: &Record) -> CoreResult<Self> {
                Ok(Self)
            }
            fn relation_keys(&self, _relation: &str) -> Vec<Key> {
                Vec::new()
            }
            fn set_relation_keys(&mut self, _relation: &str, _keys: Vec<Key>) {}
        }

        let mut ctx = context();
        assert!(matches!(
            ctx.set::<Ghost>(),
            Err(CoreError::UnknownType { .. })
        ));
        assert!(matches!(
            ctx.find::<Ghost>("1"),
            Err(CoreError::UnknownType { .. })
        ));
    }

    #[test]
    fn build_rejects_bad_schema() {
        #[derive(Clone)]
        struct Broken;
        static BROKEN_SCHEMA: EntitySchema = EntitySchema {
            name: "Broken",
            key_field: "id",
            fields: &[],
            relations: &[RelationshipDescriptor {
                name: "other",
                cardinality: Cardinality::ManyToOne,
                related: "Nowhere",
                on_delete: DeleteBehavior::None,
            }],
        };
        impl Entity for Broken {
            fn schema() -> &'static EntitySchema {
                &BROKEN_SCHEMA
            }
            fn key(&self) -> Key {
                Key::new("")
            }
            fn to_record(&self) -> Record {
                Record::new()
            }
            fn from_record(_record: &Record) -> CoreResult<Self> {
                Ok(Self)
            }
            fn relation_keys(&self, _relation: &str) -> Vec<Key> {
                Vec::new()
            }
            fn set_relation_keys(&mut self, _relation: &str, _keys: Vec<Key>) {}
        }

        let result = Context::builder()
            .register::<Broken>()
            .build(Box::new(InMemoryStore::new()));
        assert!(matches!(result, Err(CoreError::Schema { .. })));
    }

    #[test]
    fn save_then_find_round_trips() {
        let mut ctx = context();
        ctx.set::<Note>().unwrap().add(Note {
            id: "n1".to_string(),
            text: "hello".to_string(),
        });
        ctx.save_changes().unwrap();

        let found = ctx.find::<Note>("n1").unwrap();
        assert_eq!(found.text, "hello");
    }

    #[test]
    fn find_missing_is_not_found() {
        let mut ctx = context();
        assert!(matches!(
            ctx.find::<Note>("nope"),
            Err(CoreError::NotFound { .. })
        ));
    }
}
