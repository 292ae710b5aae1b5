//! Per-type collections of tracked entities.

use crate::entity::{Entity, EntityState, Key, Tracked};
use crate::error::{CoreError, CoreResult, ValidationFailure};
use crate::resolver::{self, SaveEnv, TableWorkspace};
use crate::schema::{fk_field, Cardinality, DeleteBehavior, RelationshipDescriptor, SchemaRegistry};
use reldb_storage::Record;
use std::any::Any;
use tracing::debug;

/// The collection of tracked entities of one type, owned by a context.
///
/// Entries keep insertion order. Lookups are linear; table sizes are
/// the working set of one context, not a database.
pub struct EntitySet<T: Entity> {
    entries: Vec<Tracked<T>>,
}

impl<T: Entity> EntitySet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers an entity as `New`. It is persisted on the next save
    /// cycle.
    pub fn add(&mut self, entity: T) {
        self.entries.push(Tracked::new(entity));
    }

    /// Marks an entity `Deleted`.
    ///
    /// If the entity was not yet tracked - obtained externally, for
    /// example - it is registered first; deleting an untracked entity
    /// is legal.
    pub fn remove(&mut self, entity: &T) {
        let key = entity.key();
        if !self.remove_key(&key) {
            let mut tracked = Tracked::loaded(entity.clone());
            tracked.set_state(EntityState::Deleted);
            self.entries.push(tracked);
        }
    }

    /// Marks an already-tracked entity `Deleted` by key.
    ///
    /// Returns `false` if no entity with that key is tracked.
    pub fn remove_key(&mut self, key: &Key) -> bool {
        match self.position(key) {
            Some(index) => {
                self.entries[index].set_state(EntityState::Deleted);
                true
            }
            None => false,
        }
    }

    /// Registers an entity as `Unchanged`, as if loaded from storage.
    ///
    /// Idempotent: a second `track` call for an already-tracked key is
    /// a no-op.
    pub fn track(&mut self, entity: T) {
        if self.position(&entity.key()).is_none() {
            self.entries.push(Tracked::loaded(entity));
        }
    }

    /// Returns the tracked entity for a key, unless it is marked
    /// `Deleted`.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.state() != EntityState::Deleted && e.key() == *key)
            .map(Tracked::value)
    }

    /// Returns the tracked entity for a key mutably, unless it is
    /// marked `Deleted`.
    pub fn get_mut(&mut self, key: &Key) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.state() != EntityState::Deleted && e.key() == *key)
            .map(Tracked::value_mut)
    }

    /// Returns an iterator over the live (non-deleted) tracked
    /// entities in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &T> {
        self.entries
            .iter()
            .filter(|e| e.state() != EntityState::Deleted)
            .map(Tracked::value)
    }

    /// Returns `true` if an entity with the key is tracked, in any
    /// state.
    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.position(key).is_some()
    }

    /// Returns the number of live tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.all().count()
    }

    /// Returns `true` if no live entities are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn is_marked_deleted(&self, key: &Key) -> bool {
        self.entries
            .iter()
            .any(|e| e.state() == EntityState::Deleted && e.key() == *key)
    }

    fn position(&self, key: &Key) -> Option<usize> {
        self.entries.iter().position(|e| e.key() == *key)
    }

    /// Converts the save of an entity whose to-one target is marked
    /// `Deleted` per the relation's behavior. Returns `true` when a
    /// `Cascade` behavior turns this save into a delete.
    fn resolve_deleted_targets(&mut self, index: usize, env: &SaveEnv<'_, '_>) -> bool {
        let schema = T::schema();
        let mut set_null: Vec<&'static str> = Vec::new();

        for relation in schema.relations.iter().filter(|r| r.is_to_one()) {
            let keys = self.entries[index].value().relation_keys(relation.name);
            let Some(target) = keys.first() else { continue };
            let target_deleted = if relation.related == schema.name {
                self.is_marked_deleted(target)
            } else {
                env.sets
                    .get(relation.related)
                    .is_some_and(|s| s.is_marked_deleted(target))
            };
            if !target_deleted {
                continue;
            }
            match relation.on_delete {
                DeleteBehavior::SetNull => set_null.push(relation.name),
                DeleteBehavior::Cascade => return true,
                // Restrict and friends: the reference is left dangling
                // by documented behavior.
                _ => {}
            }
        }

        for name in set_null {
            self.entries[index]
                .value_mut()
                .set_relation_keys(name, Vec::new());
        }
        false
    }

    fn persist_at(&mut self, index: usize, env: &mut SaveEnv<'_, '_>) -> CoreResult<()> {
        let schema = T::schema();
        let key = self.entries[index].key();
        let is_new = self.entries[index].state() == EntityState::New;

        // Project the declared fields; undeclared record content is
        // never persisted.
        let mut record = Record::new();
        {
            let full = self.entries[index].value().to_record();
            if let Some(value) = full.get(schema.key_field) {
                record.set(schema.key_field, value);
            }
            for field in schema.fields {
                if let Some(value) = full.get(field) {
                    record.set(*field, value);
                }
            }
        }
        for relation in schema.relations.iter().filter(|r| r.is_to_one()) {
            let keys = self.entries[index].value().relation_keys(relation.name);
            if let Some(target) = keys.first() {
                let related = env.registry.get(relation.related)?;
                record.set(fk_field(related), target.as_str());
            }
        }

        // Junction contents are decided before touching the tables so
        // deleted partners are dropped from the replace.
        let mut junctions: Vec<(&'static RelationshipDescriptor, Vec<Key>)> = Vec::new();
        for relation in schema
            .relations
            .iter()
            .filter(|r| r.cardinality == Cardinality::ManyToMany)
        {
            let associated: Vec<Key> = self.entries[index]
                .value()
                .relation_keys(relation.name)
                .into_iter()
                .filter(|k| {
                    !env.sets
                        .get(relation.related)
                        .is_some_and(|s| s.is_marked_deleted(k))
                })
                .collect();
            junctions.push((relation, associated));
        }

        let table = env.workspace.table_mut(schema.name)?;
        match table.find_by_mut(schema.key_field, key.as_str()) {
            Some(existing) => {
                if is_new {
                    return Err(CoreError::duplicate_key(schema.name, key.as_str()));
                }
                *existing = record;
            }
            None => table.push(record),
        }

        for (relation, associated) in junctions {
            resolver::replace_junction_rows(
                env.workspace,
                schema,
                relation,
                &key,
                &associated,
                is_new,
            )?;
        }

        let entry = &mut self.entries[index];
        entry.take_snapshot();
        entry.set_state(EntityState::Unchanged);
        Ok(())
    }

    fn delete_at(&mut self, index: usize, env: &mut SaveEnv<'_, '_>) -> CoreResult<()> {
        let schema = T::schema();
        let key = self.entries[index].key();
        debug!(entity_type = schema.name, key = %key, "delete");

        let outcome = resolver::propagate_delete(env.registry, env.workspace, schema.name, &key)?;

        for (type_name, deleted_key) in &outcome.deleted {
            if *type_name == schema.name {
                self.entries.retain(|e| e.key() != *deleted_key);
            } else if let Some(set) = env.sets.get_mut(type_name) {
                set.untrack(deleted_key);
            }
        }
        for (child_type, child_key, parent_type) in &outcome.fk_cleared {
            if *child_type == schema.name {
                self.clear_relations_to_impl(child_key, parent_type);
            } else if let Some(set) = env.sets.get_mut(child_type) {
                set.clear_relations_to(child_key, parent_type);
            }
        }
        for (partner_type, partner_key, deleted_type, deleted_key) in &outcome.detached {
            if *partner_type == schema.name {
                self.detach_many_to_many_impl(partner_key, deleted_type, deleted_key);
            } else if let Some(set) = env.sets.get_mut(partner_type) {
                set.detach_many_to_many(partner_key, deleted_type, deleted_key);
            }
        }
        Ok(())
    }

    fn clear_relations_to_impl(&mut self, key: &Key, related_type: &str) {
        let schema = T::schema();
        if let Some(index) = self.position(key) {
            let entry = &mut self.entries[index];
            for relation in schema
                .relations
                .iter()
                .filter(|r| r.is_to_one() && r.related == related_type)
            {
                entry.value_mut().set_relation_keys(relation.name, Vec::new());
                entry.snapshot_relation(relation.name, Vec::new());
            }
        }
    }

    fn detach_many_to_many_impl(&mut self, key: &Key, related_type: &str, related_key: &Key) {
        let schema = T::schema();
        if let Some(index) = self.position(key) {
            let entry = &mut self.entries[index];
            for relation in schema.relations.iter().filter(|r| {
                r.cardinality == Cardinality::ManyToMany && r.related == related_type
            }) {
                let mut keys = entry.value().relation_keys(relation.name);
                keys.retain(|k| k != related_key);
                entry.value_mut().set_relation_keys(relation.name, keys.clone());
                entry.snapshot_relation(relation.name, keys);
            }
        }
    }
}

/// Type-erased entity set operations.
///
/// The context owns one boxed set per registered type; cascades and
/// graph hydration reach peer sets through this trait while the typed
/// pass holds its own set exclusively.
pub(crate) trait EntitySetOps: Any {
    /// The entity type name this set manages.
    fn type_name(&self) -> &'static str;

    /// Upcast for typed downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether an entity with the key is tracked, in any state.
    fn contains(&self, key: &Key) -> bool;

    /// Whether the key is tracked and marked `Deleted`.
    fn is_marked_deleted(&self, key: &Key) -> bool;

    /// Drops the key from tracking entirely. Returns `true` if it was
    /// tracked.
    fn untrack(&mut self, key: &Key) -> bool;

    /// Clears every to-one reference the keyed entity holds toward
    /// `related_type`, snapshot included.
    fn clear_relations_to(&mut self, key: &Key, related_type: &str);

    /// Removes `related_key` from the keyed entity's many-to-many
    /// references toward `related_type`, snapshot included.
    fn detach_many_to_many(&mut self, key: &Key, related_type: &str, related_key: &Key);

    /// Decodes and tracks a stored record as `Unchanged`, attaching its
    /// relation keys. Returns the `(related type, key)` pairs the
    /// record references, for graph hydration. No-op for an
    /// already-tracked key.
    fn track_record(
        &mut self,
        record: &Record,
        registry: &SchemaRegistry,
        workspace: &mut TableWorkspace<'_>,
    ) -> CoreResult<Vec<(&'static str, Key)>>;

    /// Runs this type's slice of the save cycle.
    fn save_pass(&mut self, env: &mut SaveEnv<'_, '_>) -> CoreResult<()>;
}

impl<T: Entity> EntitySetOps for EntitySet<T> {
    fn type_name(&self) -> &'static str {
        T::schema().name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn contains(&self, key: &Key) -> bool {
        EntitySet::contains(self, key)
    }

    fn is_marked_deleted(&self, key: &Key) -> bool {
        EntitySet::is_marked_deleted(self, key)
    }

    fn untrack(&mut self, key: &Key) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key() != *key);
        self.entries.len() < before
    }

    fn clear_relations_to(&mut self, key: &Key, related_type: &str) {
        self.clear_relations_to_impl(key, related_type);
    }

    fn detach_many_to_many(&mut self, key: &Key, related_type: &str, related_key: &Key) {
        self.detach_many_to_many_impl(key, related_type, related_key);
    }

    fn track_record(
        &mut self,
        record: &Record,
        registry: &SchemaRegistry,
        workspace: &mut TableWorkspace<'_>,
    ) -> CoreResult<Vec<(&'static str, Key)>> {
        let schema = T::schema();
        let key = record
            .get(schema.key_field)
            .map(Key::from)
            .ok_or_else(|| {
                CoreError::invalid_record(schema.name, format!("missing key field '{}'", schema.key_field))
            })?;

        if self.contains(&key) {
            return Ok(Vec::new());
        }

        let mut value = T::from_record(record)?;
        let loaded = resolver::load_relation_keys(registry, workspace, schema, record, &key)?;

        let mut pairs = Vec::new();
        for (relation, related_type, keys) in loaded {
            value.set_relation_keys(relation, keys.clone());
            for related_key in keys {
                pairs.push((related_type, related_key));
            }
        }

        self.entries.push(Tracked::loaded(value));
        Ok(pairs)
    }

    fn save_pass(&mut self, env: &mut SaveEnv<'_, '_>) -> CoreResult<()> {
        let schema = T::schema();
        let mut index = 0;

        while index < self.entries.len() {
            if self.entries[index].state() == EntityState::Deleted {
                self.delete_at(index, env)?;
                continue;
            }
            if !self.entries[index].has_changes() {
                index += 1;
                continue;
            }

            if self.resolve_deleted_targets(index, env) {
                self.entries[index].set_state(EntityState::Deleted);
                self.delete_at(index, env)?;
                continue;
            }

            if let Err(violations) = self.entries[index].value().validate() {
                debug!(
                    entity_type = schema.name,
                    key = %self.entries[index].key(),
                    count = violations.len(),
                    "validation failed"
                );
                env.failures.push(ValidationFailure {
                    entity_type: schema.name,
                    key: self.entries[index].key(),
                    violations,
                });
                index += 1;
                continue;
            }

            self.persist_at(index, env)?;
            index += 1;
        }

        Ok(())
    }
}
