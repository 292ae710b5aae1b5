//! Change tracking for managed entities.

use crate::entity::key::Key;
use crate::entity::model::Entity;
use std::collections::BTreeMap;

/// Lifecycle state of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Added to the set; never persisted.
    New,
    /// Loaded or persisted; matches the stored record as far as the
    /// snapshot knows.
    Unchanged,
    /// A tracked field or relationship key differs from its snapshot.
    Modified,
    /// Marked for deletion; removed from storage on the next save cycle.
    Deleted,
}

/// A domain value under change management.
///
/// `Tracked<T>` composes the plain domain record with its lifecycle
/// state and the snapshot of the last-persisted field and
/// relationship-key values. The domain type itself carries no lifecycle
/// state and no base class.
///
/// Change detection is lazy: nothing intercepts field writes. The save
/// pass asks [`Tracked::has_changes`], which compares current values
/// against the snapshot. Only fields and relations declared in the
/// schema participate; any other instance state is ignored.
#[derive(Debug, Clone)]
pub struct Tracked<T: Entity> {
    value: T,
    state: EntityState,
    field_snapshot: BTreeMap<String, String>,
    relation_snapshot: BTreeMap<String, Vec<Key>>,
}

impl<T: Entity> Tracked<T> {
    /// Wraps a newly added entity. State starts at `New` with a baseline
    /// snapshot of the current values.
    pub fn new(value: T) -> Self {
        let mut tracked = Self {
            value,
            state: EntityState::New,
            field_snapshot: BTreeMap::new(),
            relation_snapshot: BTreeMap::new(),
        };
        tracked.take_snapshot();
        tracked
    }

    /// Wraps an entity hydrated from storage. State starts at
    /// `Unchanged` with the loaded values as the snapshot.
    pub fn loaded(value: T) -> Self {
        let mut tracked = Self::new(value);
        tracked.state = EntityState::Unchanged;
        tracked
    }

    /// Returns the entity's key.
    pub fn key(&self) -> Key {
        self.value.key()
    }

    /// Returns the wrapped value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns the wrapped value mutably.
    ///
    /// Mutation is not observed here; the next [`Tracked::has_changes`]
    /// call picks it up.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Sets the lifecycle state.
    pub(crate) fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    /// Records the current field values and canonical relationship keys
    /// as the new snapshot.
    ///
    /// Called after every successful persist and on load.
    pub fn take_snapshot(&mut self) {
        self.field_snapshot = self.current_fields();
        self.relation_snapshot = self.current_relations();
    }

    /// Returns `true` if the entity needs persisting.
    ///
    /// `New` and `Deleted` always do. Otherwise the current values are
    /// compared against the snapshot; a difference flips the state to
    /// `Modified` so the save pass can tell "needs persisting" from
    /// "already persisted this cycle".
    pub fn has_changes(&mut self) -> bool {
        match self.state {
            EntityState::New | EntityState::Deleted => true,
            EntityState::Modified => true,
            EntityState::Unchanged => {
                if self.current_fields() != self.field_snapshot
                    || self.current_relations() != self.relation_snapshot
                {
                    self.state = EntityState::Modified;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Overwrites the snapshot entry for one relation.
    ///
    /// Used when delete propagation clears a foreign key at the record
    /// level, so the in-memory value and snapshot stay in step without a
    /// spurious `Modified` flip.
    pub(crate) fn snapshot_relation(&mut self, relation: &str, keys: Vec<Key>) {
        self.relation_snapshot.insert(relation.to_string(), keys);
    }

    fn current_fields(&self) -> BTreeMap<String, String> {
        let schema = T::schema();
        let record = self.value.to_record();
        let mut fields = BTreeMap::new();
        if let Some(value) = record.get(schema.key_field) {
            fields.insert(schema.key_field.to_string(), value.to_string());
        }
        for field in schema.fields {
            if let Some(value) = record.get(field) {
                fields.insert((*field).to_string(), value.to_string());
            }
        }
        fields
    }

    fn current_relations(&self) -> BTreeMap<String, Vec<Key>> {
        T::schema()
            .relations
            .iter()
            .map(|r| (r.name.to_string(), self.value.relation_keys(r.name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::reference::Ref;
    use crate::error::CoreResult;
    use crate::schema::{
        Cardinality, DeleteBehavior, EntitySchema, RelationshipDescriptor,
    };
    use reldb_storage::Record;

    #[derive(Clone)]
    struct Wheel {
        id: String,
        size: String,
        car: Ref<Wheel>,
        // Undeclared state; must never affect change detection.
        scratch: u32,
    }

    static WHEEL_SCHEMA: EntitySchema = EntitySchema {
        name: "Wheel",
        key_field: "id",
        fields: &["size"],
        relations: &[RelationshipDescriptor {
            name: "car",
            cardinality: Cardinality::ManyToOne,
            related: "Wheel",
            on_delete: DeleteBehavior::None,
        }],
    };

    impl Entity for Wheel {
        fn schema() -> &'static EntitySchema {
            &WHEEL_SCHEMA
        }
        fn key(&self) -> Key {
            Key::new(&self.id)
        }
        fn to_record(&self) -> Record {
            let mut record = Record::new();
            record.set("id", &self.id);
            record.set("size", &self.size);
            record
        }
        fn from_record(record: &Record) -> CoreResult<Self> {
            Ok(Self {
                id: record.get("id").unwrap_or_default().to_string(),
                size: record.get("size").unwrap_or_default().to_string(),
                car: Ref::none(),
                scratch: 0,
            })
        }
        fn relation_keys(&self, relation: &str) -> Vec<Key> {
            match relation {
                "car" => self.car.keys(),
                _ => Vec::new(),
            }
        }
        fn set_relation_keys(&mut self, relation: &str, keys: Vec<Key>) {
            if relation == "car" {
                self.car.assign(keys);
            }
        }
    }

    fn wheel() -> Wheel {
        Wheel {
            id: "w1".to_string(),
            size: "17".to_string(),
            car: Ref::none(),
            scratch: 0,
        }
    }

    #[test]
    fn new_always_has_changes() {
        let mut tracked = Tracked::new(wheel());
        assert_eq!(tracked.state(), EntityState::New);
        assert!(tracked.has_changes());
        assert_eq!(tracked.state(), EntityState::New);
    }

    #[test]
    fn loaded_is_unchanged() {
        let mut tracked = Tracked::loaded(wheel());
        assert_eq!(tracked.state(), EntityState::Unchanged);
        assert!(!tracked.has_changes());
    }

    #[test]
    fn field_mutation_flips_to_modified() {
        let mut tracked = Tracked::loaded(wheel());
        tracked.value_mut().size = "18".to_string();

        assert!(tracked.has_changes());
        assert_eq!(tracked.state(), EntityState::Modified);
    }

    #[test]
    fn relation_mutation_flips_to_modified() {
        let mut tracked = Tracked::loaded(wheel());
        tracked.value_mut().car.set("c1");

        assert!(tracked.has_changes());
        assert_eq!(tracked.state(), EntityState::Modified);
    }

    #[test]
    fn undeclared_state_is_ignored() {
        let mut tracked = Tracked::loaded(wheel());
        tracked.value_mut().scratch = 99;
        assert!(!tracked.has_changes());
    }

    #[test]
    fn snapshot_resets_change_detection() {
        let mut tracked = Tracked::loaded(wheel());
        tracked.value_mut().size = "18".to_string();
        assert!(tracked.has_changes());

        tracked.set_state(EntityState::Unchanged);
        tracked.take_snapshot();
        assert!(!tracked.has_changes());
    }

    #[test]
    fn deleted_always_has_changes() {
        let mut tracked = Tracked::loaded(wheel());
        tracked.set_state(EntityState::Deleted);
        assert!(tracked.has_changes());
    }
}
