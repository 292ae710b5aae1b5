//! Relationship resolution and table access for one engine pass.
//!
//! The resolver owns the record-level side of relationships: reading
//! foreign keys and junction rows into in-memory references, writing
//! them back on save, and executing delete-behavior propagation. It
//! works against a [`TableWorkspace`], which batches table documents
//! for the duration of one `save_changes` or query call: fetch once,
//! mutate in memory, flush dirty tables at the end.

use crate::entity::Key;
use crate::error::{CoreResult, ValidationFailure};
use crate::schema::{
    fk_field, junction_table, Cardinality, DeleteBehavior, EntitySchema, RelationshipDescriptor,
    SchemaRegistry,
};
use crate::set::EntitySetOps;
use reldb_storage::{Record, TableDocument, TableStore};
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use tracing::debug;

/// Per-call cache of table documents.
///
/// Documents are fetched from the store on first touch and written
/// back - dirty ones only - by [`TableWorkspace::flush`]. Reads never
/// mark a table dirty, so a read-only pass flushes nothing.
pub(crate) struct TableWorkspace<'a> {
    store: &'a dyn TableStore,
    tables: BTreeMap<String, TableDocument>,
    dirty: BTreeSet<String>,
}

impl<'a> TableWorkspace<'a> {
    /// Creates a workspace over the given store.
    pub(crate) fn new(store: &'a dyn TableStore) -> Self {
        Self {
            store,
            tables: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    fn entry(&mut self, name: &str) -> CoreResult<&mut TableDocument> {
        match self.tables.entry(name.to_string()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let table = self.store.get_table(name, true)?.unwrap_or_default();
                Ok(vacant.insert(table))
            }
        }
    }

    /// Returns the table for reading, fetching it on first touch.
    pub(crate) fn table(&mut self, name: &str) -> CoreResult<&TableDocument> {
        self.entry(name).map(|t| &*t)
    }

    /// Returns the table for mutation and marks it dirty.
    pub(crate) fn table_mut(&mut self, name: &str) -> CoreResult<&mut TableDocument> {
        self.dirty.insert(name.to_string());
        self.entry(name)
    }

    /// Writes every dirty table back to the store.
    pub(crate) fn flush(&mut self) -> CoreResult<()> {
        for name in std::mem::take(&mut self.dirty) {
            if let Some(table) = self.tables.get(&name) {
                self.store.save_table(&name, table)?;
            }
        }
        Ok(())
    }
}

/// Finds one record by entity key.
pub(crate) fn find_record(
    workspace: &mut TableWorkspace<'_>,
    schema: &EntitySchema,
    key: &Key,
) -> CoreResult<Option<Record>> {
    Ok(workspace
        .table(schema.name)?
        .find_by(schema.key_field, key.as_str())
        .cloned())
}

/// Reads the related keys for every declared relation of one entity
/// being hydrated.
///
/// Returns `(relation name, related type, keys)` triples. Absent
/// foreign keys yield empty key lists; absence is valid, not an error.
pub(crate) fn load_relation_keys(
    registry: &SchemaRegistry,
    workspace: &mut TableWorkspace<'_>,
    schema: &EntitySchema,
    record: &Record,
    key: &Key,
) -> CoreResult<Vec<(&'static str, &'static str, Vec<Key>)>> {
    let mut loaded = Vec::with_capacity(schema.relations.len());

    for relation in schema.relations {
        let related = registry.get(relation.related)?;
        let keys = match relation.cardinality {
            // The record itself carries the foreign key.
            Cardinality::ManyToOne | Cardinality::OneToOne => record
                .get(&fk_field(related))
                .map(Key::from)
                .into_iter()
                .collect(),
            // The related records carry the foreign key; scan for ours.
            Cardinality::OneToMany => {
                let fk = fk_field(schema);
                workspace
                    .table(related.name)?
                    .iter()
                    .filter(|r| r.get(&fk) == Some(key.as_str()))
                    .filter_map(|r| r.get(related.key_field))
                    .map(Key::from)
                    .collect()
            }
            Cardinality::ManyToMany => {
                let junction = junction_table(schema.name, related.name);
                workspace
                    .table(&junction)?
                    .iter()
                    .filter(|row| row.get(schema.name) == Some(key.as_str()))
                    .filter_map(|row| row.get(related.name))
                    .map(Key::from)
                    .collect()
            }
        };
        loaded.push((relation.name, relation.related, keys));
    }

    Ok(loaded)
}

/// Recomputes the full junction row set for one entity: every previous
/// row keyed to it is removed and one row per currently associated key
/// is inserted. A full replace, not an incremental diff.
///
/// A `New` entity has no previous rows of its own, so its pass skips
/// the removal; otherwise it would clobber rows the other side wrote
/// earlier in the same cycle. Inserts skip rows that already exist, so
/// both sides naming the same pair stay deduplicated.
pub(crate) fn replace_junction_rows(
    workspace: &mut TableWorkspace<'_>,
    schema: &EntitySchema,
    relation: &RelationshipDescriptor,
    key: &Key,
    associated: &[Key],
    is_new: bool,
) -> CoreResult<()> {
    let junction = junction_table(schema.name, relation.related);
    let table = workspace.table_mut(&junction)?;

    if !is_new {
        table.remove_by(schema.name, key.as_str());
    }
    for related_key in associated {
        let exists = table.iter().any(|row| {
            row.get(schema.name) == Some(key.as_str())
                && row.get(relation.related) == Some(related_key.as_str())
        });
        if exists {
            continue;
        }
        let mut row = Record::new();
        row.set(schema.name, key.as_str());
        row.set(relation.related, related_key.as_str());
        table.push(row);
    }
    Ok(())
}

/// Everything a delete propagation did, so the context can bring the
/// in-memory sets in step with the table documents.
#[derive(Debug, Default)]
pub(crate) struct DeleteOutcome {
    /// Records removed, the root entity included: `(type, key)`.
    pub(crate) deleted: Vec<(&'static str, Key)>,
    /// Children whose foreign key to a deleted parent was stripped:
    /// `(child type, child key, parent type)`.
    pub(crate) fk_cleared: Vec<(&'static str, Key, &'static str)>,
    /// Junction partners that lost an association:
    /// `(partner type, partner key, deleted type, deleted key)`.
    pub(crate) detached: Vec<(&'static str, Key, &'static str, Key)>,
}

/// Deletes one entity's record and propagates delete behaviors across
/// its relationships, recursively.
///
/// Operates purely on table documents; the caller applies the returned
/// outcome to the in-memory sets. A visited set bounds recursion over
/// cyclic data.
pub(crate) fn propagate_delete(
    registry: &SchemaRegistry,
    workspace: &mut TableWorkspace<'_>,
    type_name: &str,
    key: &Key,
) -> CoreResult<DeleteOutcome> {
    let mut outcome = DeleteOutcome::default();
    let mut visited = BTreeSet::new();
    delete_recursive(registry, workspace, type_name, key, &mut visited, &mut outcome)?;
    Ok(outcome)
}

fn delete_recursive(
    registry: &SchemaRegistry,
    workspace: &mut TableWorkspace<'_>,
    type_name: &str,
    key: &Key,
    visited: &mut BTreeSet<(&'static str, Key)>,
    outcome: &mut DeleteOutcome,
) -> CoreResult<()> {
    let schema = registry.get(type_name)?;
    if !visited.insert((schema.name, key.clone())) {
        return Ok(());
    }

    for relation in schema.relations {
        match relation.cardinality {
            Cardinality::ManyToMany => {
                let related = registry.get(relation.related)?;
                let junction = junction_table(schema.name, related.name);
                let partners: Vec<Key> = workspace
                    .table(&junction)?
                    .iter()
                    .filter(|row| row.get(schema.name) == Some(key.as_str()))
                    .filter_map(|row| row.get(related.name))
                    .map(Key::from)
                    .collect();

                // The related type's own descriptor back to us decides
                // whether its records die with this one.
                let reverse_cascades = registry
                    .reverse_many_to_many(related, schema.name)
                    .is_some_and(|r| r.on_delete == DeleteBehavior::Cascade);

                workspace
                    .table_mut(&junction)?
                    .retain(|row| row.get(schema.name) != Some(key.as_str()));

                for partner in partners {
                    if reverse_cascades {
                        debug!(
                            from = schema.name,
                            to = related.name,
                            key = %partner,
                            "many-to-many cascade"
                        );
                        delete_recursive(
                            registry, workspace, related.name, &partner, visited, outcome,
                        )?;
                    } else {
                        outcome.detached.push((
                            related.name,
                            partner,
                            schema.name,
                            key.clone(),
                        ));
                    }
                }
            }
            Cardinality::OneToMany => {
                let related = registry.get(relation.related)?;
                let fk = fk_field(schema);
                let children: Vec<Key> = workspace
                    .table(related.name)?
                    .iter()
                    .filter(|r| r.get(&fk) == Some(key.as_str()))
                    .filter_map(|r| r.get(related.key_field))
                    .map(Key::from)
                    .collect();

                match relation.on_delete {
                    DeleteBehavior::SetNull => {
                        let table = workspace.table_mut(related.name)?;
                        for row in table.iter_mut() {
                            if row.get(&fk) == Some(key.as_str()) {
                                row.remove(&fk);
                            }
                        }
                        for child in children {
                            outcome.fk_cleared.push((related.name, child, schema.name));
                        }
                    }
                    DeleteBehavior::Cascade => {
                        for child in children {
                            debug!(
                                from = schema.name,
                                to = related.name,
                                key = %child,
                                "cascade delete"
                            );
                            delete_recursive(
                                registry, workspace, related.name, &child, visited, outcome,
                            )?;
                        }
                    }
                    // Unreachable for a validated registry.
                    _ => {}
                }
            }
            // Deleting this side obligates nothing on the side it
            // points to; one-to-one orphans are swept after the save
            // pass.
            Cardinality::OneToOne | Cardinality::ManyToOne => {}
        }
    }

    workspace
        .table_mut(schema.name)?
        .remove_by(schema.key_field, key.as_str());
    outcome.deleted.push((schema.name, key.clone()));
    Ok(())
}

/// Removes one-to-one dependents no longer referenced by any owner.
///
/// For every declared `OneToOne` relation with `Orphan` behavior, the
/// related table's keys are compared against the foreign keys held by
/// live owner records; unreferenced records are deleted outright, with
/// no further cascade.
pub(crate) fn orphan_sweep(
    registry: &SchemaRegistry,
    workspace: &mut TableWorkspace<'_>,
) -> CoreResult<Vec<(&'static str, Key)>> {
    let mut removed = Vec::new();

    for schema in registry.iter() {
        for relation in schema.relations.iter().filter(|r| {
            r.cardinality == Cardinality::OneToOne && r.on_delete == DeleteBehavior::Orphan
        }) {
            let related = registry.get(relation.related)?;
            let fk = fk_field(related);

            let referenced: BTreeSet<String> = workspace
                .table(schema.name)?
                .iter()
                .filter_map(|r| r.get(&fk).map(str::to_string))
                .collect();

            let orphans: Vec<Key> = workspace
                .table(related.name)?
                .iter()
                .filter_map(|r| r.get(related.key_field))
                .filter(|k| !referenced.contains(*k))
                .map(Key::from)
                .collect();

            if orphans.is_empty() {
                continue;
            }

            debug!(
                owner = schema.name,
                orphan_side = related.name,
                count = orphans.len(),
                "orphan sweep"
            );
            let table = workspace.table_mut(related.name)?;
            for key in orphans {
                table.remove_by(related.key_field, key.as_str());
                removed.push((related.name, key));
            }
        }
    }

    Ok(removed)
}

/// Environment handed to a set's save pass: the registry, the shared
/// table workspace, every *other* type's set (for cascade and
/// deleted-target checks), and the validation failure batch.
pub(crate) struct SaveEnv<'a, 'w> {
    pub(crate) registry: &'a SchemaRegistry,
    pub(crate) workspace: &'a mut TableWorkspace<'w>,
    pub(crate) sets: &'a mut BTreeMap<&'static str, Box<dyn EntitySetOps>>,
    pub(crate) failures: &'a mut Vec<ValidationFailure>,
}

/// Hydrates a record and every relationship value reachable from it
/// into the owning sets.
///
/// Worklist-driven: tracking an entity yields its `(related type,
/// key)` pairs; pairs not already tracked are fetched by key and
/// tracked in their own set. The already-tracked check cuts cycles.
pub(crate) fn hydrate_graph(
    registry: &SchemaRegistry,
    sets: &mut BTreeMap<&'static str, Box<dyn EntitySetOps>>,
    workspace: &mut TableWorkspace<'_>,
    type_name: &'static str,
    record: Record,
) -> CoreResult<()> {
    let mut work = vec![(type_name, record)];

    while let Some((current, record)) = work.pop() {
        let Some(mut set) = sets.remove(current) else {
            continue;
        };
        let tracked = set.track_record(&record, registry, workspace);
        sets.insert(current, set);

        for (related_type, related_key) in tracked? {
            let already = sets
                .get(related_type)
                .is_some_and(|s| s.contains(&related_key));
            if already {
                continue;
            }
            let related = registry.get(related_type)?;
            if let Some(related_record) = find_record(workspace, related, &related_key)? {
                work.push((related_type, related_record));
            }
        }
    }

    Ok(())
}
