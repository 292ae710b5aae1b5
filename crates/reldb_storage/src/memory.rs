//! In-memory table store for testing.

use crate::document::TableDocument;
use crate::error::StorageResult;
use crate::store::TableStore;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory table store.
///
/// This store keeps all table documents in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral contexts that don't need persistence
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads. It makes
/// no attempt to coordinate concurrent engine passes; that is the
/// caller's single-writer responsibility.
///
/// # Example
///
/// ```rust
/// use reldb_storage::{TableStore, InMemoryStore, TableDocument};
///
/// let store = InMemoryStore::new();
/// let table = store.get_table("cars", true).unwrap().unwrap();
/// assert!(table.is_empty());
/// store.save_table("cars", &table).unwrap();
/// assert_eq!(store.table_names().unwrap(), vec!["cars".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<String, TableDocument>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of persisted tables.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }

    /// Clears all tables from the store.
    pub fn clear(&self) {
        self.tables.write().clear();
    }
}

impl TableStore for InMemoryStore {
    fn get_table(
        &self,
        name: &str,
        create_if_missing: bool,
    ) -> StorageResult<Option<TableDocument>> {
        match self.tables.read().get(name) {
            Some(table) => Ok(Some(table.clone())),
            None if create_if_missing => Ok(Some(TableDocument::new())),
            None => Ok(None),
        }
    }

    fn save_table(&self, name: &str, table: &TableDocument) -> StorageResult<()> {
        self.tables.write().insert(name.to_string(), table.clone());
        Ok(())
    }

    fn delete_table(&self, name: &str) -> StorageResult<()> {
        self.tables.write().remove(name);
        Ok(())
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.tables.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Record;

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryStore::new();
        assert_eq!(store.table_count(), 0);
        assert!(store.table_names().unwrap().is_empty());
    }

    #[test]
    fn memory_missing_table_without_create() {
        let store = InMemoryStore::new();
        assert!(store.get_table("cars", false).unwrap().is_none());
    }

    #[test]
    fn memory_create_is_lazy() {
        let store = InMemoryStore::new();

        let table = store.get_table("cars", true).unwrap().unwrap();
        assert!(table.is_empty());
        // Not visible until saved
        assert_eq!(store.table_count(), 0);

        store.save_table("cars", &table).unwrap();
        assert_eq!(store.table_count(), 1);
    }

    #[test]
    fn memory_save_and_reload() {
        let store = InMemoryStore::new();

        let mut table = TableDocument::new();
        let mut record = Record::new();
        record.set("id", "1");
        table.push(record);
        store.save_table("cars", &table).unwrap();

        let loaded = store.get_table("cars", false).unwrap().unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn memory_save_replaces() {
        let store = InMemoryStore::new();

        let mut table = TableDocument::new();
        let mut record = Record::new();
        record.set("id", "1");
        table.push(record);
        store.save_table("cars", &table).unwrap();

        store.save_table("cars", &TableDocument::new()).unwrap();
        let loaded = store.get_table("cars", false).unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn memory_delete_table() {
        let store = InMemoryStore::new();
        store.save_table("cars", &TableDocument::new()).unwrap();

        store.delete_table("cars").unwrap();
        assert!(store.get_table("cars", false).unwrap().is_none());

        // Deleting an unknown table is a no-op
        store.delete_table("unknown").unwrap();
    }

    #[test]
    fn memory_table_names_sorted() {
        let store = InMemoryStore::new();
        store.save_table("owners", &TableDocument::new()).unwrap();
        store.save_table("cars", &TableDocument::new()).unwrap();

        assert_eq!(
            store.table_names().unwrap(),
            vec!["cars".to_string(), "owners".to_string()]
        );
    }

    #[test]
    fn memory_clear() {
        let store = InMemoryStore::new();
        store.save_table("cars", &TableDocument::new()).unwrap();
        store.clear();
        assert_eq!(store.table_count(), 0);
    }
}
