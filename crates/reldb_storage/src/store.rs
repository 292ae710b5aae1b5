//! Table store trait definition.

use crate::document::TableDocument;
use crate::error::StorageResult;

/// A table-document store for RelDB.
///
/// Stores are **keyed-record containers**. They hand out whole table
/// documents by value and write them back whole. RelDB owns all record
/// interpretation - stores do not understand entity schemas, foreign
/// keys, or junction rows.
///
/// # Invariants
///
/// - `get_table` with `create_if_missing` never returns `None`; the
///   empty document it returns only becomes visible to `table_names`
///   once saved
/// - `save_table` replaces the stored document atomically with respect
///   to other calls on the same store
/// - `delete_table` of an unknown table is a no-op
/// - Stores must be `Send + Sync`; they serialize access to each table
///   internally but perform no engine-level concurrency control
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and ephemeral contexts
/// - [`super::FileStore`] - One JSON file per table under a locked
///   directory
pub trait TableStore: Send + Sync {
    /// Fetches a table document by name.
    ///
    /// Returns `None` if the table does not exist and `create_if_missing`
    /// is `false`. With `create_if_missing` set, a missing table yields an
    /// empty document; it is not persisted until [`TableStore::save_table`]
    /// is called for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read or decoded.
    fn get_table(&self, name: &str, create_if_missing: bool)
        -> StorageResult<Option<TableDocument>>;

    /// Persists a table document under `name`, replacing any previous
    /// content.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be encoded or written.
    fn save_table(&self, name: &str, table: &TableDocument) -> StorageResult<()>;

    /// Drops a table document entirely.
    ///
    /// Used for test and reset paths, not normal operation. Deleting a
    /// table that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying removal fails.
    fn delete_table(&self, name: &str) -> StorageResult<()>;

    /// Returns the names of all persisted tables.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be produced.
    fn table_names(&self) -> StorageResult<Vec<String>>;
}
