//! File-based table store for persistent storage.

use crate::document::TableDocument;
use crate::error::{StorageError, StorageResult};
use crate::store::TableStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// Lock file name within the store directory.
const LOCK_FILE: &str = "LOCK";
/// Extension used for table document files.
const TABLE_EXT: &str = "json";

/// A file-based table store.
///
/// Each table is persisted as one JSON document file
/// (`<name>.json`) under the store directory. Data survives process
/// restarts.
///
/// # Locking
///
/// Opening the store acquires an exclusive advisory lock on a `LOCK`
/// file inside the directory, held until the store is dropped. Only one
/// process can hold a store directory at a time.
///
/// # Durability
///
/// `save_table` writes the encoded document and calls
/// `File::sync_all()` before returning.
///
/// # Example
///
/// ```no_run
/// use reldb_storage::{TableStore, FileStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("my_store"), true).unwrap();
/// let table = store.get_table("cars", true).unwrap().unwrap();
/// store.save_table("cars", &table).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    /// Root directory path.
    path: PathBuf,
    /// Lock file handle (held for exclusive access).
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a file store at the given directory.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the store directory
    /// * `create_if_missing` - If true, creates the directory if it
    ///   doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns [`StorageError::Locked`])
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StorageError::invalid_path(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StorageError::invalid_path(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn table_path(&self, name: &str) -> StorageResult<PathBuf> {
        // Table names come from entity type names; anything that would
        // escape the store directory is rejected.
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(StorageError::invalid_path(format!(
                "invalid table name: {name:?}"
            )));
        }
        Ok(self.path.join(format!("{name}.{TABLE_EXT}")))
    }
}

impl TableStore for FileStore {
    fn get_table(
        &self,
        name: &str,
        create_if_missing: bool,
    ) -> StorageResult<Option<TableDocument>> {
        let path = self.table_path(name)?;
        if !path.exists() {
            return if create_if_missing {
                Ok(Some(TableDocument::new()))
            } else {
                Ok(None)
            };
        }

        let contents = fs::read_to_string(&path)?;
        let table = serde_json::from_str(&contents)
            .map_err(|e| StorageError::corrupted(name, e.to_string()))?;
        Ok(Some(table))
    }

    fn save_table(&self, name: &str, table: &TableDocument) -> StorageResult<()> {
        let path = self.table_path(name)?;
        let encoded = serde_json::to_string_pretty(table)
            .map_err(|e| StorageError::encode(name, e.to_string()))?;

        fs::write(&path, encoded)?;
        let file = File::open(&path)?;
        file.sync_all()?;
        Ok(())
    }

    fn delete_table(&self, name: &str) -> StorageResult<()> {
        let path = self.table_path(name)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn table_names(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TABLE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
