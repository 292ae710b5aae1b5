//! Table documents and their records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single stored row: an ordered map of field name to string value.
///
/// Records are schemaless at this level - the engine above decides which
/// fields exist and what they mean. Field values are always strings;
/// numeric interpretation happens at query time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Sets a field value, replacing any previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Removes a field, returning its previous value if it was present.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.fields.remove(field)
    }

    /// Returns `true` if the record has a value for `field`.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Returns the number of fields in the record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns an iterator over `(field, value)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// An ordered collection of records backing one table.
///
/// Entity tables hold one record per entity. Junction tables hold one
/// record per association, with exactly two fields named after the two
/// related types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableDocument {
    records: Vec<Record>,
}

impl TableDocument {
    /// Creates an empty table document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Appends a record to the table.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Returns an iterator over the records in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    /// Returns a mutable iterator over the records.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Record> {
        self.records.iter_mut()
    }

    /// Returns the first record whose `field` equals `value`.
    #[must_use]
    pub fn find_by(&self, field: &str, value: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.get(field) == Some(value))
    }

    /// Returns a mutable reference to the first record whose `field`
    /// equals `value`.
    pub fn find_by_mut(&mut self, field: &str, value: &str) -> Option<&mut Record> {
        self.records
            .iter_mut()
            .find(|r| r.get(field) == Some(value))
    }

    /// Removes every record whose `field` equals `value`, returning the
    /// number removed.
    pub fn remove_by(&mut self, field: &str, value: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.get(field) != Some(value));
        before - self.records.len()
    }

    /// Keeps only records for which the predicate returns `true`.
    pub fn retain(&mut self, f: impl FnMut(&Record) -> bool) {
        self.records.retain(f);
    }
}

impl FromIterator<Record> for TableDocument {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.set(*k, *v);
        }
        r
    }

    #[test]
    fn record_set_get_remove() {
        let mut r = Record::new();
        assert!(r.is_empty());

        r.set("name", "Alice");
        assert_eq!(r.get("name"), Some("Alice"));
        assert!(r.contains("name"));

        r.set("name", "Bob");
        assert_eq!(r.get("name"), Some("Bob"));
        assert_eq!(r.len(), 1);

        assert_eq!(r.remove("name"), Some("Bob".to_string()));
        assert!(r.get("name").is_none());
    }

    #[test]
    fn record_iteration_is_ordered() {
        let r = record(&[("b", "2"), ("a", "1"), ("c", "3")]);
        let keys: Vec<&str> = r.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn document_find_by() {
        let mut doc = TableDocument::new();
        doc.push(record(&[("id", "1"), ("name", "Alice")]));
        doc.push(record(&[("id", "2"), ("name", "Bob")]));

        let found = doc.find_by("id", "2").unwrap();
        assert_eq!(found.get("name"), Some("Bob"));
        assert!(doc.find_by("id", "3").is_none());
    }

    #[test]
    fn document_remove_by() {
        let mut doc = TableDocument::new();
        doc.push(record(&[("owner", "1")]));
        doc.push(record(&[("owner", "2")]));
        doc.push(record(&[("owner", "1")]));

        assert_eq!(doc.remove_by("owner", "1"), 2);
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.remove_by("owner", "3"), 0);
    }

    #[test]
    fn document_json_roundtrip() {
        let mut doc = TableDocument::new();
        doc.push(record(&[("id", "1"), ("price", "20000")]));
        doc.push(record(&[("id", "2"), ("price", "50000")]));

        let json = serde_json::to_string(&doc).unwrap();
        let back: TableDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
