//! # RelDB Core
//!
//! An object-relational mapping engine over a generic table-document
//! store.
//!
//! This crate provides:
//! - Statically declared entity schemas with relationship descriptors
//! - Snapshot-based change tracking (`New` / `Unchanged` / `Modified` /
//!   `Deleted`)
//! - A type-level dependency graph that orders multi-entity saves and
//!   rejects cyclic declarations
//! - Relationship resolution: foreign keys, junction tables, and
//!   cascade / set-null / restrict / orphan delete behaviors
//! - An in-memory query evaluator with predicates, multi-key ordering,
//!   and pagination
//!
//! The storage side is the [`reldb_storage`] crate; anything
//! implementing [`reldb_storage::TableStore`] works as a backend.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reldb_core::{Context, Operator};
//! use reldb_storage::InMemoryStore;
//!
//! let mut ctx = Context::builder()
//!     .register::<Owner>()
//!     .register::<Car>()
//!     .build(Box::new(InMemoryStore::new()))?;
//!
//! ctx.set::<Car>()?.add(car);
//! ctx.save_changes()?;
//!
//! let expensive = ctx
//!     .query::<Car>()
//!     .filter("price", Operator::Gt, "40000")
//!     .order_by("price", true)
//!     .execute()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod context;
mod entity;
mod error;
mod graph;
mod query;
mod resolver;
mod schema;
mod set;

pub use context::{Context, ContextBuilder};
pub use entity::{Entity, EntityState, Key, Ref, RefSet, Tracked};
pub use error::{CoreError, CoreResult, ValidationFailure, Violation};
pub use query::{Operator, QueryBuilder};
pub use schema::{
    fk_field, junction_table, Cardinality, DeleteBehavior, EntitySchema, RelationshipDescriptor,
    SchemaRegistry,
};
pub use set::EntitySet;
