//! # Minileaf - Embedded Document Store
//!
//! Minileaf is an embedded, document-oriented key-value store with
//! schemaless JSON-like documents, secondary indexes, and Mongo-style
//! filter queries.
//!
//! ## Key Features
//!
//! - **Embedded**: no separate server process
//! - **Durable**: write-ahead log + snapshot engine, or an LRU-cached
//!   append-only log engine for datasets larger than RAM
//! - **Crash-safe**: recovery always lands on a prefix of committed writes
//! - **Encrypted at rest**: optional AES-256-GCM over every stored record
//! - **Indexed**: unique/ordered/hash secondary indexes, partial and TTL
//!   variants, maintained transactionally with writes
//! - **Queryable**: `$gt`/`$in`/`$regex`/`$elemMatch`-style filters over
//!   nested document paths, with temporal coercion across mixed timestamp
//!   representations
//! - **Atomic partial updates**: `$set` / `$unset` / `$inc` on dotted paths
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use minileaf::{doc, IdKind, Minileaf};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Minileaf::builder().data_dir("/var/lib/myapp").open()?;
//! let users = db.collection("users", IdKind::ObjectId)?;
//!
//! let saved = users.save(doc! { "name": "Ada", "age": 36i64 })?;
//! let adults = users.find_with_filter(
//!     &doc! { "age": doc! { "$gte": 18i64 } },
//!     0,
//!     usize::MAX,
//! )?;
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`collection`] - Collection handle and index administration
//! - [`common`] - Documents, values, ids, and shared utilities
//! - [`config`] - Database configuration
//! - [`crypto`] - Authenticated encryption at rest
//! - [`errors`] - Error types and result definitions
//! - [`filter`] - Query filters over documents
//! - [`index`] - Index subsystem
//! - [`leaf`] - The database handle and builder
//! - [`repository`] - Document and typed-entity repositories
//! - [`store`] - Storage engines
//! - [`update`] - Atomic partial updates

use std::sync::LazyLock;

pub mod collection;
pub mod common;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod filter;
pub mod index;
pub mod leaf;
pub mod repository;
pub mod store;
pub mod update;

pub use common::{atomic, Atomic, ReadExecutor, WriteExecutor};
pub use common::{DocId, Document, IdGenerator, IdKind, Value};
pub use errors::{ErrorKind, MinileafError, MinileafResult};
pub use leaf::{Minileaf, MinileafBuilder};

pub(crate) static SCHEDULER: LazyLock<common::task_util::Scheduler> =
    LazyLock::new(common::task_util::Scheduler::new);
