//! Storage layer - SQLite-backed property graph
//!
//! Provides database management, bootstrap migrations, and the transactional
//! read/write primitives the dialogue engine is built on.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning (node/relationship tables, constraints, indexes)
//! - `graph_store`: One transaction per engine operation
//!
//! # Usage
//!
//! ```ignore
//! use lorekeep_core::storage::Database;
//!
//! let db = Database::in_memory().await?;
//! let store = db.graph();
//! let mut session = store.read().await?;
//! ```

pub mod database;
pub mod graph_store;
pub mod migrations;

pub use database::{Database, DatabaseConfig, default_database_path};
pub use graph_store::{GraphStore, ReadSession, WriteSession};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
