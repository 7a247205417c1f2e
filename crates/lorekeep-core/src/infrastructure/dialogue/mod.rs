//! Dialogue graph infrastructure implementations
//!
//! This module contains the SQLite implementation of the `DialogueGraph` trait.

mod repository;

pub use repository::SqliteDialogueGraph;
