//! Lorekeep Core Library
//!
//! This crate provides the dialogue graph engine behind Lorekeep, including:
//! - Storage (SQLite property graph, migrations, transactional sessions)
//! - Dialogue domain (utterances, relations, traversal, weighted walks)
//! - The SQLite-backed engine
//! - Generation bridge (external utterance generator over HTTP)
//! - Event projection (cache invalidation, JSONL outbox)
//! - Commands used by the CLI

pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod generation;
pub mod infrastructure;
pub mod projection;
pub mod storage;

#[cfg(test)]
mod config_tests;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::commands::DialogueCommands;
    pub use crate::config::Config;
    pub use crate::domain::dialogue::{
        Conversation, ConversationPayload, DialogueEvent, DialogueGraph, GraphView, NewUtterance,
        Relation, RelationType, Utterance,
    };
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::dialogue::SqliteDialogueGraph;
    pub use crate::storage::Database;
}
