//! Commands module - dialogue operations as library functions
//!
//! These commands are used by the CLI and by embedding services.

pub mod dialogue;

pub use dialogue::DialogueCommands;
