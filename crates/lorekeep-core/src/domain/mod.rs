//! Domain layer
//!
//! Contains the core dialogue graph model and its pure algorithms.

pub mod dialogue;
