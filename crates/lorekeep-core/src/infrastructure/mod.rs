//! Infrastructure layer
//!
//! Contains store-backed implementations of the domain traits.

pub mod dialogue;
