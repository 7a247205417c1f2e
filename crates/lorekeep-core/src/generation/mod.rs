//! Utterance generation
//!
//! This module provides:
//! - The `UtteranceGenerator` collaborator trait
//! - An HTTP client for a generation service
//! - The bridge that appends generated lines to a conversation

mod bridge;
mod client;
mod types;

pub use bridge::{DEFAULT_MAX_COUNT, GenerationBridge};
pub use client::{HttpUtteranceGenerator, HttpUtteranceGeneratorBuilder, UtteranceGenerator};
pub use types::{GenerateRequest, GenerateResponse, GeneratedUtterance};
