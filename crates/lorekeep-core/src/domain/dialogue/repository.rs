//! Repository trait for the dialogue graph
//!
//! One trait covers every graph operation. Implementations run each operation in
//! exactly one store transaction and return only once it has committed.

use async_trait::async_trait;

use crate::error::Result;

use super::payload::ConversationPayload;
use super::relation::Relation;
use super::traversal::GraphView;
use super::utterance::{Conversation, NewUtterance, Utterance};

/// Dialogue graph operations
///
/// Benign races are reported through the return value, not as errors: a missing
/// parent yields `None`, a stale version yields `None`, deleting a deleted
/// utterance yields `false`.
#[async_trait]
pub trait DialogueGraph: Send + Sync {
    // ========== Conversations ==========

    /// Create a conversation node
    async fn create_conversation(&self, title: &str) -> Result<Conversation>;

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// All conversations, oldest first
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    // ========== Utterances ==========

    /// Attach the entry utterance of a conversation
    ///
    /// `None` if the conversation does not exist or already has a live root. A
    /// soft-deleted root is replaced.
    async fn add_root_utterance(
        &self,
        conversation_id: &str,
        utterance: NewUtterance,
    ) -> Result<Option<Utterance>>;

    /// Append a `NEXT` continuation; `None` if the parent is missing or deleted
    async fn add_next_utterance(
        &self,
        from_utterance_id: &str,
        utterance: NewUtterance,
    ) -> Result<Option<Utterance>>;

    /// Fetch an utterance by id, deleted or not
    async fn get_utterance(&self, id: &str) -> Result<Option<Utterance>>;

    /// Replace text and tags if `expected_version` matches the stored version
    ///
    /// The version bump is an atomic compare-and-set: of several concurrent
    /// updates with the same expected version exactly one succeeds.
    async fn update_utterance(
        &self,
        id: &str,
        text: &str,
        tags: &[String],
        expected_version: i64,
    ) -> Result<Option<Utterance>>;

    /// Soft-delete; `true` only on the first delete of an existing utterance
    async fn delete_utterance(&self, id: &str) -> Result<bool>;

    // ========== Branches ==========

    /// Create a `BRANCH_TO` edge
    ///
    /// Without `weight` a new edge gets weight 1.0 and an existing one keeps its
    /// weight. With `weight` the clamped value is stored on either, in the same
    /// transaction. Both endpoints must exist and be live. Returns the stored edge.
    async fn add_branch(&self, from_id: &str, to_id: &str, weight: Option<f64>) -> Result<Relation>;

    /// Set the weight of an existing branch, clamped to the positive floor
    async fn set_branch_weight(&self, from_id: &str, to_id: &str, weight: f64) -> Result<Relation>;

    // ========== Traversal ==========

    /// The default `NEXT` chain from the root, deleted utterances spliced out
    async fn get_linear_path(&self, conversation_id: &str) -> Result<Option<Vec<Utterance>>>;

    /// The live subgraph within `depth` hops of the root (depth clamped to 1..=25)
    async fn get_graph(&self, conversation_id: &str, depth: i64) -> Result<Option<GraphView>>;

    /// A weighted random walk of at most `max_depth` steps (clamped to 1..=50)
    async fn get_random_path(&self, conversation_id: &str, max_depth: i64) -> Result<Vec<Utterance>>;

    // ========== Import / Export ==========

    /// Load a payload atomically; nothing is written if validation fails
    async fn import(&self, payload: &ConversationPayload, preserve_ids: bool) -> Result<Conversation>;

    /// Serialize the live subgraph within `depth` hops of the root
    async fn export(&self, conversation_id: &str, depth: i64) -> Result<Option<ConversationPayload>>;
}
