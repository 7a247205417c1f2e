//! Dialogue graph domain
//!
//! Conversations own a tree-like graph of utterances:
//!
//! ```text
//! (Conversation) -ROOT-> (Utterance) -NEXT-> (Utterance) -NEXT-> ...
//!                              \
//!                               -BRANCH_TO{weight}-> (Utterance) ...
//! ```
//!
//! Utterances are soft-deleted and versioned. Traversals skip deleted nodes in
//! their results but still walk through them.
//!
//! # Modules
//!
//! - `utterance`: Conversation and utterance nodes
//! - `relation`: `ROOT`, `NEXT`, `BRANCH_TO` edges and weight clamping
//! - `traversal`: Depth limits, subgraph views, recursive CTE builders
//! - `walk`: Roulette-wheel random walks
//! - `payload`: Import/export documents and import validation
//! - `event`: Events emitted after committed mutations
//! - `repository`: The `DialogueGraph` trait

pub mod event;
pub mod payload;
pub mod relation;
pub mod repository;
pub mod traversal;
pub mod utterance;
pub mod walk;

pub use event::DialogueEvent;
pub use payload::{ConversationPayload, ConversationRecord, ImportPlan, RelationRecord, UtteranceRecord};
pub use relation::{
    DEFAULT_BRANCH_WEIGHT, MIN_BRANCH_WEIGHT, Relation, RelationType, clamp_branch_weight,
};
pub use repository::DialogueGraph;
pub use traversal::{
    GRAPH_DEPTH_DEFAULT, GRAPH_DEPTH_MAX, GraphView, LINEAR_PATH_MAX_HOPS, TraversalQuery,
    WALK_DEPTH_DEFAULT, WALK_DEPTH_MAX, clamp_graph_depth, clamp_walk_depth,
};
pub use utterance::{Conversation, NewUtterance, Utterance, normalize_tags};
pub use walk::{roulette_select, weighted_walk};
