//! Domain events for the dialogue graph
//!
//! Emitted after a graph mutation has committed. Consumers (caches, outboxes,
//! analytics mirrors) see at-most-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events that can occur in the dialogue graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DialogueEvent {
    ConversationCreated {
        conversation_id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },
    /// An utterance was attached as root or as a continuation
    UtteranceCreated {
        utterance_id: String,
        /// Set when attached as the conversation root
        conversation_id: Option<String>,
        /// Set when attached as a `NEXT` continuation
        parent_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    UtteranceUpdated {
        utterance_id: String,
        version: i64,
        timestamp: DateTime<Utc>,
    },
    UtteranceDeleted {
        utterance_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A branch was created or re-weighted
    BranchChanged {
        from_id: String,
        to_id: String,
        weight: f64,
        timestamp: DateTime<Utc>,
    },
    ConversationImported {
        conversation_id: String,
        utterance_count: usize,
        relation_count: usize,
        timestamp: DateTime<Utc>,
    },
    /// Generated utterances were appended
    ConversationExpanded {
        from_utterance_id: String,
        utterance_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl DialogueEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ConversationCreated { timestamp, .. }
            | Self::UtteranceCreated { timestamp, .. }
            | Self::UtteranceUpdated { timestamp, .. }
            | Self::UtteranceDeleted { timestamp, .. }
            | Self::BranchChanged { timestamp, .. }
            | Self::ConversationImported { timestamp, .. }
            | Self::ConversationExpanded { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type name
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::ConversationCreated { .. } => "conversation_created",
            Self::UtteranceCreated { .. } => "utterance_created",
            Self::UtteranceUpdated { .. } => "utterance_updated",
            Self::UtteranceDeleted { .. } => "utterance_deleted",
            Self::BranchChanged { .. } => "branch_changed",
            Self::ConversationImported { .. } => "conversation_imported",
            Self::ConversationExpanded { .. } => "conversation_expanded",
        }
    }

    /// Conversation this event is scoped to, when known without a lookup
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::ConversationCreated {
                conversation_id, ..
            }
            | Self::ConversationImported {
                conversation_id, ..
            } => Some(conversation_id.as_str()),
            Self::UtteranceCreated {
                conversation_id, ..
            } => conversation_id.as_deref(),
            _ => None,
        }
    }

    /// Utterance ids touched by this event
    pub fn utterance_ids(&self) -> Vec<&str> {
        match self {
            Self::UtteranceCreated {
                utterance_id,
                parent_id,
                ..
            } => std::iter::once(utterance_id.as_str())
                .chain(parent_id.as_deref())
                .collect(),
            Self::UtteranceUpdated { utterance_id, .. }
            | Self::UtteranceDeleted { utterance_id, .. } => vec![utterance_id.as_str()],
            Self::BranchChanged { from_id, to_id, .. } => vec![from_id.as_str(), to_id.as_str()],
            Self::ConversationExpanded {
                from_utterance_id,
                utterance_ids,
                ..
            } => std::iter::once(from_utterance_id.as_str())
                .chain(utterance_ids.iter().map(String::as_str))
                .collect(),
            Self::ConversationCreated { .. } | Self::ConversationImported { .. } => Vec::new(),
        }
    }

    pub fn conversation_created(conversation_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::ConversationCreated {
            conversation_id: conversation_id.into(),
            title: title.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn root_created(utterance_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::UtteranceCreated {
            utterance_id: utterance_id.into(),
            conversation_id: Some(conversation_id.into()),
            parent_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn next_created(utterance_id: impl Into<String>, parent_id: impl Into<String>) -> Self {
        Self::UtteranceCreated {
            utterance_id: utterance_id.into(),
            conversation_id: None,
            parent_id: Some(parent_id.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn utterance_updated(utterance_id: impl Into<String>, version: i64) -> Self {
        Self::UtteranceUpdated {
            utterance_id: utterance_id.into(),
            version,
            timestamp: Utc::now(),
        }
    }

    pub fn utterance_deleted(utterance_id: impl Into<String>) -> Self {
        Self::UtteranceDeleted {
            utterance_id: utterance_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn branch_changed(from_id: impl Into<String>, to_id: impl Into<String>, weight: f64) -> Self {
        Self::BranchChanged {
            from_id: from_id.into(),
            to_id: to_id.into(),
            weight,
            timestamp: Utc::now(),
        }
    }

    pub fn conversation_imported(
        conversation_id: impl Into<String>,
        utterance_count: usize,
        relation_count: usize,
    ) -> Self {
        Self::ConversationImported {
            conversation_id: conversation_id.into(),
            utterance_count,
            relation_count,
            timestamp: Utc::now(),
        }
    }

    pub fn conversation_expanded(from_utterance_id: impl Into<String>, utterance_ids: Vec<String>) -> Self {
        Self::ConversationExpanded {
            from_utterance_id: from_utterance_id.into(),
            utterance_ids,
            timestamp: Utc::now(),
        }
    }
}
