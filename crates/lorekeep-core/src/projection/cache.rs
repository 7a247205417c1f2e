//! Read-through cache of conversation subgraphs

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::dialogue::{DialogueEvent, GraphView};
use crate::error::Result;

use super::ProjectionSink;

/// Cached `GetGraph` results keyed by conversation and clamped depth
#[derive(Debug, Default)]
pub struct GraphCache {
    entries: RwLock<HashMap<(String, u32), GraphView>>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation_id: &str, depth: u32) -> Option<GraphView> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(&(conversation_id.to_string(), depth)).cloned()
    }

    pub fn put(&self, conversation_id: &str, depth: u32, view: GraphView) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert((conversation_id.to_string(), depth), view);
    }

    /// Drop every view of a conversation
    pub fn invalidate_conversation(&self, conversation_id: &str) -> usize {
        self.retain(|(conv, _), _| conv != conversation_id)
    }

    /// Drop every view containing any of the given utterances
    pub fn invalidate_utterances(&self, utterance_ids: &[&str]) -> usize {
        if utterance_ids.is_empty() {
            return 0;
        }
        self.retain(|_, view| !utterance_ids.iter().any(|id| view.contains(id)))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retain(&self, keep: impl Fn(&(String, u32), &GraphView) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|key, view| keep(key, view));
        before - entries.len()
    }
}

/// Keeps a [`GraphCache`] consistent with committed mutations
pub struct CacheInvalidationSink {
    cache: Arc<GraphCache>,
}

impl CacheInvalidationSink {
    pub fn new(cache: Arc<GraphCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ProjectionSink for CacheInvalidationSink {
    fn name(&self) -> &str {
        "graph-cache"
    }

    async fn project(&self, event: &DialogueEvent) -> Result<()> {
        let dropped = match event {
            // Imports may upsert utterances shared with other conversations
            DialogueEvent::ConversationImported { .. } => {
                let dropped = self.cache.len();
                self.cache.clear();
                dropped
            }
            _ => {
                let by_conversation = event
                    .conversation_id()
                    .map(|id| self.cache.invalidate_conversation(id))
                    .unwrap_or(0);
                by_conversation + self.cache.invalidate_utterances(&event.utterance_ids())
            }
        };

        if dropped > 0 {
            debug!(event = event.event_type_name(), dropped, "Graph cache invalidated");
        }
        Ok(())
    }
}
