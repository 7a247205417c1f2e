//! Dialogue commands
//!
//! Each handler calls one engine operation and, once it has committed,
//! publishes the matching projection event. Projection never changes a
//! handler's result.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::dialogue::{
    Conversation, ConversationPayload, DialogueEvent, DialogueGraph, GraphView, NewUtterance,
    Relation, Utterance, clamp_graph_depth,
};
use crate::error::{Error, Result};
use crate::generation::GenerationBridge;
use crate::projection::{GraphCache, ProjectionPublisher};

/// Command surface over a [`DialogueGraph`]
#[derive(Clone)]
pub struct DialogueCommands {
    graph: Arc<dyn DialogueGraph>,
    publisher: ProjectionPublisher,
    cache: Option<Arc<GraphCache>>,
    bridge: Option<GenerationBridge>,
}

impl DialogueCommands {
    pub fn new(graph: Arc<dyn DialogueGraph>) -> Self {
        Self {
            graph,
            publisher: ProjectionPublisher::disabled(),
            cache: None,
            bridge: None,
        }
    }

    pub fn with_publisher(mut self, publisher: ProjectionPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Serve `get_graph` from this cache; keep it fresh with a `CacheInvalidationSink`
    pub fn with_cache(mut self, cache: Arc<GraphCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_generation(mut self, bridge: GenerationBridge) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn graph(&self) -> &Arc<dyn DialogueGraph> {
        &self.graph
    }

    pub fn has_generation(&self) -> bool {
        self.bridge.is_some()
    }

    pub async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = self.graph.create_conversation(title).await?;
        self.publisher.publish(DialogueEvent::conversation_created(
            &conversation.id,
            &conversation.title,
        ));
        Ok(conversation)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        self.graph.get_conversation(conversation_id).await
    }

    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.graph.list_conversations().await
    }

    pub async fn add_root_utterance(
        &self,
        conversation_id: &str,
        text: &str,
        character_id: Option<&str>,
    ) -> Result<Option<Utterance>> {
        let new = new_utterance(text, character_id);
        let created = self.graph.add_root_utterance(conversation_id, new).await?;
        if let Some(utterance) = &created {
            self.publisher
                .publish(DialogueEvent::root_created(&utterance.id, conversation_id));
        }
        Ok(created)
    }

    pub async fn add_next_utterance(
        &self,
        from_utterance_id: &str,
        text: &str,
        character_id: Option<&str>,
    ) -> Result<Option<Utterance>> {
        let new = new_utterance(text, character_id);
        let created = self.graph.add_next_utterance(from_utterance_id, new).await?;
        if let Some(utterance) = &created {
            self.publisher
                .publish(DialogueEvent::next_created(&utterance.id, from_utterance_id));
        }
        Ok(created)
    }

    pub async fn get_utterance(&self, utterance_id: &str) -> Result<Option<Utterance>> {
        self.graph.get_utterance(utterance_id).await
    }

    pub async fn update_utterance(
        &self,
        utterance_id: &str,
        text: &str,
        tags: &[String],
        expected_version: i64,
    ) -> Result<Option<Utterance>> {
        let updated = self
            .graph
            .update_utterance(utterance_id, text, tags, expected_version)
            .await?;
        match &updated {
            Some(utterance) => {
                self.publisher
                    .publish(DialogueEvent::utterance_updated(&utterance.id, utterance.version));
            }
            None => debug!(utterance_id = %utterance_id, expected_version, "Update rejected"),
        }
        Ok(updated)
    }

    pub async fn delete_utterance(&self, utterance_id: &str) -> Result<bool> {
        let changed = self.graph.delete_utterance(utterance_id).await?;
        if changed {
            self.publisher
                .publish(DialogueEvent::utterance_deleted(utterance_id));
        }
        Ok(changed)
    }

    /// Create (or keep) a branch, storing `weight` when given
    pub async fn add_branch(
        &self,
        from_id: &str,
        to_id: &str,
        weight: Option<f64>,
    ) -> Result<Relation> {
        let relation = self.graph.add_branch(from_id, to_id, weight).await?;
        self.publish_branch(&relation);
        Ok(relation)
    }

    pub async fn set_branch_weight(&self, from_id: &str, to_id: &str, weight: f64) -> Result<Relation> {
        let relation = self.graph.set_branch_weight(from_id, to_id, weight).await?;
        self.publish_branch(&relation);
        Ok(relation)
    }

    pub async fn get_linear_path(&self, conversation_id: &str) -> Result<Option<Vec<Utterance>>> {
        self.graph.get_linear_path(conversation_id).await
    }

    pub async fn get_graph(&self, conversation_id: &str, depth: i64) -> Result<Option<GraphView>> {
        let Some(cache) = &self.cache else {
            return self.graph.get_graph(conversation_id, depth).await;
        };

        let depth = clamp_graph_depth(depth);
        if let Some(view) = cache.get(conversation_id, depth) {
            debug!(conversation_id = %conversation_id, depth, "Graph cache hit");
            return Ok(Some(view));
        }

        let view = self.graph.get_graph(conversation_id, i64::from(depth)).await?;
        if let Some(view) = &view {
            cache.put(conversation_id, depth, view.clone());
        }
        Ok(view)
    }

    pub async fn get_random_path(&self, conversation_id: &str, max_depth: i64) -> Result<Vec<Utterance>> {
        self.graph.get_random_path(conversation_id, max_depth).await
    }

    pub async fn import(&self, payload: &ConversationPayload, preserve_ids: bool) -> Result<Conversation> {
        let conversation = self.graph.import(payload, preserve_ids).await?;
        self.publisher.publish(DialogueEvent::conversation_imported(
            &conversation.id,
            payload.utterances.len(),
            payload.relations.len(),
        ));
        Ok(conversation)
    }

    pub async fn export(&self, conversation_id: &str, depth: i64) -> Result<Option<ConversationPayload>> {
        self.graph.export(conversation_id, depth).await
    }

    /// Append generated utterances; fails with `ConfigError` when no generator is configured
    pub async fn auto_expand(
        &self,
        conversation_id: &str,
        count: usize,
        context: &str,
        from_utterance_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Utterance>> {
        let Some(bridge) = &self.bridge else {
            return Err(Error::ConfigError(
                "generation service is not configured".to_string(),
            ));
        };

        let appended = bridge
            .auto_expand(conversation_id, count, context, from_utterance_id, cancel)
            .await?;

        if !appended.is_empty()
            && let Some(parent) = self.parent_of(from_utterance_id, conversation_id).await?
        {
            self.publisher.publish(DialogueEvent::conversation_expanded(
                parent,
                appended.iter().map(|u| u.id.clone()).collect(),
            ));
        }
        Ok(appended)
    }

    async fn parent_of(
        &self,
        from_utterance_id: Option<&str>,
        conversation_id: &str,
    ) -> Result<Option<String>> {
        if let Some(id) = from_utterance_id {
            return Ok(Some(id.to_string()));
        }
        let path = self.graph.get_linear_path(conversation_id).await?;
        Ok(path
            .and_then(|path| path.into_iter().next())
            .map(|root| root.id))
    }

    fn publish_branch(&self, relation: &Relation) {
        self.publisher.publish(DialogueEvent::branch_changed(
            &relation.from,
            &relation.to,
            relation.sampling_weight(),
        ));
    }
}

fn new_utterance(text: &str, character_id: Option<&str>) -> NewUtterance {
    let new = NewUtterance::new(text);
    match character_id {
        Some(character_id) => new.with_character(character_id),
        None => new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::dialogue::SqliteDialogueGraph;
    use crate::projection::{CacheInvalidationSink, ProjectionDispatcher, ProjectionSink};
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<DialogueEvent>>,
    }

    #[async_trait]
    impl ProjectionSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn project(&self, event: &DialogueEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct RejectingSink;

    #[async_trait]
    impl ProjectionSink for RejectingSink {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn project(&self, _event: &DialogueEvent) -> Result<()> {
            Err(Error::Other("mirror unavailable".to_string()))
        }
    }

    async fn graph() -> Arc<dyn DialogueGraph> {
        let db = Database::in_memory().await.unwrap();
        Arc::new(SqliteDialogueGraph::with_seed(db.graph(), 3))
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ProjectionDispatcher::spawn(vec![sink.clone()], 32);
        let commands = DialogueCommands::new(graph().await).with_publisher(dispatcher.publisher());

        let conv = commands.create_conversation("Tavern").await.unwrap();
        let root = commands
            .add_root_utterance(&conv.id, "Welcome!", Some("innkeeper"))
            .await
            .unwrap()
            .unwrap();
        let next = commands
            .add_next_utterance(&root.id, "An ale, please.", None)
            .await
            .unwrap()
            .unwrap();
        commands.add_branch(&root.id, &next.id, Some(-5.0)).await.unwrap();
        commands.delete_utterance(&next.id).await.unwrap();
        // No change, no event
        commands.delete_utterance(&next.id).await.unwrap();

        dispatcher.shutdown().await;
        let names: Vec<_> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "conversation_created",
                "utterance_created",
                "utterance_created",
                "branch_changed",
                "utterance_deleted",
            ]
        );
    }

    #[tokio::test]
    async fn test_add_branch_applies_weight() {
        let commands = DialogueCommands::new(graph().await);
        let conv = commands.create_conversation("Road").await.unwrap();
        let a = commands.add_root_utterance(&conv.id, "A", None).await.unwrap().unwrap();
        let b = commands.add_next_utterance(&a.id, "B", None).await.unwrap().unwrap();

        let relation = commands.add_branch(&a.id, &b.id, Some(0.0)).await.unwrap();
        assert_eq!(relation.weight, Some(0.01));

        let relation = commands.add_branch(&a.id, &b.id, None).await.unwrap();
        assert_eq!(relation.weight, Some(0.01));
    }

    #[tokio::test]
    async fn test_rejected_update_publishes_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ProjectionDispatcher::spawn(vec![sink.clone()], 8);
        let commands = DialogueCommands::new(graph().await).with_publisher(dispatcher.publisher());
        let conv = commands.graph().create_conversation("Quiet").await.unwrap();
        let root = commands
            .graph()
            .add_root_utterance(&conv.id, NewUtterance::new("Hm."))
            .await
            .unwrap()
            .unwrap();

        let stale = commands.update_utterance(&root.id, "Hmm.", &[], 9).await.unwrap();
        assert!(stale.is_none());

        dispatcher.shutdown().await;
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_change_result() {
        let dispatcher = ProjectionDispatcher::spawn(vec![Arc::new(RejectingSink)], 8);
        let commands = DialogueCommands::new(graph().await).with_publisher(dispatcher.publisher());

        let conv = commands.create_conversation("Dock").await.unwrap();
        let root = commands.add_root_utterance(&conv.id, "Ahoy", None).await.unwrap();
        dispatcher.shutdown().await;

        assert!(root.is_some());
        assert_eq!(commands.list_conversations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_graph_cache_read_through_and_invalidation() {
        let cache = Arc::new(GraphCache::new());
        let dispatcher =
            ProjectionDispatcher::spawn(vec![Arc::new(CacheInvalidationSink::new(cache.clone()))], 8);
        let commands = DialogueCommands::new(graph().await)
            .with_publisher(dispatcher.publisher())
            .with_cache(cache.clone());

        let conv = commands.create_conversation("Market").await.unwrap();
        let root = commands.add_root_utterance(&conv.id, "Fresh fish!", None).await.unwrap().unwrap();

        let view = commands.get_graph(&conv.id, 0).await.unwrap().unwrap();
        assert_eq!(view.nodes.len(), 1);
        assert!(cache.get(&conv.id, 10).is_some());

        commands.add_next_utterance(&root.id, "How much?", None).await.unwrap();
        dispatcher.shutdown().await;
        assert!(cache.get(&conv.id, 10).is_none());

        let view = commands.get_graph(&conv.id, 10).await.unwrap().unwrap();
        assert_eq!(view.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_auto_expand_requires_generation() {
        let commands = DialogueCommands::new(graph().await);
        assert!(!commands.has_generation());

        let err = commands
            .auto_expand("c1", 1, "", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E600");
    }
}
