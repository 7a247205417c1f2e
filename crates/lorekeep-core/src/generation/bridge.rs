//! Generation bridge: appends generated utterances to a conversation

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::dialogue::{DialogueGraph, Utterance};
use crate::error::{Error, Result};

use super::client::UtteranceGenerator;

/// Default upper bound on utterances per expansion
pub const DEFAULT_MAX_COUNT: usize = 10;

/// Connects an [`UtteranceGenerator`] to a [`DialogueGraph`]
#[derive(Clone)]
pub struct GenerationBridge {
    graph: Arc<dyn DialogueGraph>,
    generator: Arc<dyn UtteranceGenerator>,
    max_count: usize,
}

impl GenerationBridge {
    pub fn new(graph: Arc<dyn DialogueGraph>, generator: Arc<dyn UtteranceGenerator>) -> Self {
        Self {
            graph,
            generator,
            max_count: DEFAULT_MAX_COUNT,
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count.max(1);
        self
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Generate up to `count` utterances and append them as a `NEXT` chain
    ///
    /// The chain hangs off `from_utterance_id`, or the conversation's live root
    /// when none is given. Generator failures yield an empty result; only
    /// cancellation is an error. Utterances appended before a cancellation stay
    /// committed.
    pub async fn auto_expand(
        &self,
        conversation_id: &str,
        count: usize,
        context: &str,
        from_utterance_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Utterance>> {
        if count == 0 || count > self.max_count {
            debug!(count, max_count = self.max_count, "Expansion count out of range");
            return Ok(Vec::new());
        }

        let Some(mut attach_to) = self.attachment_point(conversation_id, from_utterance_id).await?
        else {
            debug!(conversation_id = %conversation_id, "No attachment point for expansion");
            return Ok(Vec::new());
        };

        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(conversation_id = %conversation_id, "Expansion cancelled during generation");
                return Err(Error::Cancelled);
            }
            result = self.generator.generate(context, count) => result,
        };

        let items = match generated {
            Ok(items) => items,
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Generation failed, nothing appended");
                return Ok(Vec::new());
            }
        };

        let mut appended = Vec::with_capacity(count.min(items.len()));
        for item in items.into_iter().take(count) {
            if cancel.is_cancelled() {
                info!(appended = appended.len(), "Expansion cancelled while appending");
                return Err(Error::Cancelled);
            }
            if item.text.trim().is_empty() {
                debug!("Skipping blank generated utterance");
                continue;
            }

            match self
                .graph
                .add_next_utterance(&attach_to, item.into_new_utterance())
                .await?
            {
                Some(utterance) => {
                    attach_to = utterance.id.clone();
                    appended.push(utterance);
                }
                None => {
                    warn!(from_utterance_id = %attach_to, "Attachment point vanished, stopping expansion");
                    break;
                }
            }
        }

        info!(
            conversation_id = %conversation_id,
            requested = count,
            appended = appended.len(),
            "Conversation expanded"
        );
        Ok(appended)
    }

    async fn attachment_point(
        &self,
        conversation_id: &str,
        from_utterance_id: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(id) = from_utterance_id {
            return Ok(Some(id.to_string()));
        }
        let root = self
            .graph
            .get_linear_path(conversation_id)
            .await?
            .and_then(|path| path.into_iter().next());
        Ok(root.map(|u| u.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dialogue::NewUtterance;
    use crate::generation::GeneratedUtterance;
    use crate::infrastructure::dialogue::SqliteDialogueGraph;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedGenerator {
        lines: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(lines: Vec<&'static str>) -> Self {
            Self {
                lines,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UtteranceGenerator for ScriptedGenerator {
        async fn generate(&self, _context: &str, _count: usize) -> Result<Vec<GeneratedUtterance>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.lines.iter().map(|l| GeneratedUtterance::new(*l)).collect())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl UtteranceGenerator for FailingGenerator {
        async fn generate(&self, _context: &str, _count: usize) -> Result<Vec<GeneratedUtterance>> {
            Err(Error::GenerationFailed("HTTP 500".to_string()))
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl UtteranceGenerator for StalledGenerator {
        async fn generate(&self, _context: &str, _count: usize) -> Result<Vec<GeneratedUtterance>> {
            std::future::pending().await
        }
    }

    async fn setup() -> (Arc<SqliteDialogueGraph>, String, String) {
        let db = Database::in_memory().await.unwrap();
        let graph = Arc::new(SqliteDialogueGraph::with_seed(db.graph(), 1));
        let conv = graph.create_conversation("Gate").await.unwrap();
        let root = graph
            .add_root_utterance(&conv.id, NewUtterance::new("Halt!"))
            .await
            .unwrap()
            .unwrap();
        (graph, conv.id, root.id)
    }

    #[tokio::test]
    async fn test_expand_appends_linear_chain() {
        let (graph, conv_id, _) = setup().await;
        let generator = Arc::new(ScriptedGenerator::new(vec!["Who goes there?", "A friend.", "Pass."]));
        let bridge = GenerationBridge::new(graph.clone(), generator.clone());

        let appended = bridge
            .auto_expand(&conv_id, 2, "gate scene", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(appended.len(), 2);
        let path = graph.get_linear_path(&conv_id).await.unwrap().unwrap();
        let texts: Vec<_> = path.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["Halt!", "Who goes there?", "A friend."]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expand_from_explicit_utterance() {
        let (graph, conv_id, root_id) = setup().await;
        let mid = graph
            .add_next_utterance(&root_id, NewUtterance::new("Mid"))
            .await
            .unwrap()
            .unwrap();
        let bridge = GenerationBridge::new(graph.clone(), Arc::new(ScriptedGenerator::new(vec!["End"])));

        let appended = bridge
            .auto_expand(&conv_id, 1, "", Some(&mid.id), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(appended.len(), 1);
        let path = graph.get_linear_path(&conv_id).await.unwrap().unwrap();
        assert_eq!(path.last().unwrap().text, "End");
    }

    #[tokio::test]
    async fn test_count_out_of_range_skips_generator() {
        let (graph, conv_id, _) = setup().await;
        let generator = Arc::new(ScriptedGenerator::new(vec!["x"]));
        let bridge = GenerationBridge::new(graph, generator.clone()).with_max_count(5);

        for count in [0, 6] {
            let appended = bridge
                .auto_expand(&conv_id, count, "", None, &CancellationToken::new())
                .await
                .unwrap();
            assert!(appended.is_empty());
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_root_yields_empty() {
        let (graph, _, _) = setup().await;
        let empty = graph.create_conversation("Empty").await.unwrap();
        let bridge = GenerationBridge::new(graph, Arc::new(ScriptedGenerator::new(vec!["x"])));

        let appended = bridge
            .auto_expand(&empty.id, 1, "", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(appended.is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_degrades_to_empty() {
        let (graph, conv_id, _) = setup().await;
        let bridge = GenerationBridge::new(graph.clone(), Arc::new(FailingGenerator));

        let appended = bridge
            .auto_expand(&conv_id, 3, "", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(appended.is_empty());
        let path = graph.get_linear_path(&conv_id).await.unwrap().unwrap();
        assert_eq!(path.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_an_error() {
        let (graph, conv_id, _) = setup().await;
        let bridge = GenerationBridge::new(graph, Arc::new(StalledGenerator));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = bridge
            .auto_expand(&conv_id, 1, "", None, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}
