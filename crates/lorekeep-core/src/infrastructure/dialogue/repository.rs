//! SQLite implementation of the DialogueGraph
//!
//! Each operation runs in exactly one [`GraphStore`] session. Traversals are
//! recursive CTEs rendered by [`TraversalQuery`].

use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::domain::dialogue::traversal::linear_chain_query;
use crate::domain::dialogue::{
    Conversation, ConversationPayload, ConversationRecord, DialogueGraph, GraphView, ImportPlan,
    LINEAR_PATH_MAX_HOPS, NewUtterance, Relation, RelationRecord, RelationType, TraversalQuery,
    Utterance, UtteranceRecord, clamp_branch_weight, clamp_graph_depth, clamp_walk_depth,
    normalize_tags, weighted_walk,
};
use crate::error::{Error, Result};
use crate::storage::GraphStore;

const UTTERANCE_COLUMNS: &str =
    "id, text, character_id, version, deleted, tags, created_at, updated_at";

/// SQLite implementation of the dialogue graph
pub struct SqliteDialogueGraph {
    store: GraphStore,
    rng: Mutex<StdRng>,
}

impl SqliteDialogueGraph {
    /// Create an engine with an entropy-seeded sampler
    pub fn new(store: GraphStore) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create an engine with a fixed seed (reproducible random paths)
    pub fn with_seed(store: GraphStore, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Create an engine from the `[graph]` configuration section
    pub fn from_config(store: GraphStore, config: &GraphConfig) -> Self {
        match config.random_seed {
            Some(seed) => Self::with_seed(store, seed),
            None => Self::new(store),
        }
    }

    /// Get the underlying graph store
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    fn walk(&self, view: &GraphView, start: &str, max_steps: u32) -> Vec<String> {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        weighted_walk(view, start, max_steps, &mut *rng)
    }
}

#[async_trait]
impl DialogueGraph for SqliteDialogueGraph {
    // ========== Conversations ==========

    async fn create_conversation(&self, title: &str) -> Result<Conversation> {
        let conversation = Conversation::new(title);

        let mut session = self.store.write().await?;
        sqlx::query("INSERT INTO conversations (id, title, created_at) VALUES (?, ?, ?)")
            .bind(&conversation.id)
            .bind(&conversation.title)
            .bind(conversation.created_at.to_rfc3339())
            .execute(session.conn())
            .await?;
        session.commit().await?;

        info!(conversation_id = %conversation.id, title = %conversation.title, "Conversation created");
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let mut session = self.store.read().await?;
        let conversation = fetch_conversation(session.conn(), id).await?;
        session.finish().await?;
        Ok(conversation)
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut session = self.store.read().await?;
        let rows: Vec<ConversationRow> = sqlx::query_as(
            "SELECT id, title, created_at FROM conversations ORDER BY created_at, rowid",
        )
        .fetch_all(session.conn())
        .await?;
        session.finish().await?;

        Ok(rows.into_iter().map(ConversationRow::into_conversation).collect())
    }

    // ========== Utterances ==========

    async fn add_root_utterance(
        &self,
        conversation_id: &str,
        utterance: NewUtterance,
    ) -> Result<Option<Utterance>> {
        let mut session = self.store.write().await?;

        if fetch_conversation(session.conn(), conversation_id).await?.is_none() {
            debug!(conversation_id = %conversation_id, "Root not added: conversation missing");
            return Ok(None);
        }

        let existing: Option<(String, Option<bool>)> = sqlx::query_as(
            r#"
            SELECT r.to_id, u.deleted
            FROM relations r LEFT JOIN utterances u ON u.id = r.to_id
            WHERE r.from_id = ? AND r.rel_type = ?
            "#,
        )
        .bind(conversation_id)
        .bind(RelationType::Root.as_str())
        .fetch_optional(session.conn())
        .await?;

        match existing {
            Some((root_id, Some(false))) => {
                debug!(conversation_id = %conversation_id, root_id = %root_id, "Root not added: live root exists");
                return Ok(None);
            }
            Some((root_id, _)) => {
                sqlx::query("DELETE FROM relations WHERE from_id = ? AND rel_type = ?")
                    .bind(conversation_id)
                    .bind(RelationType::Root.as_str())
                    .execute(session.conn())
                    .await?;
                info!(conversation_id = %conversation_id, old_root_id = %root_id, "Replacing deleted root");
            }
            None => {}
        }

        let created = Utterance::create(utterance);
        insert_utterance(session.conn(), &created).await?;
        insert_relation(
            session.conn(),
            &Relation::new(conversation_id, &created.id, RelationType::Root),
        )
        .await?;
        session.commit().await?;

        info!(conversation_id = %conversation_id, utterance_id = %created.id, "Root utterance added");
        Ok(Some(created))
    }

    async fn add_next_utterance(
        &self,
        from_utterance_id: &str,
        utterance: NewUtterance,
    ) -> Result<Option<Utterance>> {
        let mut session = self.store.write().await?;

        match fetch_utterance(session.conn(), from_utterance_id).await? {
            Some(parent) if parent.is_live() => {}
            _ => {
                debug!(from_utterance_id = %from_utterance_id, "Next not added: source missing or deleted");
                return Ok(None);
            }
        }

        let created = Utterance::create(utterance);
        insert_utterance(session.conn(), &created).await?;
        insert_relation(
            session.conn(),
            &Relation::new(from_utterance_id, &created.id, RelationType::Next),
        )
        .await?;
        session.commit().await?;

        debug!(from_utterance_id = %from_utterance_id, utterance_id = %created.id, "Next utterance added");
        Ok(Some(created))
    }

    async fn get_utterance(&self, id: &str) -> Result<Option<Utterance>> {
        let mut session = self.store.read().await?;
        let utterance = fetch_utterance(session.conn(), id).await?;
        session.finish().await?;
        Ok(utterance)
    }

    async fn update_utterance(
        &self,
        id: &str,
        text: &str,
        tags: &[String],
        expected_version: i64,
    ) -> Result<Option<Utterance>> {
        let tags_json = serde_json::to_string(&normalize_tags(tags))?;

        let mut session = self.store.write().await?;
        let row: Option<UtteranceRow> = sqlx::query_as(&format!(
            r#"
            UPDATE utterances
            SET text = ?, tags = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND deleted = 0 AND version = ?
            RETURNING {UTTERANCE_COLUMNS}
            "#
        ))
        .bind(text)
        .bind(&tags_json)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(expected_version)
        .fetch_optional(session.conn())
        .await?;
        session.commit().await?;

        match row {
            Some(row) => {
                let updated = row.into_utterance();
                info!(utterance_id = %id, version = updated.version, "Utterance updated");
                Ok(Some(updated))
            }
            None => {
                debug!(utterance_id = %id, expected_version, "Update rejected: missing, deleted or stale");
                Ok(None)
            }
        }
    }

    async fn delete_utterance(&self, id: &str) -> Result<bool> {
        let mut session = self.store.write().await?;
        let result =
            sqlx::query("UPDATE utterances SET deleted = 1, updated_at = ? WHERE id = ? AND deleted = 0")
                .bind(Utc::now().to_rfc3339())
                .bind(id)
                .execute(session.conn())
                .await?;
        session.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(utterance_id = %id, "Utterance deleted");
        }
        Ok(deleted)
    }

    // ========== Branches ==========

    async fn add_branch(&self, from_id: &str, to_id: &str, weight: Option<f64>) -> Result<Relation> {
        let mut session = self.store.write().await?;

        for id in [from_id, to_id] {
            match fetch_utterance(session.conn(), id).await? {
                Some(u) if u.is_live() => {}
                _ => return Err(Error::UtteranceNotFound(id.to_string())),
            }
        }

        match weight {
            Some(weight) => {
                upsert_branch(session.conn(), &Relation::branch(from_id, to_id, weight)).await?
            }
            None => {
                insert_relation(session.conn(), &Relation::new(from_id, to_id, RelationType::BranchTo))
                    .await?
            }
        }
        let stored = fetch_branch(session.conn(), from_id, to_id)
            .await?
            .ok_or_else(|| Error::EdgeNotFound {
                from: from_id.to_string(),
                to: to_id.to_string(),
            })?;
        session.commit().await?;

        debug!(from_id = %from_id, to_id = %to_id, weight = ?stored.weight, "Branch added");
        Ok(stored)
    }

    async fn set_branch_weight(&self, from_id: &str, to_id: &str, weight: f64) -> Result<Relation> {
        let clamped = clamp_branch_weight(weight);
        if clamped != weight {
            debug!(requested = weight, stored = clamped, "Branch weight clamped");
        }

        let mut session = self.store.write().await?;
        let result = sqlx::query(
            "UPDATE relations SET weight = ? WHERE from_id = ? AND to_id = ? AND rel_type = ?",
        )
        .bind(clamped)
        .bind(from_id)
        .bind(to_id)
        .bind(RelationType::BranchTo.as_str())
        .execute(session.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::EdgeNotFound {
                from: from_id.to_string(),
                to: to_id.to_string(),
            });
        }
        session.commit().await?;

        info!(from_id = %from_id, to_id = %to_id, weight = clamped, "Branch weight set");
        Ok(Relation::branch(from_id, to_id, clamped))
    }

    // ========== Traversal ==========

    async fn get_linear_path(&self, conversation_id: &str) -> Result<Option<Vec<Utterance>>> {
        let mut session = self.store.read().await?;

        let Some(root_id) = fetch_root_id(session.conn(), conversation_id).await? else {
            return Ok(None);
        };
        match fetch_utterance(session.conn(), &root_id).await? {
            Some(root) if root.is_live() => {}
            _ => return Ok(None),
        }

        let rows: Vec<UtteranceRow> = linear_chain_query(&root_id, LINEAR_PATH_MAX_HOPS)
            .build_query_as()
            .fetch_all(session.conn())
            .await?;
        session.finish().await?;

        let mut seen = HashSet::new();
        let mut path = Vec::new();
        for row in rows {
            if !seen.insert(row.id.clone()) {
                debug!(utterance_id = %row.id, "Linear path revisits an utterance; stopping");
                break;
            }
            if !row.deleted {
                path.push(row.into_utterance());
            }
        }
        Ok(Some(path))
    }

    async fn get_graph(&self, conversation_id: &str, depth: i64) -> Result<Option<GraphView>> {
        let depth = clamp_graph_depth(depth);
        let mut session = self.store.read().await?;

        if fetch_conversation(session.conn(), conversation_id).await?.is_none() {
            return Ok(None);
        }
        let Some(root_id) = fetch_root_id(session.conn(), conversation_id).await? else {
            return Ok(Some(GraphView::default()));
        };

        let mut view = load_view(session.conn(), &TraversalQuery::starting_at(&root_id).within(depth)).await?;
        session.finish().await?;

        if let Some(start) = start_of(&view, &root_id) {
            view.order_by_distance(&start);
        }

        debug!(
            conversation_id = %conversation_id,
            depth,
            nodes = view.nodes.len(),
            relations = view.relations.len(),
            "Graph loaded"
        );
        Ok(Some(view))
    }

    async fn get_random_path(&self, conversation_id: &str, max_depth: i64) -> Result<Vec<Utterance>> {
        let max_steps = clamp_walk_depth(max_depth);
        let mut session = self.store.read().await?;

        let Some(root_id) = fetch_root_id(session.conn(), conversation_id).await? else {
            return Ok(Vec::new());
        };
        let mut view = load_view(session.conn(), &TraversalQuery::starting_at(&root_id)).await?;
        session.finish().await?;

        let Some(start) = start_of(&view, &root_id) else {
            return Ok(Vec::new());
        };
        view.order_by_distance(&start);
        let Some(start) = view.detect_start().map(|n| n.id.clone()) else {
            return Ok(Vec::new());
        };

        let ids = self.walk(&view, &start, max_steps);
        let path: Vec<Utterance> = ids
            .iter()
            .filter_map(|id| view.node(id).cloned())
            .collect();

        debug!(conversation_id = %conversation_id, start = %start, steps = path.len().saturating_sub(1), "Random path sampled");
        Ok(path)
    }

    // ========== Import / Export ==========

    async fn import(&self, payload: &ConversationPayload, preserve_ids: bool) -> Result<Conversation> {
        let plan = ImportPlan::build(payload, preserve_ids)?;

        let mut session = self.store.write().await?;
        let row: ConversationRow = sqlx::query_as(
            r#"
            INSERT INTO conversations (id, title, created_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title
            RETURNING id, title, created_at
            "#,
        )
        .bind(&plan.conversation_id)
        .bind(&plan.title)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(session.conn())
        .await?;

        for utterance in &plan.utterances {
            upsert_utterance(session.conn(), utterance).await?;
        }

        for relation in &plan.relations {
            match relation.rel_type {
                RelationType::BranchTo => upsert_branch(session.conn(), relation).await?,
                _ => insert_relation(session.conn(), relation).await?,
            }
        }

        if let Some(root_id) = &plan.root_id {
            sqlx::query("DELETE FROM relations WHERE from_id = ? AND rel_type = ?")
                .bind(&plan.conversation_id)
                .bind(RelationType::Root.as_str())
                .execute(session.conn())
                .await?;
            insert_relation(
                session.conn(),
                &Relation::new(&plan.conversation_id, root_id, RelationType::Root),
            )
            .await?;
        }
        session.commit().await?;

        info!(
            conversation_id = %plan.conversation_id,
            utterances = plan.utterances.len(),
            relations = plan.relations.len(),
            preserve_ids,
            "Conversation imported"
        );
        Ok(row.into_conversation())
    }

    async fn export(&self, conversation_id: &str, depth: i64) -> Result<Option<ConversationPayload>> {
        let depth = clamp_graph_depth(depth);
        let mut session = self.store.read().await?;

        let Some(conversation) = fetch_conversation(session.conn(), conversation_id).await? else {
            return Ok(None);
        };
        let record = ConversationRecord {
            id: Some(conversation.id.clone()),
            title: conversation.title.clone(),
        };

        let Some(root_id) = fetch_root_id(session.conn(), conversation_id).await? else {
            session.finish().await?;
            return Ok(Some(ConversationPayload {
                conversation: record,
                root_id: None,
                utterances: Vec::new(),
                relations: Vec::new(),
            }));
        };

        let mut view = load_view(session.conn(), &TraversalQuery::starting_at(&root_id).within(depth)).await?;
        session.finish().await?;

        let start = start_of(&view, &root_id);
        if let Some(start) = &start {
            view.order_by_distance(start);
        }

        let mut relations: Vec<RelationRecord> = Vec::with_capacity(view.relations.len() + 1);
        if let Some(start) = &start {
            relations.push(RelationRecord::from(&Relation::new(
                &conversation.id,
                start,
                RelationType::Root,
            )));
        }
        relations.extend(view.relations.iter().map(RelationRecord::from));

        info!(conversation_id = %conversation_id, depth, utterances = view.nodes.len(), "Conversation exported");
        Ok(Some(ConversationPayload {
            conversation: record,
            root_id: start,
            utterances: view.nodes.iter().map(UtteranceRecord::from).collect(),
            relations,
        }))
    }
}

/// The declared root if it survived, else the heuristic entry point
fn start_of(view: &GraphView, root_id: &str) -> Option<String> {
    if view.contains(root_id) {
        Some(root_id.to_string())
    } else {
        let start = view.detect_start().map(|n| n.id.clone());
        if start.is_some() {
            warn!(root_id = %root_id, "Root is deleted; using heuristic start");
        }
        start
    }
}

// ========== Statement helpers ==========

async fn fetch_conversation(conn: &mut SqliteConnection, id: &str) -> Result<Option<Conversation>> {
    let row: Option<ConversationRow> =
        sqlx::query_as("SELECT id, title, created_at FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(ConversationRow::into_conversation))
}

async fn fetch_root_id(conn: &mut SqliteConnection, conversation_id: &str) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT to_id FROM relations WHERE from_id = ? AND rel_type = ?")
            .bind(conversation_id)
            .bind(RelationType::Root.as_str())
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(id,)| id))
}

async fn fetch_utterance(conn: &mut SqliteConnection, id: &str) -> Result<Option<Utterance>> {
    let row: Option<UtteranceRow> =
        sqlx::query_as(&format!("SELECT {UTTERANCE_COLUMNS} FROM utterances WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(UtteranceRow::into_utterance))
}

async fn fetch_branch(conn: &mut SqliteConnection, from_id: &str, to_id: &str) -> Result<Option<Relation>> {
    let row: Option<RelationRow> = sqlx::query_as(
        "SELECT from_id, to_id, rel_type, weight FROM relations WHERE from_id = ? AND to_id = ? AND rel_type = ?",
    )
    .bind(from_id)
    .bind(to_id)
    .bind(RelationType::BranchTo.as_str())
    .fetch_optional(conn)
    .await?;
    row.map(RelationRow::into_relation).transpose()
}

async fn insert_utterance(conn: &mut SqliteConnection, utterance: &Utterance) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO utterances ({UTTERANCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&utterance.id)
    .bind(&utterance.text)
    .bind(&utterance.character_id)
    .bind(utterance.version)
    .bind(utterance.deleted)
    .bind(serde_json::to_string(&utterance.tags)?)
    .bind(utterance.created_at.to_rfc3339())
    .bind(utterance.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

async fn upsert_utterance(conn: &mut SqliteConnection, utterance: &Utterance) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO utterances ({UTTERANCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            text = excluded.text,
            character_id = excluded.character_id,
            version = excluded.version,
            deleted = excluded.deleted,
            tags = excluded.tags,
            updated_at = excluded.updated_at
        "#
    ))
    .bind(&utterance.id)
    .bind(&utterance.text)
    .bind(&utterance.character_id)
    .bind(utterance.version)
    .bind(utterance.deleted)
    .bind(serde_json::to_string(&utterance.tags)?)
    .bind(utterance.created_at.to_rfc3339())
    .bind(utterance.updated_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Merge-or-create; an existing edge is left untouched
async fn insert_relation(conn: &mut SqliteConnection, relation: &Relation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO relations (from_id, to_id, rel_type, weight, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(from_id, to_id, rel_type) DO NOTHING
        "#,
    )
    .bind(&relation.from)
    .bind(&relation.to)
    .bind(relation.rel_type.as_str())
    .bind(relation.weight)
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Merge-or-create taking the incoming weight
async fn upsert_branch(conn: &mut SqliteConnection, relation: &Relation) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO relations (from_id, to_id, rel_type, weight, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(from_id, to_id, rel_type) DO UPDATE SET weight = excluded.weight
        "#,
    )
    .bind(&relation.from)
    .bind(&relation.to)
    .bind(relation.rel_type.as_str())
    .bind(relation.sampling_weight())
    .bind(Utc::now().to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

async fn load_view(conn: &mut SqliteConnection, query: &TraversalQuery) -> Result<GraphView> {
    let nodes: Vec<UtteranceRow> = query.nodes_query().build_query_as().fetch_all(&mut *conn).await?;
    let relations: Vec<RelationRow> = query
        .relations_query()
        .build_query_as()
        .fetch_all(&mut *conn)
        .await?;

    Ok(GraphView {
        nodes: nodes.into_iter().map(UtteranceRow::into_utterance).collect(),
        relations: relations
            .into_iter()
            .map(RelationRow::into_relation)
            .collect::<Result<_>>()?,
    })
}

// ========== Row types ==========

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(Debug, FromRow)]
struct ConversationRow {
    id: String,
    title: String,
    created_at: String,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct UtteranceRow {
    id: String,
    text: String,
    character_id: Option<String>,
    version: i64,
    deleted: bool,
    tags: String,
    created_at: String,
    updated_at: String,
}

impl UtteranceRow {
    fn into_utterance(self) -> Utterance {
        let tags: BTreeSet<String> = serde_json::from_str(&self.tags).unwrap_or_default();

        Utterance {
            id: self.id,
            text: self.text,
            character_id: self.character_id,
            version: self.version,
            deleted: self.deleted,
            tags,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    from_id: String,
    to_id: String,
    rel_type: String,
    weight: Option<f64>,
}

impl RelationRow {
    fn into_relation(self) -> Result<Relation> {
        let rel_type = RelationType::parse(&self.rel_type)
            .ok_or_else(|| Error::Other(format!("Invalid relation type: {}", self.rel_type)))?;

        Ok(Relation {
            from: self.from_id,
            to: self.to_id,
            rel_type,
            weight: rel_type.is_weighted().then(|| clamp_branch_weight(self.weight.unwrap_or(1.0))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dialogue::MIN_BRANCH_WEIGHT;
    use crate::storage::Database;

    async fn setup_test_db() -> SqliteDialogueGraph {
        let db = Database::in_memory().await.expect("Failed to create in-memory database");
        SqliteDialogueGraph::with_seed(db.graph(), 7)
    }

    async fn chain(graph: &SqliteDialogueGraph, lines: &[&str]) -> (Conversation, Vec<Utterance>) {
        let conv = graph.create_conversation("Test").await.unwrap();
        let mut created = Vec::new();
        let root = graph
            .add_root_utterance(&conv.id, NewUtterance::new(lines[0]))
            .await
            .unwrap()
            .unwrap();
        created.push(root);
        for line in &lines[1..] {
            let parent = created.last().unwrap().id.clone();
            let next = graph
                .add_next_utterance(&parent, NewUtterance::new(*line))
                .await
                .unwrap()
                .unwrap();
            created.push(next);
        }
        (conv, created)
    }

    #[tokio::test]
    async fn test_create_and_list_conversations() {
        let graph = setup_test_db().await;

        let a = graph.create_conversation("First").await.unwrap();
        let b = graph.create_conversation("Second").await.unwrap();

        let listed = graph.list_conversations().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str()]);

        let fetched = graph.get_conversation(&a.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "First");
        assert!(graph.get_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_root_requires_conversation() {
        let graph = setup_test_db().await;
        let result = graph
            .add_root_utterance("missing", NewUtterance::new("Hi"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_second_live_root_is_rejected() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["Hi"]).await;

        let second = graph
            .add_root_utterance(&conv.id, NewUtterance::new("Hello"))
            .await
            .unwrap();
        assert!(second.is_none());

        assert!(graph.delete_utterance(&nodes[0].id).await.unwrap());
        let replacement = graph
            .add_root_utterance(&conv.id, NewUtterance::new("Hello"))
            .await
            .unwrap()
            .expect("deleted root is replaced");

        let path = graph.get_linear_path(&conv.id).await.unwrap().unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].id, replacement.id);
    }

    #[tokio::test]
    async fn test_get_utterance_includes_deleted() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["Hi"]).await;

        graph.delete_utterance(&nodes[0].id).await.unwrap();
        let fetched = graph.get_utterance(&nodes[0].id).await.unwrap().unwrap();
        assert!(fetched.deleted);
        assert!(graph.get_utterance("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_normalizes_tags() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["Hi"]).await;

        let tags = vec!["b".to_string(), " a ".to_string(), "b".to_string()];
        let updated = graph
            .update_utterance(&nodes[0].id, "Hello", &tags, 1)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.text, "Hello");
        assert_eq!(updated.tags.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_update_deleted_is_rejected() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["Hi"]).await;

        graph.delete_utterance(&nodes[0].id).await.unwrap();
        let result = graph
            .update_utterance(&nodes[0].id, "Hello", &[], 1)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_add_branch_keeps_existing_weight() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["A", "B"]).await;

        let added = graph.add_branch(&nodes[0].id, &nodes[1].id, None).await.unwrap();
        assert_eq!(added.weight, Some(1.0));

        graph.set_branch_weight(&nodes[0].id, &nodes[1].id, 4.0).await.unwrap();
        let again = graph.add_branch(&nodes[0].id, &nodes[1].id, None).await.unwrap();
        assert_eq!(again.weight, Some(4.0));
    }

    #[tokio::test]
    async fn test_add_branch_with_weight_stores_it_in_one_call() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["A", "B", "C"]).await;

        let added = graph
            .add_branch(&nodes[0].id, &nodes[2].id, Some(0.005))
            .await
            .unwrap();
        assert_eq!(added.weight, Some(0.005));

        let view = graph.get_graph(&conv.id, 10).await.unwrap().unwrap();
        let stored = view
            .relations
            .iter()
            .find(|r| r.rel_type == RelationType::BranchTo)
            .unwrap();
        assert_eq!(stored.weight, Some(0.005));

        // An explicit weight overrides the existing one; none keeps it
        let reweighted = graph
            .add_branch(&nodes[0].id, &nodes[2].id, Some(-1.0))
            .await
            .unwrap();
        assert_eq!(reweighted.weight, Some(MIN_BRANCH_WEIGHT));
        let kept = graph.add_branch(&nodes[0].id, &nodes[2].id, None).await.unwrap();
        assert_eq!(kept.weight, Some(MIN_BRANCH_WEIGHT));
    }

    #[tokio::test]
    async fn test_add_branch_requires_live_endpoints() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["A", "B"]).await;

        let err = graph.add_branch(&nodes[0].id, "ghost", None).await.unwrap_err();
        assert!(matches!(err, Error::UtteranceNotFound(id) if id == "ghost"));

        graph.delete_utterance(&nodes[1].id).await.unwrap();
        let err = graph.add_branch(&nodes[0].id, &nodes[1].id, None).await.unwrap_err();
        assert_eq!(err.code(), "E001");
    }

    #[tokio::test]
    async fn test_set_weight_on_missing_branch() {
        let graph = setup_test_db().await;
        let (_, nodes) = chain(&graph, &["A", "B"]).await;

        // A NEXT edge is not a branch
        let err = graph
            .set_branch_weight(&nodes[0].id, &nodes[1].id, 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EdgeNotFound { .. }));
    }

    #[tokio::test]
    async fn test_linear_path_follows_earliest_next() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["A", "B"]).await;

        graph
            .add_next_utterance(&nodes[0].id, NewUtterance::new("B2"))
            .await
            .unwrap()
            .unwrap();

        let path = graph.get_linear_path(&conv.id).await.unwrap().unwrap();
        let texts: Vec<_> = path.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_linear_path_stops_at_hop_limit() {
        let graph = setup_test_db().await;
        let lines: Vec<String> = (0..40).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let (conv, _) = chain(&graph, &refs).await;

        let path = graph.get_linear_path(&conv.id).await.unwrap().unwrap();
        assert_eq!(path.len(), LINEAR_PATH_MAX_HOPS as usize + 1);
    }

    #[tokio::test]
    async fn test_linear_path_none_cases() {
        let graph = setup_test_db().await;
        assert!(graph.get_linear_path("missing").await.unwrap().is_none());

        let conv = graph.create_conversation("Empty").await.unwrap();
        assert!(graph.get_linear_path(&conv.id).await.unwrap().is_none());

        let (conv, nodes) = chain(&graph, &["A", "B"]).await;
        graph.delete_utterance(&nodes[0].id).await.unwrap();
        assert!(graph.get_linear_path(&conv.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_graph_orders_by_distance_and_drops_deleted() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["A", "B", "C"]).await;
        let side = graph
            .add_next_utterance(&nodes[0].id, NewUtterance::new("Side"))
            .await
            .unwrap()
            .unwrap();
        graph.delete_utterance(&nodes[1].id).await.unwrap();

        let view = graph.get_graph(&conv.id, 10).await.unwrap().unwrap();
        let ids: Vec<_> = view.nodes.iter().map(|n| n.id.as_str()).collect();

        // C is still reached through the deleted B
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], nodes[0].id);
        assert_eq!(ids[1], side.id);
        assert!(ids.contains(&nodes[2].id.as_str()));
        assert!(!ids.contains(&nodes[1].id.as_str()));

        // Only edges between survivors
        assert_eq!(view.relations.len(), 1);
        assert_eq!(view.relations[0].to, side.id);
    }

    #[tokio::test]
    async fn test_graph_respects_depth() {
        let graph = setup_test_db().await;
        let (conv, _) = chain(&graph, &["A", "B", "C", "D"]).await;

        let view = graph.get_graph(&conv.id, 1).await.unwrap().unwrap();
        assert_eq!(view.nodes.len(), 2);

        let view = graph.get_graph(&conv.id, 2).await.unwrap().unwrap();
        assert_eq!(view.nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_graph_without_root_is_empty() {
        let graph = setup_test_db().await;
        let conv = graph.create_conversation("Empty").await.unwrap();

        let view = graph.get_graph(&conv.id, 10).await.unwrap().unwrap();
        assert!(view.is_empty());
        assert!(graph.get_graph("missing", 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_random_path_on_chain_is_deterministic() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["A", "B", "C"]).await;

        let path = graph.get_random_path(&conv.id, 20).await.unwrap();
        let ids: Vec<_> = path.iter().map(|u| u.id.clone()).collect();
        let expected: Vec<_> = nodes.iter().map(|u| u.id.clone()).collect();
        assert_eq!(ids, expected);

        assert!(graph.get_random_path("missing", 20).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_random_path_limited_by_depth() {
        let graph = setup_test_db().await;
        let (conv, _) = chain(&graph, &["A", "B", "C", "D"]).await;

        let path = graph.get_random_path(&conv.id, 2).await.unwrap();
        assert_eq!(path.len(), 3);
    }

    #[tokio::test]
    async fn test_export_synthesizes_root_relation() {
        let graph = setup_test_db().await;
        let (conv, nodes) = chain(&graph, &["A", "B"]).await;

        let payload = graph.export(&conv.id, 10).await.unwrap().unwrap();
        assert_eq!(payload.root_id.as_deref(), Some(nodes[0].id.as_str()));
        assert_eq!(payload.utterances.len(), 2);

        let root_rel = payload.relations.iter().find(|r| r.rel_type == "ROOT").unwrap();
        assert_eq!(root_rel.from, conv.id);
        assert_eq!(root_rel.to, nodes[0].id);
    }

    #[tokio::test]
    async fn test_import_remaps_ids() {
        let graph = setup_test_db().await;
        let (conv, _) = chain(&graph, &["A", "B"]).await;
        let payload = graph.export(&conv.id, 10).await.unwrap().unwrap();

        let imported = graph.import(&payload, false).await.unwrap();
        assert_ne!(imported.id, conv.id);

        let path = graph.get_linear_path(&imported.id).await.unwrap().unwrap();
        let texts: Vec<_> = path.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B"]);
        assert_eq!(graph.list_conversations().await.unwrap().len(), 2);
    }
}
