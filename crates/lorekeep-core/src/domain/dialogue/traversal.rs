//! Bounded traversals over the dialogue graph
//!
//! Traversals are rendered as recursive CTEs with every variable part bound as a
//! parameter. The reachable set is computed through deleted utterances; deleted
//! nodes are only dropped from the final selection.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

use super::relation::{Relation, RelationType};
use super::utterance::Utterance;

/// Hop limit of the linear `NEXT` chain
pub const LINEAR_PATH_MAX_HOPS: u32 = 25;

pub const GRAPH_DEPTH_DEFAULT: u32 = 10;
pub const GRAPH_DEPTH_MAX: u32 = 25;

pub const WALK_DEPTH_DEFAULT: u32 = 20;
pub const WALK_DEPTH_MAX: u32 = 50;

/// Clamp a subgraph depth request; out-of-range values fall back to the default
pub fn clamp_graph_depth(depth: i64) -> u32 {
    clamp_or_default(depth, GRAPH_DEPTH_MAX, GRAPH_DEPTH_DEFAULT)
}

/// Clamp a random-walk depth request; out-of-range values fall back to the default
pub fn clamp_walk_depth(depth: i64) -> u32 {
    clamp_or_default(depth, WALK_DEPTH_MAX, WALK_DEPTH_DEFAULT)
}

fn clamp_or_default(value: i64, max: u32, default: u32) -> u32 {
    if (1..=i64::from(max)).contains(&value) {
        value as u32
    } else {
        default
    }
}

/// Nodes and relations of a conversation subgraph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<Utterance>,
    pub relations: Vec<Relation>,
}

impl GraphView {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, utterance_id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == utterance_id)
    }

    pub fn node(&self, utterance_id: &str) -> Option<&Utterance> {
        self.nodes.iter().find(|n| n.id == utterance_id)
    }

    /// Entry point of the subgraph
    ///
    /// The first node in list order that is not the target of a `NEXT` relation,
    /// falling back to the first node.
    pub fn detect_start(&self) -> Option<&Utterance> {
        let next_targets: HashSet<&str> = self
            .relations
            .iter()
            .filter(|r| r.rel_type == RelationType::Next)
            .map(|r| r.to.as_str())
            .collect();

        self.nodes
            .iter()
            .find(|n| !next_targets.contains(n.id.as_str()))
            .or_else(|| self.nodes.first())
    }

    /// Reorder nodes by hop distance from `start`
    ///
    /// Nodes unreachable from `start` over the kept relations go last, in their
    /// original order.
    pub fn order_by_distance(&mut self, start: &str) {
        let distances = hop_distances(start, &self.relations);
        let mut indexed: Vec<(usize, Utterance)> = self.nodes.drain(..).enumerate().collect();
        indexed.sort_by_key(|(i, n)| (distances.get(n.id.as_str()).copied().unwrap_or(u32::MAX), *i));
        self.nodes = indexed.into_iter().map(|(_, n)| n).collect();
    }
}

/// Breadth-first hop distances over the given relations
pub fn hop_distances<'a>(start: &'a str, relations: &'a [Relation]) -> HashMap<&'a str, u32> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for r in relations {
        adjacency.entry(r.from.as_str()).or_default().push(r.to.as_str());
    }

    let mut distances = HashMap::from([(start, 0)]);
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        let depth = distances[current];
        for &next in adjacency.get(current).into_iter().flatten() {
            if !distances.contains_key(next) {
                distances.insert(next, depth + 1);
                queue.push_back(next);
            }
        }
    }
    distances
}

/// Reachability query from a start utterance
///
/// Renders a `reach` CTE (all ids reachable over the chosen relation types) and a
/// `kept` CTE (the reachable ids whose utterance is not deleted).
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalQuery {
    start_id: String,
    max_depth: Option<u32>,
    relation_types: Vec<RelationType>,
}

impl TraversalQuery {
    /// Traverse `NEXT` and `BRANCH_TO` relations from `start_id` without a depth bound
    pub fn starting_at(start_id: impl Into<String>) -> Self {
        Self {
            start_id: start_id.into(),
            max_depth: None,
            relation_types: RelationType::continuations().to_vec(),
        }
    }

    /// Stop expanding after `depth` hops
    pub fn within(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Restrict the relation types followed
    pub fn via(mut self, types: &[RelationType]) -> Self {
        if !types.is_empty() {
            self.relation_types = types.to_vec();
        }
        self
    }

    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    /// Select the kept utterances (all `utterances` columns)
    pub fn nodes_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = self.with_reachable();
        qb.push(
            " SELECT u.id, u.text, u.character_id, u.version, u.deleted, u.tags, \
             u.created_at, u.updated_at \
             FROM utterances u JOIN kept ON kept.id = u.id \
             ORDER BY u.created_at, u.rowid",
        );
        qb
    }

    /// Select the relations among kept utterances, in creation order
    pub fn relations_query(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = self.with_reachable();
        qb.push(" SELECT r.from_id, r.to_id, r.rel_type, r.weight FROM relations r WHERE r.rel_type IN (");
        self.push_types(&mut qb);
        qb.push(
            ") AND r.from_id IN (SELECT id FROM kept) \
             AND r.to_id IN (SELECT id FROM kept) \
             ORDER BY r.rowid",
        );
        qb
    }

    fn with_reachable(&self) -> QueryBuilder<'static, Sqlite> {
        let mut qb = QueryBuilder::new("WITH RECURSIVE ");
        match self.max_depth {
            Some(depth) => {
                qb.push("reach(id, depth) AS (SELECT ");
                qb.push_bind(self.start_id.clone());
                qb.push(
                    ", 0 UNION SELECT r.to_id, reach.depth + 1 \
                     FROM relations r JOIN reach ON r.from_id = reach.id \
                     WHERE reach.depth < ",
                );
                qb.push_bind(i64::from(depth));
            }
            None => {
                qb.push("reach(id) AS (SELECT ");
                qb.push_bind(self.start_id.clone());
                qb.push(
                    " UNION SELECT r.to_id \
                     FROM relations r JOIN reach ON r.from_id = reach.id \
                     WHERE 1 = 1",
                );
            }
        }
        qb.push(" AND r.rel_type IN (");
        self.push_types(&mut qb);
        qb.push(
            ")), kept(id) AS (SELECT DISTINCT u.id FROM utterances u \
             JOIN reach ON reach.id = u.id WHERE u.deleted = 0)",
        );
        qb
    }

    fn push_types(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        let mut types = qb.separated(", ");
        for rel_type in &self.relation_types {
            types.push_bind(rel_type.as_str());
        }
    }
}

/// The `NEXT` chain from a root, following the earliest-created `NEXT` edge per hop
///
/// Yields up to `max_hops + 1` utterance rows in hop order, deleted ones included.
/// A cycle repeats ids; callers stop at the first revisit.
pub fn linear_chain_query(root_id: &str, max_hops: u32) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(
        "WITH RECURSIVE first_next(from_id, to_id) AS (\
         SELECT r.from_id, r.to_id FROM relations r \
         WHERE r.rel_type = ",
    );
    qb.push_bind(RelationType::Next.as_str());
    qb.push(
        " AND r.rowid = (SELECT MIN(r2.rowid) FROM relations r2 \
         WHERE r2.from_id = r.from_id AND r2.rel_type = r.rel_type)), \
         chain(id, hop) AS (SELECT ",
    );
    qb.push_bind(root_id.to_string());
    qb.push(
        ", 0 UNION ALL SELECT f.to_id, chain.hop + 1 \
         FROM chain JOIN first_next f ON f.from_id = chain.id WHERE chain.hop < ",
    );
    qb.push_bind(i64::from(max_hops));
    qb.push(
        ") SELECT u.id, u.text, u.character_id, u.version, u.deleted, u.tags, \
         u.created_at, u.updated_at \
         FROM chain JOIN utterances u ON u.id = chain.id ORDER BY chain.hop",
    );
    qb
}
