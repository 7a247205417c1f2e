//! Import/export payloads
//!
//! A payload is a self-contained description of one conversation: the
//! conversation record, its utterances, and the relations among them. Relation
//! types stay plain strings here so unknown types surface as a typed error
//! instead of a deserialization failure.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::relation::{DEFAULT_BRANCH_WEIGHT, Relation, RelationType, clamp_branch_weight};
use super::utterance::{Utterance, normalize_tags};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPayload {
    pub conversation: ConversationRecord,
    /// Entry utterance; may also be given as a `ROOT` relation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(default)]
    pub utterances: Vec<UtteranceRecord>,
    #[serde(default)]
    pub relations: Vec<RelationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtteranceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl From<&Utterance> for UtteranceRecord {
    fn from(u: &Utterance) -> Self {
        Self {
            id: Some(u.id.clone()),
            text: u.text.clone(),
            character_id: u.character_id.clone(),
            tags: u.tags.iter().cloned().collect(),
            deleted: u.deleted,
            version: Some(u.version),
        }
    }
}

impl From<&Relation> for RelationRecord {
    fn from(r: &Relation) -> Self {
        Self {
            from: r.from.clone(),
            to: r.to.clone(),
            rel_type: r.rel_type.as_str().to_string(),
            weight: r.weight,
        }
    }
}

/// A validated payload, ready to be written in one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ImportPlan {
    pub conversation_id: String,
    pub title: String,
    pub root_id: Option<String>,
    pub utterances: Vec<Utterance>,
    /// `NEXT` and `BRANCH_TO` relations (`ROOT` is carried by `root_id`)
    pub relations: Vec<Relation>,
}

impl ImportPlan {
    /// Validate a payload and resolve ids
    ///
    /// With `preserve_ids` the payload ids are kept (missing ones are minted).
    /// Otherwise every node gets a fresh id and relation endpoints are remapped.
    /// Fails without side effects on unknown relation types, dangling endpoints,
    /// duplicate ids or conflicting roots.
    pub fn build(payload: &ConversationPayload, preserve_ids: bool) -> Result<Self> {
        let conversation_id = match (&payload.conversation.id, preserve_ids) {
            (Some(id), true) if !id.trim().is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let mut id_map: HashMap<&str, String> = HashMap::new();
        let mut utterances = Vec::with_capacity(payload.utterances.len());

        for record in &payload.utterances {
            let id = match (&record.id, preserve_ids) {
                (Some(id), true) if !id.trim().is_empty() => id.clone(),
                _ => Uuid::new_v4().to_string(),
            };
            if let Some(key) = record.id.as_deref()
                && id_map.insert(key, id.clone()).is_some()
            {
                return Err(Error::InvalidImport(format!("duplicate utterance id '{}'", key)));
            }
            utterances.push(record.to_utterance(id, now));
        }

        let mut root_id = match payload.root_id.as_deref() {
            Some(key) => Some(resolve(&id_map, key)?),
            None => None,
        };
        let mut relations = Vec::new();

        for record in &payload.relations {
            let rel_type = RelationType::parse(&record.rel_type)
                .ok_or_else(|| Error::InvalidRelationType(record.rel_type.clone()))?;

            match rel_type {
                RelationType::Root => {
                    if let Some(conv) = payload.conversation.id.as_deref()
                        && conv != record.from
                    {
                        return Err(Error::InvalidImport(format!(
                            "ROOT relation starts at '{}', expected conversation '{}'",
                            record.from, conv
                        )));
                    }
                    let target = resolve(&id_map, &record.to)?;
                    match &root_id {
                        Some(existing) if *existing != target => {
                            return Err(Error::InvalidImport(
                                "payload declares more than one root".to_string(),
                            ));
                        }
                        _ => root_id = Some(target),
                    }
                }
                RelationType::Next | RelationType::BranchTo => {
                    let from = resolve(&id_map, &record.from)?;
                    let to = resolve(&id_map, &record.to)?;
                    let weight = rel_type
                        .is_weighted()
                        .then(|| clamp_branch_weight(record.weight.unwrap_or(DEFAULT_BRANCH_WEIGHT)));
                    relations.push(Relation {
                        from,
                        to,
                        rel_type,
                        weight,
                    });
                }
            }
        }

        Ok(Self {
            conversation_id,
            title: payload.conversation.title.clone(),
            root_id,
            utterances,
            relations,
        })
    }
}

impl UtteranceRecord {
    fn to_utterance(&self, id: String, now: DateTime<Utc>) -> Utterance {
        Utterance {
            id,
            text: self.text.clone(),
            character_id: self.character_id.clone(),
            version: self.version.unwrap_or(1).max(1),
            deleted: self.deleted,
            tags: normalize_tags(&self.tags),
            created_at: now,
            updated_at: now,
        }
    }
}

fn resolve(id_map: &HashMap<&str, String>, key: &str) -> Result<String> {
    id_map
        .get(key)
        .cloned()
        .ok_or_else(|| Error::InvalidImport(format!("relation endpoint '{}' is not in the payload", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ConversationPayload {
        serde_json::from_value(serde_json::json!({
            "conversation": {"id": "conv-1", "title": "Tavern"},
            "utterances": [
                {"id": "u1", "text": "Welcome, traveler.", "character_id": "barkeep"},
                {"id": "u2", "text": "An ale, please.", "tags": ["order"]},
                {"id": "u3", "text": "Got any work?", "version": 4}
            ],
            "relations": [
                {"from": "conv-1", "to": "u1", "type": "ROOT"},
                {"from": "u1", "to": "u2", "type": "NEXT"},
                {"from": "u1", "to": "u3", "type": "BRANCH_TO", "weight": -2.0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_plan_preserves_ids() {
        let plan = ImportPlan::build(&payload(), true).unwrap();

        assert_eq!(plan.conversation_id, "conv-1");
        assert_eq!(plan.root_id.as_deref(), Some("u1"));
        assert_eq!(plan.utterances.len(), 3);
        assert_eq!(plan.utterances[2].version, 4);
        assert_eq!(plan.relations.len(), 2);
        assert_eq!(plan.relations[1].weight, Some(0.01));
        assert_eq!(plan.relations[0].weight, None);
    }

    #[test]
    fn test_plan_remaps_ids() {
        let plan = ImportPlan::build(&payload(), false).unwrap();

        assert_ne!(plan.conversation_id, "conv-1");
        let ids: Vec<_> = plan.utterances.iter().map(|u| u.id.as_str()).collect();
        assert!(!ids.contains(&"u1"));

        let root = plan.root_id.as_deref().unwrap();
        assert_eq!(root, ids[0]);
        assert_eq!(plan.relations[0].from, ids[0]);
        assert_eq!(plan.relations[0].to, ids[1]);
    }

    #[test]
    fn test_unknown_relation_type() {
        let mut p = payload();
        p.relations.push(RelationRecord {
            from: "u2".into(),
            to: "u3".into(),
            rel_type: "FOLLOWS".into(),
            weight: None,
        });

        let err = ImportPlan::build(&p, true).unwrap_err();
        assert!(matches!(err, Error::InvalidRelationType(t) if t == "FOLLOWS"));
    }

    #[test]
    fn test_dangling_endpoint() {
        let mut p = payload();
        p.relations.push(RelationRecord {
            from: "u2".into(),
            to: "ghost".into(),
            rel_type: "NEXT".into(),
            weight: None,
        });

        assert!(matches!(ImportPlan::build(&p, true), Err(Error::InvalidImport(_))));
    }

    #[test]
    fn test_conflicting_roots() {
        let mut p = payload();
        p.root_id = Some("u2".into());
        assert!(matches!(ImportPlan::build(&p, true), Err(Error::InvalidImport(_))));

        // The same root declared twice is fine
        p.root_id = Some("u1".into());
        assert!(ImportPlan::build(&p, true).is_ok());
    }

    #[test]
    fn test_duplicate_utterance_ids() {
        let mut p = payload();
        p.utterances.push(UtteranceRecord {
            id: Some("u1".into()),
            text: "again".into(),
            character_id: None,
            tags: vec![],
            deleted: false,
            version: None,
        });
        assert!(matches!(ImportPlan::build(&p, true), Err(Error::InvalidImport(_))));
    }

    #[test]
    fn test_payload_json_uses_type_key() {
        let json = serde_json::to_value(RelationRecord::from(&Relation::branch("a", "b", 2.0))).unwrap();
        assert_eq!(json["type"], "BRANCH_TO");
        assert_eq!(json["weight"], 2.0);
    }
}
