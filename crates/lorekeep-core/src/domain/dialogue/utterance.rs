//! Conversation and utterance nodes

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A conversation: the anchor of one dialogue tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// A single line of dialogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    /// Monotonic counter bumped by every successful update
    pub version: i64,
    /// Soft-delete marker; deleted utterances stay addressable by id
    pub deleted: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Utterance {
    /// Materialize a new, live utterance with a fresh id at version 1
    pub fn create(new: NewUtterance) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            text: new.text,
            character_id: new.character_id,
            version: 1,
            deleted: false,
            tags: new.tags,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Input for creating an utterance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUtterance {
    pub text: String,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl NewUtterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_character(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = Some(character_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = normalize_tags(tags);
        self
    }
}

/// Trim, drop empties and deduplicate tags
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_utterance() {
        let u = Utterance::create(
            NewUtterance::new("Hello there")
                .with_character("obi-wan")
                .with_tags(["greeting"]),
        );

        assert_eq!(u.version, 1);
        assert!(u.is_live());
        assert_eq!(u.character_id.as_deref(), Some("obi-wan"));
        assert!(u.tags.contains("greeting"));
        assert!(Uuid::parse_str(&u.id).is_ok());
    }

    #[test]
    fn test_normalize_tags() {
        let tags = normalize_tags([" b ", "a", "", "b", "  "]);
        let tags: Vec<_> = tags.into_iter().collect();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_new_conversation_ids_are_unique() {
        let a = Conversation::new("Intro");
        let b = Conversation::new("Intro");
        assert_ne!(a.id, b.id);
        assert_eq!(a.title, "Intro");
    }
}
