//! Wire types for the utterance generation service

use serde::{Deserialize, Serialize};

use crate::domain::dialogue::NewUtterance;

/// Body of `POST {base_url}/generate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    /// Free-form prompt context (scene, characters, previous lines)
    pub context: String,
    pub count: usize,
}

/// Response of the generation service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub utterances: Vec<GeneratedUtterance>,
}

/// One generated line of dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedUtterance {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GeneratedUtterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            character_id: None,
            tags: Vec::new(),
        }
    }

    /// Convert into the input of `add_next_utterance`
    pub fn into_new_utterance(self) -> NewUtterance {
        let mut new = NewUtterance::new(self.text).with_tags(self.tags);
        new.character_id = self.character_id;
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_with_optional_fields() {
        let json = r#"{"utterances": [
            {"text": "Who goes there?", "character_id": "guard", "tags": ["challenge"]},
            {"text": "A friend."}
        ]}"#;

        let response: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.utterances.len(), 2);
        assert_eq!(response.utterances[0].character_id.as_deref(), Some("guard"));
        assert!(response.utterances[1].tags.is_empty());
    }

    #[test]
    fn test_missing_utterances_is_empty() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(response.utterances.is_empty());
    }

    #[test]
    fn test_into_new_utterance() {
        let generated = GeneratedUtterance {
            text: "Halt!".to_string(),
            character_id: Some("guard".to_string()),
            tags: vec!["generated".to_string(), " ".to_string()],
        };

        let new = generated.into_new_utterance();
        assert_eq!(new.text, "Halt!");
        assert_eq!(new.character_id.as_deref(), Some("guard"));
        assert_eq!(new.tags.len(), 1);
    }
}
