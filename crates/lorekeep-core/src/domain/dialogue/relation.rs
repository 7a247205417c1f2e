//! Relationship (edge) types of the dialogue graph

use serde::{Deserialize, Serialize};

/// Weight given to a newly created branch
pub const DEFAULT_BRANCH_WEIGHT: f64 = 1.0;

/// Weight stored in place of a non-positive or non-finite branch weight
pub const MIN_BRANCH_WEIGHT: f64 = 0.01;

/// Implicit weight of a `NEXT` continuation during sampling
pub const NEXT_WEIGHT: f64 = 1.0;

/// Clamp a requested branch weight to the positive floor
///
/// Positive finite weights are kept as given, including ones below the floor.
/// Non-positive and non-finite inputs (NaN, ±∞) fall back to the floor.
pub fn clamp_branch_weight(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        MIN_BRANCH_WEIGHT
    }
}

/// Types of relationships in a dialogue graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    /// Conversation -> its entry utterance
    Root,
    /// Default linear continuation
    Next,
    /// Weighted alternative continuation
    BranchTo,
}

impl RelationType {
    /// Get the string representation used in storage and payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::Next => "NEXT",
            Self::BranchTo => "BRANCH_TO",
        }
    }

    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ROOT" => Some(Self::Root),
            "NEXT" => Some(Self::Next),
            "BRANCH_TO" | "BRANCHTO" => Some(Self::BranchTo),
            _ => None,
        }
    }

    /// Relation types followed when walking between utterances
    pub fn continuations() -> &'static [RelationType] {
        &[Self::Next, Self::BranchTo]
    }

    /// Whether edges of this type carry a weight
    pub fn is_weighted(&self) -> bool {
        matches!(self, Self::BranchTo)
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge of the dialogue graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub rel_type: RelationType,
    /// Present only on `BRANCH_TO`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl Relation {
    pub fn new(from: impl Into<String>, to: impl Into<String>, rel_type: RelationType) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rel_type,
            weight: rel_type.is_weighted().then_some(DEFAULT_BRANCH_WEIGHT),
        }
    }

    /// A `BRANCH_TO` edge with a clamped weight
    pub fn branch(from: impl Into<String>, to: impl Into<String>, weight: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            rel_type: RelationType::BranchTo,
            weight: Some(clamp_branch_weight(weight)),
        }
    }

    /// Weight used by the random-walk sampler
    pub fn sampling_weight(&self) -> f64 {
        match self.rel_type {
            RelationType::BranchTo => {
                clamp_branch_weight(self.weight.unwrap_or(DEFAULT_BRANCH_WEIGHT))
            }
            RelationType::Next | RelationType::Root => NEXT_WEIGHT,
        }
    }
}
