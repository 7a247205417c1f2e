//! Error types for Lorekeep

use thiserror::Error;

/// Result type alias using Lorekeep's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lorekeep error types with helpful messages and suggestions
///
/// Benign races (missing source utterance, stale version, already deleted) are not
/// errors: the engine reports them as `None`/`false`/empty. The variants below cover
/// malformed requests and infrastructure failures.
#[derive(Error, Debug)]
pub enum Error {
    // Graph errors (E001-E099)
    #[error("Utterance '{0}' not found or deleted.")]
    UtteranceNotFound(String),

    #[error("Branch '{from}' -> '{to}' not found. Create it with `lorekeep branches add {from} {to}`.")]
    EdgeNotFound { from: String, to: String },

    #[error("Conversation '{0}' not found. Run `lorekeep conversations list` to see all conversations.")]
    ConversationNotFound(String),

    // Import errors (E100-E199)
    #[error("Unknown relation type '{0}'. Expected one of ROOT, NEXT, BRANCH_TO.")]
    InvalidRelationType(String),

    #[error("Invalid import payload: {0}")]
    InvalidImport(String),

    // Generation errors (E200-E299)
    #[error("Network error: {0}. Check your connection to the generation service.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Generation service error: {0}")]
    GenerationFailed(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Operation cancelled")]
    Cancelled,

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::UtteranceNotFound(_) => "E001",
            Self::EdgeNotFound { .. } => "E002",
            Self::ConversationNotFound(_) => "E003",
            Self::InvalidRelationType(_) => "E100",
            Self::InvalidImport(_) => "E101",
            Self::NetworkError(_) => "E200",
            Self::GenerationFailed(_) => "E201",
            Self::RateLimited(_) => "E202",
            Self::Cancelled => "E203",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Serialization(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::EdgeNotFound { from, to } => {
                Some(format!("lorekeep branches add {} {}", from, to))
            }
            Self::ConversationNotFound(_) => Some("lorekeep conversations list".to_string()),
            Self::NetworkError(_) => Some("lorekeep config get generation.base_url".to_string()),
            Self::GenerationFailed(_) => {
                Some("Check LOREKEEP_GENERATION_API_KEY and the generation service logs".to_string())
            }
            Self::DatabaseError(_) => Some("lorekeep doctor".to_string()),
            _ => None,
        }
    }

    /// Whether this error should abort a best-effort workflow instead of degrading
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
