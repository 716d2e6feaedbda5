mod error;
mod util;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use util::*;

/// Normalized message role, shared across all providers.
///
/// Provider vocabularies are rewritten at the ingress boundary
/// (`Role::normalize`); downstream passes only ever see this set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Unknown,
    /// Role string the registry does not know (kept lowercased)
    #[serde(untagged)]
    Other(String),
}

impl Role {
    /// Normalize a raw provider role to the unified vocabulary.
    ///
    /// Lowercases the input and rewrites the `human` alias to `user`.
    /// A missing role becomes `Unknown`.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Role::Unknown;
        };

        match raw.to_lowercase().as_str() {
            "user" | "human" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            "unknown" => Role::Unknown,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Unknown => "unknown",
            Role::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        Role::normalize(Some(s))
    }
}

/// Type of a content fragment within a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    Text,
    Code,
    Image,
    Audio,
    Video,
    ToolUse,
    ToolResult,
    Thinking,
    Unknown,
    /// Provider content_type passed through unclassified
    #[serde(untagged)]
    Other(String),
}

impl PartType {
    pub fn as_str(&self) -> &str {
        match self {
            PartType::Text => "text",
            PartType::Code => "code",
            PartType::Image => "image",
            PartType::Audio => "audio",
            PartType::Video => "video",
            PartType::ToolUse => "tool_use",
            PartType::ToolResult => "tool_result",
            PartType::Thinking => "thinking",
            PartType::Unknown => "unknown",
            PartType::Other(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "text" => PartType::Text,
            "code" => PartType::Code,
            "image" => PartType::Image,
            "audio" => PartType::Audio,
            "video" => PartType::Video,
            "tool_use" => PartType::ToolUse,
            "tool_result" => PartType::ToolResult,
            "thinking" => PartType::Thinking,
            "unknown" => PartType::Unknown,
            other => PartType::Other(other.to_string()),
        }
    }
}

/// Kind of entity an annotation or content hash attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Message,
    Exchange,
    Dialogue,
    ContentPart,
    PromptResponse,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::Message,
        EntityType::Exchange,
        EntityType::Dialogue,
        EntityType::ContentPart,
        EntityType::PromptResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Message => "message",
            EntityType::Exchange => "exchange",
            EntityType::Dialogue => "dialogue",
            EntityType::ContentPart => "content_part",
            EntityType::PromptResponse => "prompt_response",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(EntityType::Message),
            "exchange" => Some(EntityType::Exchange),
            "dialogue" => Some(EntityType::Dialogue),
            "content_part" => Some(EntityType::ContentPart),
            "prompt_response" => Some(EntityType::PromptResponse),
            _ => None,
        }
    }
}

/// Storage shape of an annotation value; selects the backing table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Flag,
    String,
    Numeric,
    Json,
}

impl ValueType {
    pub const ALL: [ValueType; 4] = [
        ValueType::Flag,
        ValueType::String,
        ValueType::Numeric,
        ValueType::Json,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Flag => "flag",
            ValueType::String => "string",
            ValueType::Numeric => "numeric",
            ValueType::Json => "json",
        }
    }
}

/// Scope of a content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashScope {
    Full,
    User,
    Assistant,
}

impl HashScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashScope::Full => "full",
            HashScope::User => "user",
            HashScope::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(HashScope::Full),
            "user" => Some(HashScope::User),
            "assistant" => Some(HashScope::Assistant),
            _ => None,
        }
    }
}

/// Text canonicalization regime used when hashing for dedup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    None,
    Whitespace,
    Normalized,
}

impl Normalization {
    pub const ALL: [Normalization; 3] = [
        Normalization::None,
        Normalization::Whitespace,
        Normalization::Normalized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::None => "none",
            Normalization::Whitespace => "whitespace",
            Normalization::Normalized => "normalized",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Normalization::None),
            "whitespace" => Some(Normalization::Whitespace),
            "normalized" => Some(Normalization::Normalized),
            _ => None,
        }
    }
}

/// Why a non-primary linear sequence diverged from the primary path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchReason {
    /// All children of the branch point share a role (retry of the same turn)
    Regeneration,
    /// Children of the branch point have mixed roles (user edited a prompt)
    Edit,
}

impl BranchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchReason::Regeneration => "regeneration",
            BranchReason::Edit => "edit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "regeneration" => Some(BranchReason::Regeneration),
            "edit" => Some(BranchReason::Edit),
            _ => None,
        }
    }
}

/// Result of extracting one dialogue from a source archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractOutcome {
    New,
    Updated,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_normalize_human_alias() {
        assert_eq!(Role::normalize(Some("human")), Role::User);
        assert_eq!(Role::normalize(Some("Human")), Role::User);
    }

    #[test]
    fn test_role_normalize_lowercases() {
        assert_eq!(Role::normalize(Some("ASSISTANT")), Role::Assistant);
        assert_eq!(
            Role::normalize(Some("Browser")),
            Role::Other("browser".to_string())
        );
    }

    #[test]
    fn test_role_normalize_missing() {
        assert_eq!(Role::normalize(None), Role::Unknown);
    }

    #[test]
    fn test_role_round_trip() {
        for raw in ["user", "assistant", "system", "tool", "unknown", "critic"] {
            let role = Role::from_str(raw);
            assert_eq!(role.as_str(), raw);
        }
    }

    #[test]
    fn test_part_type_round_trip() {
        for raw in ["text", "tool_use", "thinking", "tether_browsing_display"] {
            assert_eq!(PartType::from_str(raw).as_str(), raw);
        }
    }
}
