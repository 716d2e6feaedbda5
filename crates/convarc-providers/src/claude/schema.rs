use serde::Deserialize;
use serde_json::Value;

/// Top-level linear export: an ordered list of chat messages. Raw message
/// values are retained so `source_json` preserves unknown fields.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Conversation {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Value,
    #[serde(default)]
    pub updated_at: Value,
    #[serde(default)]
    pub chat_messages: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChatMessage {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub created_at: Value,
    #[serde(default)]
    pub updated_at: Value,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default)]
    pub files: Vec<Value>,
}
