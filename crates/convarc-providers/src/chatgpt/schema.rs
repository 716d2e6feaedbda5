use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Top-level branched export: a node map keyed by node id. The raw node
/// values are kept alongside the typed views so `source_json` preserves
/// unknown fields verbatim.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Conversation {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub create_time: Value,
    #[serde(default)]
    pub update_time: Value,
    #[serde(default)]
    pub mapping: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Node {
    #[serde(default)]
    pub parent: Option<String>,
    /// Some nodes carry no message (structural root placeholders)
    #[serde(default)]
    pub message: Option<NodeMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NodeMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub create_time: Value,
    #[serde(default)]
    pub update_time: Value,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub end_turn: Option<bool>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Author {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct MessageContent {
    #[serde(default)]
    pub parts: Vec<Value>,
}
