//! Conversation fixture builders.
//!
//! `BranchedConversation` assembles the node-map shape (structural root,
//! parent/children pointers, epoch-float timestamps); `LinearConversation`
//! assembles the ordered-array shape (ISO timestamps, `human`/`assistant`
//! senders). Both return plain `serde_json::Value` payloads ready for an
//! extractor.

use serde_json::{Map, Value, json};

/// Builder for branched (node map) conversation exports
pub struct BranchedConversation {
    conversation_id: String,
    title: Option<String>,
    create_time: Option<f64>,
    update_time: Option<f64>,
    nodes: Vec<(String, Option<String>, Option<Value>)>,
}

impl BranchedConversation {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            title: None,
            create_time: None,
            update_time: None,
            nodes: Vec::new(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn create_time(mut self, epoch: f64) -> Self {
        self.create_time = Some(epoch);
        self
    }

    pub fn update_time(mut self, epoch: f64) -> Self {
        self.update_time = Some(epoch);
        self
    }

    /// Add a structural node with no message (the usual hidden root)
    pub fn structural_root(mut self, node_id: &str) -> Self {
        self.nodes.push((node_id.to_string(), None, None));
        self
    }

    /// Add a plain text message node
    pub fn message(
        self,
        node_id: &str,
        parent: Option<&str>,
        role: &str,
        text: &str,
        epoch: f64,
    ) -> Self {
        let message = json!({
            "id": node_id,
            "author": {"role": role},
            "create_time": epoch,
            "content": {"content_type": "text", "parts": [text]},
            "metadata": {},
        });
        self.message_value(node_id, parent, message)
    }

    /// Add a message node with explicit parts and metadata
    pub fn message_with(
        self,
        node_id: &str,
        parent: Option<&str>,
        role: &str,
        parts: Vec<Value>,
        epoch: f64,
        metadata: Value,
    ) -> Self {
        let message = json!({
            "id": node_id,
            "author": {"role": role},
            "create_time": epoch,
            "content": {"content_type": "multimodal_text", "parts": parts},
            "metadata": metadata,
        });
        self.message_value(node_id, parent, message)
    }

    /// Add a node from a fully custom message value
    pub fn message_value(mut self, node_id: &str, parent: Option<&str>, message: Value) -> Self {
        self.nodes.push((
            node_id.to_string(),
            parent.map(str::to_string),
            Some(message),
        ));
        self
    }

    pub fn build(self) -> Value {
        let mut mapping = Map::new();
        for (node_id, parent, message) in &self.nodes {
            let children: Vec<&String> = self
                .nodes
                .iter()
                .filter(|(_, p, _)| p.as_deref() == Some(node_id.as_str()))
                .map(|(id, _, _)| id)
                .collect();

            mapping.insert(
                node_id.clone(),
                json!({
                    "id": node_id,
                    "parent": parent,
                    "children": children,
                    "message": message,
                }),
            );
        }

        json!({
            "conversation_id": self.conversation_id,
            "title": self.title,
            "create_time": self.create_time,
            "update_time": self.update_time,
            "mapping": Value::Object(mapping),
        })
    }
}

/// Builder for linear (ordered array) conversation exports
pub struct LinearConversation {
    uuid: String,
    name: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    messages: Vec<Value>,
}

impl LinearConversation {
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            name: None,
            created_at: None,
            updated_at: None,
            messages: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn created_at(mut self, iso: &str) -> Self {
        self.created_at = Some(iso.to_string());
        self
    }

    pub fn updated_at(mut self, iso: &str) -> Self {
        self.updated_at = Some(iso.to_string());
        self
    }

    /// Add a plain text message (`human` / `assistant` senders)
    pub fn message(mut self, uuid: &str, sender: &str, text: &str, iso: &str) -> Self {
        self.messages.push(json!({
            "uuid": uuid,
            "sender": sender,
            "created_at": iso,
            "text": text,
            "attachments": [],
            "files": [],
        }));
        self
    }

    /// Add a message with typed content parts
    pub fn message_with_content(
        mut self,
        uuid: &str,
        sender: &str,
        content: Vec<Value>,
        iso: &str,
    ) -> Self {
        self.messages.push(json!({
            "uuid": uuid,
            "sender": sender,
            "created_at": iso,
            "content": content,
            "attachments": [],
            "files": [],
        }));
        self
    }

    /// Add a fully custom message value
    pub fn message_value(mut self, message: Value) -> Self {
        self.messages.push(message);
        self
    }

    pub fn build(self) -> Value {
        json!({
            "uuid": self.uuid,
            "name": self.name,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "chat_messages": self.messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branched_children_are_derived() {
        let conversation = BranchedConversation::new("conv-1")
            .structural_root("root")
            .message("q", Some("root"), "user", "Q", 1.0)
            .message("a1", Some("q"), "assistant", "A1", 2.0)
            .message("a2", Some("q"), "assistant", "A2", 3.0)
            .build();

        let children = &conversation["mapping"]["q"]["children"];
        assert_eq!(children, &json!(["a1", "a2"]));
        assert!(conversation["mapping"]["root"]["message"].is_null());
    }

    #[test]
    fn test_linear_preserves_order() {
        let conversation = LinearConversation::new("u-1")
            .message("m1", "human", "Hello", "2024-01-01T00:00:00Z")
            .message("m2", "assistant", "Hi", "2024-01-01T00:01:00Z")
            .build();

        let messages = conversation["chat_messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["sender"], "human");
    }
}
