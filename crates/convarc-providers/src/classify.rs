use serde_json::{Value, json};

use convarc_types::PartType;

/// A platform content fragment mapped to a typed part.
///
/// Which fields are populated depends on the variant; the original fragment
/// is always preserved in `source_json`.
#[derive(Debug, Clone)]
pub struct ClassifiedPart {
    pub part_type: PartType,
    pub text_content: Option<String>,
    pub language: Option<String>,
    pub media_type: Option<String>,
    pub url: Option<String>,
    pub tool_name: Option<String>,
    pub tool_use_id: Option<String>,
    pub tool_input: Option<Value>,
    pub is_error: Option<bool>,
    pub source_json: Value,
}

impl Default for ClassifiedPart {
    fn default() -> Self {
        Self {
            part_type: PartType::Unknown,
            text_content: None,
            language: None,
            media_type: None,
            url: None,
            tool_name: None,
            tool_use_id: None,
            tool_input: None,
            is_error: None,
            source_json: Value::Null,
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Classify one platform fragment. Rules apply in order; first match wins.
/// A fragment that matches nothing keeps its `content_type` string as the
/// part type (or `unknown` without one); non-object, non-string input is
/// wrapped and marked `unknown`.
pub fn classify_part(part: &Value) -> ClassifiedPart {
    if let Value::String(text) = part {
        return ClassifiedPart {
            part_type: PartType::Text,
            text_content: Some(text.clone()),
            source_json: json!({"text": text}),
            ..Default::default()
        };
    }

    let Value::Object(_) = part else {
        return ClassifiedPart {
            part_type: PartType::Unknown,
            source_json: json!({"raw": part.to_string()}),
            ..Default::default()
        };
    };

    let source_json = part.clone();
    let content_type = str_field(part, "content_type");
    let type_field = str_field(part, "type");

    if let Some(ct) = &content_type {
        let media = |part_type: PartType| ClassifiedPart {
            part_type,
            media_type: content_type.clone(),
            url: str_field(part, "url").or_else(|| str_field(part, "asset_pointer")),
            source_json: source_json.clone(),
            ..Default::default()
        };

        if ct.contains("image") {
            return media(PartType::Image);
        }
        if ct.contains("audio") {
            return media(PartType::Audio);
        }
        if ct.contains("video") {
            return media(PartType::Video);
        }
    }

    if content_type.as_deref() == Some("code") || part.get("language").is_some() {
        return ClassifiedPart {
            part_type: PartType::Code,
            language: str_field(part, "language"),
            text_content: str_field(part, "text").or_else(|| str_field(part, "code")),
            source_json,
            ..Default::default()
        };
    }

    match type_field.as_deref() {
        Some("text") => {
            return ClassifiedPart {
                part_type: PartType::Text,
                text_content: str_field(part, "text"),
                source_json,
                ..Default::default()
            };
        }
        Some("thinking") => {
            return ClassifiedPart {
                part_type: PartType::Thinking,
                text_content: str_field(part, "thinking"),
                source_json,
                ..Default::default()
            };
        }
        Some("tool_use") => {
            let tool_input = part.get("input").cloned();
            let text_content = tool_input
                .as_ref()
                .and_then(|input| {
                    str_field(input, "query").or_else(|| str_field(input, "text"))
                });
            return ClassifiedPart {
                part_type: PartType::ToolUse,
                tool_name: str_field(part, "name"),
                tool_use_id: str_field(part, "id"),
                tool_input,
                text_content,
                source_json,
                ..Default::default()
            };
        }
        Some("tool_result") => {
            return ClassifiedPart {
                part_type: PartType::ToolResult,
                tool_use_id: str_field(part, "tool_use_id"),
                is_error: Some(part.get("is_error").and_then(Value::as_bool).unwrap_or(false)),
                text_content: tool_result_text(part.get("content")),
                source_json,
                ..Default::default()
            };
        }
        Some("image") => {
            let source = part.get("source");
            let url = source
                .filter(|s| s.get("type").and_then(Value::as_str) == Some("url"))
                .and_then(|s| str_field(s, "url"));
            return ClassifiedPart {
                part_type: PartType::Image,
                media_type: source
                    .and_then(|s| str_field(s, "media_type"))
                    .or_else(|| str_field(part, "media_type")),
                url,
                source_json,
                ..Default::default()
            };
        }
        _ => {}
    }

    for key in ["text", "result", "content"] {
        if let Some(text) = str_field(part, key) {
            return ClassifiedPart {
                part_type: PartType::Text,
                text_content: Some(text),
                source_json,
                ..Default::default()
            };
        }
    }

    ClassifiedPart {
        part_type: content_type
            .map(|ct| PartType::from_str(&ct))
            .unwrap_or(PartType::Unknown),
        source_json,
        ..Default::default()
    }
}

fn tool_result_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let texts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    other => str_field(other, "text"),
                })
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}
