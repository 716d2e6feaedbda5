use serde_json::Value;

use convarc_types::{PartType, Role};

/// The value carried by one annotation result; selects the target table
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationValue {
    Flag,
    String(String),
    Numeric(f64),
    Json(Value),
}

/// One fact produced by an annotator
#[derive(Debug, Clone)]
pub struct AnnotationResult {
    pub key: String,
    pub value: AnnotationValue,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

impl AnnotationResult {
    pub fn flag(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnnotationValue::Flag,
            confidence: None,
            reason: None,
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnnotationValue::String(value.into()),
            confidence: None,
            reason: None,
        }
    }

    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value: AnnotationValue::Numeric(value),
            confidence: None,
            reason: None,
        }
    }

    pub fn json(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: AnnotationValue::Json(value),
            confidence: None,
            reason: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Static description of one annotator.
///
/// `priority` orders annotators within a run (platform evidence 100,
/// explicit syntax 90, structural 70, keyword 50, density 30). The
/// `requires_*` lists are prerequisites that must already be present on an
/// entity; the `skip_if_*` lists suppress the annotator when a
/// higher-priority result already exists. Bump `version` to force full
/// reprocessing under a fresh cursor.
#[derive(Debug, Clone)]
pub struct AnnotatorSpec {
    pub name: &'static str,
    /// The annotation key (or namespace) this annotator owns
    pub key: &'static str,
    pub version: &'static str,
    pub priority: u8,
    pub requires_flags: &'static [&'static str],
    pub requires_strings: &'static [&'static str],
    pub skip_if_flags: &'static [&'static str],
    pub skip_if_strings: &'static [&'static str],
    pub role_filter: Option<Role>,
    pub part_type_filter: Option<PartType>,
}

impl AnnotatorSpec {
    /// Spec with no filters or prerequisites; override fields with struct
    /// update syntax.
    pub const fn base(
        name: &'static str,
        key: &'static str,
        version: &'static str,
        priority: u8,
    ) -> Self {
        Self {
            name,
            key,
            version,
            priority,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: None,
            part_type_filter: None,
        }
    }
}
