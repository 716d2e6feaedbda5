/// Static description of one supported source
#[derive(Debug, Clone, Copy)]
pub struct SourceDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Whether the export format carries real parent pointers
    pub has_native_trees: bool,
    /// Role vocabulary as it appears in the export
    pub role_vocabulary: &'static [&'static str],
}

const SOURCES: &[SourceDescriptor] = &[
    SourceDescriptor {
        id: "chatgpt",
        display_name: "ChatGPT",
        has_native_trees: true,
        role_vocabulary: &["user", "assistant", "system", "tool"],
    },
    SourceDescriptor {
        id: "claude",
        display_name: "Claude",
        has_native_trees: false,
        role_vocabulary: &["human", "assistant"],
    },
];

pub fn all_sources() -> &'static [SourceDescriptor] {
    SOURCES
}

pub fn get_source(id: &str) -> Option<&'static SourceDescriptor> {
    SOURCES.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        assert!(get_source("chatgpt").unwrap().has_native_trees);
        assert!(!get_source("claude").unwrap().has_native_trees);
        assert!(get_source("gemini").is_none());
    }

    #[test]
    fn test_claude_vocabulary_uses_human() {
        let claude = get_source("claude").unwrap();
        assert!(claude.role_vocabulary.contains(&"human"));
    }
}
