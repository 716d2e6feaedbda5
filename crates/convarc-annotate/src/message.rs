//! Message-level text annotators: code evidence at several strength
//! tiers, wiki links, LaTeX, and continuation signals.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data::MessageTextData;
use crate::result::{AnnotationResult, AnnotatorSpec};
use crate::traits::MessageAnnotator;
use convarc_types::Role;

static FENCE_LANGUAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(\w+)").unwrap());
static WIKI_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[.+?\]\]").unwrap());
static PYTHON_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*def\s+\w+\s*\([^)]*\)\s*:").unwrap());
static CLASS_DECL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*class\s+\w+").unwrap());
static JS_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"function\s*\w*\s*\([^)]*\)\s*\{").unwrap());
static VAR_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\b(let|const|var)\s+\w+\s*=").unwrap());
static FUNCTION_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(def\s+\w+\s*\(|function\s+\w+\s*\(|fn\s+\w+\s*\(|func\s+\w+\s*\()").unwrap()
});
static IMPORT_STATEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^\s*(import\s+\w|from\s+\w[\w.]*\s+import\s|#include\s*[<"]|use\s+\w+::)"#)
        .unwrap()
});
static LATEX_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?s)\$\$.+?\$\$").unwrap(),
        Regex::new(r"(?s)\\\(.+?\\\)").unwrap(),
        Regex::new(r"(?s)\\\[.+?\\\]").unwrap(),
    ]
});

const LATEX_COMMANDS: &[&str] = &[
    "\\frac", "\\sum", "\\int", "\\sqrt", "\\alpha", "\\beta", "\\gamma", "\\theta", "\\pi",
    "\\sigma", "\\infty", "\\partial", "\\nabla", "\\Delta", "\\Omega", "\\lambda", "\\mu",
];

const DENSITY_KEYWORDS: &[&str] = &[
    "function", "class", "import", "return", "if ", "for ", "while ", "const ", "let ", "var ",
    "async", "await", "try", "catch",
];

/// Explicit ``` fences: the strongest text-level code evidence. Also
/// records each language hint as a `code_language` tag.
pub struct CodeBlockAnnotator;

impl MessageAnnotator for CodeBlockAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base("CodeBlockAnnotator", "has_code", "1.0", 90);
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        if !data.text.contains("```") {
            return Vec::new();
        }

        let mut results = vec![AnnotationResult::flag("has_code").with_confidence(1.0)];

        let mut languages: Vec<String> = FENCE_LANGUAGE
            .captures_iter(&data.text)
            .map(|captures| captures[1].to_lowercase())
            .collect();
        languages.sort();
        languages.dedup();
        for language in languages {
            results.push(
                AnnotationResult::string("code_language", language).with_confidence(1.0),
            );
        }

        results
    }
}

/// Shebangs and C-family includes
pub struct ScriptHeaderAnnotator;

impl MessageAnnotator for ScriptHeaderAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("ScriptHeaderAnnotator", "has_script_header", "1.0", 90);
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let text = &data.text;
        if text.contains("#!/") || text.contains("#include <") || text.contains("#include \"") {
            vec![AnnotationResult::flag("has_script_header").with_confidence(1.0)]
        } else {
            Vec::new()
        }
    }
}

/// Balanced structural patterns: a def with a return, a class with a
/// method, a braced function, or repeated variable declarations
pub struct CodeStructureAnnotator;

impl MessageAnnotator for CodeStructureAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec =
            AnnotatorSpec::base("CodeStructureAnnotator", "has_code_structure", "1.0", 70);
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let text = &data.text;
        let has_structure = (PYTHON_DEF.is_match(text) && text.contains("return"))
            || (CLASS_DECL.is_match(text) && PYTHON_DEF.is_match(text))
            || JS_FUNCTION.is_match(text)
            || VAR_ASSIGNMENT.find_iter(text).count() >= 2;

        if has_structure {
            vec![AnnotationResult::flag("has_code_structure").with_confidence(0.8)]
        } else {
            Vec::new()
        }
    }
}

pub struct FunctionDefinitionAnnotator;

impl MessageAnnotator for FunctionDefinitionAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base(
            "FunctionDefinitionAnnotator",
            "has_function_definition",
            "1.0",
            70,
        );
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        if FUNCTION_DEF.is_match(&data.text) {
            vec![AnnotationResult::flag("has_function_definition").with_confidence(0.8)]
        } else {
            Vec::new()
        }
    }
}

pub struct ImportStatementAnnotator;

impl MessageAnnotator for ImportStatementAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec::base(
            "ImportStatementAnnotator",
            "has_import_statement",
            "1.0",
            70,
        );
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        if IMPORT_STATEMENT.is_match(&data.text) {
            vec![AnnotationResult::flag("has_import_statement").with_confidence(0.8)]
        } else {
            Vec::new()
        }
    }
}

/// Weakest tier: long text with many programming keywords. Skipped when
/// explicit fences already proved code.
pub struct CodeKeywordDensityAnnotator;

impl MessageAnnotator for CodeKeywordDensityAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "CodeKeywordDensityAnnotator",
            key: "has_code_keywords",
            version: "1.0",
            priority: 30,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &["has_code"],
            skip_if_strings: &[],
            role_filter: None,
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        if data.text.len() <= 500 {
            return Vec::new();
        }
        let lowered = data.text.to_lowercase();
        let keyword_count = DENSITY_KEYWORDS
            .iter()
            .filter(|keyword| lowered.contains(*keyword))
            .count();

        if keyword_count >= 5 {
            vec![
                AnnotationResult::flag("has_code_keywords")
                    .with_confidence(0.5)
                    .with_reason(format!("{} density keywords", keyword_count)),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Obsidian-style [[wiki links]] in assistant responses
pub struct WikiLinkAnnotator;

impl MessageAnnotator for WikiLinkAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "WikiLinkAnnotator",
            key: "has_wiki_links",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::Assistant),
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let count = WIKI_LINK.find_iter(&data.text).count();
        if count == 0 {
            return Vec::new();
        }
        vec![
            AnnotationResult::flag("has_wiki_links").with_confidence(1.0),
            AnnotationResult::numeric("wiki_link_count", count as f64),
        ]
    }
}

/// LaTeX/MathJax notation in assistant responses
pub struct LatexAnnotator;

impl MessageAnnotator for LatexAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "LatexAnnotator",
            key: "has_latex",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::Assistant),
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let text = &data.text;
        let has_block = LATEX_BLOCKS.iter().any(|pattern| pattern.is_match(text));
        let commands: Vec<&str> = LATEX_COMMANDS
            .iter()
            .copied()
            .filter(|command| text.contains(command))
            .collect();

        if !has_block && commands.is_empty() {
            return Vec::new();
        }

        let mut result = AnnotationResult::flag("has_latex").with_confidence(1.0);
        if !commands.is_empty() {
            result = result.with_reason(commands[..commands.len().min(10)].join(" "));
        }
        vec![result]
    }
}

const CONTINUATION_PATTERNS: &[(&str, &[&str])] = &[
    ("continue", &["continue", "keep going", "go on", "carry on"]),
    (
        "elaborate",
        &["elaborate", "expand", "tell me more", "more details"],
    ),
    ("finish", &["finish", "complete", "wrap up"]),
    ("next", &["next", "what else", "and then"]),
];

/// Short user messages that only ask the assistant to keep going.
/// Emits `continuation_signal` keyed by the matched subkind.
pub struct ContinuationAnnotator;

impl MessageAnnotator for ContinuationAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "ContinuationAnnotator",
            key: "continuation_signal",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::User),
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let text = data.text.trim().to_lowercase();
        if text.is_empty() || text.split_whitespace().count() > 10 || text.starts_with('>') {
            return Vec::new();
        }

        for (subkind, keywords) in CONTINUATION_PATTERNS {
            for keyword in *keywords {
                if text == *keyword || text.starts_with(&format!("{} ", keyword)) {
                    return vec![
                        AnnotationResult::string("continuation_signal", *subkind)
                            .with_confidence(0.9)
                            .with_reason(format!("matched {}", keyword)),
                    ];
                }
            }
        }

        Vec::new()
    }
}

/// Quoted text followed by a bare elaboration cue
pub struct QuoteElaborateAnnotator;

impl MessageAnnotator for QuoteElaborateAnnotator {
    fn spec(&self) -> &AnnotatorSpec {
        static SPEC: AnnotatorSpec = AnnotatorSpec {
            name: "QuoteElaborateAnnotator",
            key: "continuation_signal",
            version: "1.0",
            priority: 50,
            requires_flags: &[],
            requires_strings: &[],
            skip_if_flags: &[],
            skip_if_strings: &[],
            role_filter: Some(Role::User),
            part_type_filter: None,
        };
        &SPEC
    }

    fn annotate(&self, data: &MessageTextData) -> Vec<AnnotationResult> {
        let text = data.text.trim().to_lowercase();
        if !text.starts_with('>') || text.split_whitespace().count() > 10 {
            return Vec::new();
        }

        let last_line = text.lines().last().map(str::trim).unwrap_or("");
        if matches!(last_line, "elaborate" | "continue" | "expand" | "more") {
            vec![
                AnnotationResult::string("continuation_signal", "quote_elaborate")
                    .with_confidence(1.0),
            ]
        } else {
            Vec::new()
        }
    }
}

pub fn standard_annotators() -> Vec<Box<dyn MessageAnnotator>> {
    vec![
        Box::new(CodeBlockAnnotator),
        Box::new(ScriptHeaderAnnotator),
        Box::new(CodeStructureAnnotator),
        Box::new(FunctionDefinitionAnnotator),
        Box::new(ImportStatementAnnotator),
        Box::new(CodeKeywordDensityAnnotator),
        Box::new(WikiLinkAnnotator),
        Box::new(LatexAnnotator),
        Box::new(ContinuationAnnotator),
        Box::new(QuoteElaborateAnnotator),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AnnotationValue;
    use uuid::Uuid;

    fn data(role: Role, text: &str) -> MessageTextData {
        MessageTextData {
            message_id: Uuid::new_v4(),
            dialogue_id: Uuid::new_v4(),
            role,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_code_block_extracts_languages() {
        let results = CodeBlockAnnotator.annotate(&data(
            Role::Assistant,
            "```python\nprint(1)\n```\nand\n```rust\nfn main() {}\n```",
        ));
        assert_eq!(results[0].key, "has_code");
        let languages: Vec<&str> = results[1..]
            .iter()
            .filter_map(|r| match &r.value {
                AnnotationValue::String(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(languages, vec!["python", "rust"]);
    }

    #[test]
    fn test_code_block_absent() {
        assert!(
            CodeBlockAnnotator
                .annotate(&data(Role::Assistant, "no code here"))
                .is_empty()
        );
    }

    #[test]
    fn test_script_header() {
        assert!(
            !ScriptHeaderAnnotator
                .annotate(&data(Role::Assistant, "#!/usr/bin/env bash\necho hi"))
                .is_empty()
        );
        assert!(
            !ScriptHeaderAnnotator
                .annotate(&data(Role::Assistant, "#include <stdio.h>"))
                .is_empty()
        );
        assert!(
            ScriptHeaderAnnotator
                .annotate(&data(Role::Assistant, "# a heading, not a shebang"))
                .is_empty()
        );
    }

    #[test]
    fn test_code_structure_def_and_return() {
        let text = "def add(a, b):\n    return a + b";
        assert!(!CodeStructureAnnotator.annotate(&data(Role::Assistant, text)).is_empty());
    }

    #[test]
    fn test_code_structure_multiple_declarations() {
        let text = "let x = 1;\nconst y = 2;";
        assert!(!CodeStructureAnnotator.annotate(&data(Role::Assistant, text)).is_empty());
        assert!(
            CodeStructureAnnotator
                .annotate(&data(Role::Assistant, "let me think about that"))
                .is_empty()
        );
    }

    #[test]
    fn test_keyword_density_requires_length_and_count() {
        let long_prose = "word ".repeat(120);
        assert!(
            CodeKeywordDensityAnnotator
                .annotate(&data(Role::Assistant, &long_prose))
                .is_empty()
        );

        let dense = format!(
            "{} function class import return if while const let await try",
            "padding ".repeat(80)
        );
        assert!(
            !CodeKeywordDensityAnnotator
                .annotate(&data(Role::Assistant, &dense))
                .is_empty()
        );
    }

    #[test]
    fn test_wiki_links_counted() {
        let results =
            WikiLinkAnnotator.annotate(&data(Role::Assistant, "See [[Rust]] and [[Serde]]"));
        assert_eq!(results.len(), 2);
        match results[1].value {
            AnnotationValue::Numeric(count) => assert_eq!(count, 2.0),
            _ => panic!("expected numeric count"),
        }
    }

    #[test]
    fn test_latex_detection() {
        assert!(
            !LatexAnnotator
                .annotate(&data(Role::Assistant, "The sum is $$\\sum_i x_i$$"))
                .is_empty()
        );
        assert!(
            !LatexAnnotator
                .annotate(&data(Role::Assistant, "Use \\frac{a}{b} here"))
                .is_empty()
        );
        assert!(
            LatexAnnotator
                .annotate(&data(Role::Assistant, "price is $5 and $10"))
                .is_empty()
        );
    }

    #[test]
    fn test_continuation_subkinds() {
        let results = ContinuationAnnotator.annotate(&data(Role::User, "keep going"));
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].value,
            AnnotationValue::String("continue".to_string())
        );

        let results = ContinuationAnnotator.annotate(&data(Role::User, "tell me more"));
        assert_eq!(
            results[0].value,
            AnnotationValue::String("elaborate".to_string())
        );

        assert!(
            ContinuationAnnotator
                .annotate(&data(
                    Role::User,
                    "continue the analysis but this time look at the error handling paths too"
                ))
                .is_empty()
        );
    }

    #[test]
    fn test_quote_elaborate() {
        let results =
            QuoteElaborateAnnotator.annotate(&data(Role::User, "> ownership moves values\nelaborate"));
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].value,
            AnnotationValue::String("quote_elaborate".to_string())
        );

        assert!(
            QuoteElaborateAnnotator
                .annotate(&data(Role::User, "> quoted text\nwhy is that"))
                .is_empty()
        );
    }
}
