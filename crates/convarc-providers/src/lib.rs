// Error types
pub mod error;

// Shared extraction machinery
pub mod base;

// Content-part classification
pub mod classify;

// Provider implementations
pub mod chatgpt;
pub mod claude;

// Source registry
pub mod registry;

pub use base::{ExtractCounts, Extractor, ExtractorOptions, extract_all};
pub use chatgpt::ChatGptExtractor;
pub use classify::{ClassifiedPart, classify_part};
pub use claude::ClaudeExtractor;
pub use error::{Error, Result};
pub use registry::{SourceDescriptor, all_sources, get_source};
