mod extractor;
mod schema;

pub use extractor::ClaudeExtractor;
