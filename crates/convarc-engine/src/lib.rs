// Derived-structure builders
// Each pass is independently re-runnable: it clears and rewrites its own
// scope (one dialogue or one sequence) inside a single transaction.

pub mod error;
pub mod exchange;
pub mod hash;
pub mod prompt_response;
pub mod tree;

pub use error::{Error, Result};
pub use exchange::{ExchangeBuilder, ExchangeCounts, is_continuation_prompt};
pub use hash::{HashBuilder, HashCounts, normalize_for_comparison, normalize_whitespace};
pub use prompt_response::{PromptResponseBuilder, PromptResponseCounts};
pub use tree::{TreeBuilder, TreeCounts};
