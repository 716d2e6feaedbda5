//! Testing infrastructure for convarc integration tests.
//!
//! Provides builders that assemble provider-shaped conversation JSON
//! (branched node maps and linear message arrays) without hand-writing
//! nested fixtures in every test.

pub mod fixtures;

pub use fixtures::{BranchedConversation, LinearConversation};
