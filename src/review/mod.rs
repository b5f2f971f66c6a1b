//! LLM-backed code review pipeline.
//!
//! Turns diffs into a structured verdict in three steps:
//!
//! 1. [`prompt`] builds the chat messages for one diff or a whole batch.
//! 2. [`CompletionClient`](crate::llm::CompletionClient) performs the one
//!    model call.
//! 3. [`parser`] decodes the answer into a [`ReviewResult`], or yields
//!    nothing when the model strayed from the contract.
//!
//! [`CodeReviewer`] wires the three together. Both review paths are
//! stateless; their only side effect is the single outbound model call.

pub mod parser;
pub mod prompt;
pub mod reviewer;

pub use parser::parse_review_result;
pub use reviewer::CodeReviewer;

use serde::Deserialize;

/// One file's textual patch, ready for submission to the model.
///
/// Provider adapters produce these from raw change records. `file` and
/// `diff` are non-empty for every unit actually submitted; adapters drop
/// records that cannot satisfy that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffUnit {
    pub file: String,
    pub diff: String,
}

/// Structured verdict decoded from the model's answer.
///
/// `file` tags which diff a single-mode verdict belongs to; batch verdicts
/// cover the whole change set and leave it unset. Unknown keys in the
/// model output fail the decode, the caller then sees no result at all
/// rather than a half-trusted one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReviewResult {
    pub should_comment: bool,
    pub issues: String,
    pub suggestions: String,
    #[serde(default)]
    pub file: Option<String>,
}
