//! Review orchestration: build the prompt, make one model call, decode.

use anyhow::Result;

use super::{parser, prompt, DiffUnit, ReviewResult};
use crate::llm::CompletionClient;

/// Runs single-diff and batch reviews against the completion service.
///
/// `Err` means the completion call itself failed and the delivery should
/// abort; `Ok(None)` means the model answered but the answer could not be
/// decoded, which callers absorb as "nothing to post".
#[derive(Debug, Clone)]
pub struct CodeReviewer {
    completion: CompletionClient,
}

impl CodeReviewer {
    pub fn new(completion: CompletionClient) -> Self {
        Self { completion }
    }

    /// Review one file's diff with a single model call. A decoded verdict
    /// is tagged with the file it belongs to.
    pub async fn review_diff(&self, file_name: &str, diff: &str) -> Result<Option<ReviewResult>> {
        let messages = prompt::single_diff_messages(diff);
        let answer = self.completion.complete(&messages).await?;

        Ok(parser::parse_review_result(&answer).map(|mut result| {
            result.file = Some(file_name.to_owned());
            result
        }))
    }

    /// Review a whole change set with a single model call covering every
    /// diff, yielding one combined verdict.
    pub async fn review_diffs(&self, diffs: &[DiffUnit]) -> Result<Option<ReviewResult>> {
        let messages = prompt::batch_diff_messages(diffs);
        let answer = self.completion.complete(&messages).await?;

        Ok(parser::parse_review_result(&answer))
    }
}
