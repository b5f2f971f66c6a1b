//! Prompt construction for review model calls.
//!
//! Pure payload building, no I/O. Single mode inlines the diff into one
//! system turn; batch mode sends the instruction alone, then one user turn
//! per diff labeled with its file name, then a closing question.

use super::DiffUnit;
use crate::llm::ChatMessage;

/// Fixed system instruction. Pins the response contract to a JSON object
/// with exactly `should_comment`, `issues`, and `suggestions`.
pub const REVIEW_INSTRUCTION: &str = "\
Act as an expert software tech lead reviewing a merge request.\n\
Keep in mind that each diff is only a snippet, it does not contain the full code.\n\
Answer with valid JSON in exactly this form:\n\
{\"should_comment\": bool, \"issues\": \"<problems found in the code with a detailed explanation why>\", \"suggestions\": \"<improvements that could be made to the code with an explanation why>\"}\n\n\
Format your answer readably and use real newlines in it.\n\
Work through the diff step by step to be sure the verdict is right.\n";

/// Messages for reviewing one diff: a single system turn carrying the
/// instruction, the fenced diff, and the closing question.
pub fn single_diff_messages(diff: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        "{REVIEW_INSTRUCTION}\n```\n{diff}\n```\n\nDoes this diff contain any issues? Can it be improved?\n"
    );
    vec![ChatMessage::system(prompt)]
}

/// Messages for reviewing a whole change set in one call.
pub fn batch_diff_messages(diffs: &[DiffUnit]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(diffs.len() + 2);
    messages.push(ChatMessage::system(REVIEW_INSTRUCTION));
    for unit in diffs {
        messages.push(ChatMessage::user(format!(
            "File: {}\n```\n{}\n```\n",
            unit.file, unit.diff
        )));
    }
    messages.push(ChatMessage::user(
        "Do these diffs contain any issues? Can they be improved?\n",
    ));
    messages
}
