//! Decoding of model answers into [`ReviewResult`]s.
//!
//! Models are asked for bare JSON but routinely wrap it in markdown code
//! fences or pad it with prose. A fence-stripping pre-pass recovers the
//! JSON block when one exists; everything that still fails to decode
//! collapses to `None`. Parsing never fails loudly, callers branch on the
//! absence of a result instead.

use super::ReviewResult;

/// Decode one raw model answer. `None` on malformed JSON, missing keys,
/// wrong types, or unknown extra fields.
pub fn parse_review_result(raw: &str) -> Option<ReviewResult> {
    serde_json::from_str(extract_json_block(raw)).ok()
}

/// Pull the JSON payload out of a response that may be wrapped in
/// ```` ```json ```` fences, plain fences, or nothing at all.
fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            let block = rest[..end].trim();
            // A bare fence may still open with a language tag line.
            if let Some(newline) = block.find('\n') {
                if !block[..newline].trim_start().starts_with('{') {
                    return block[newline + 1..].trim();
                }
            }
            return block;
        }
    }

    text.trim()
}
