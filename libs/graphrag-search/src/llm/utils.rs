use lazy_static::lazy_static;
use regex::Regex;
use tiktoken_rs::CoreBPE;

lazy_static! {
    static ref CL100K: Option<CoreBPE> = tiktoken_rs::cl100k_base().ok();
}

/// Token count using the cl100k encoding, or a chars/4 estimate when the
/// encoder is unavailable.
pub fn num_tokens(text: &str) -> usize {
    match CL100K.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len() / 4,
    }
}

pub fn count_message_tokens(parts: &[&str], num_tokens_fn: fn(&str) -> usize) -> usize {
    parts.iter().map(|part| num_tokens_fn(part)).sum()
}

lazy_static! {
    static ref FENCED_JSON: Regex = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").unwrap();
}

/// Extracts a JSON value from an LLM response: a fenced ```json block, the
/// bare response, or the outermost object embedded in prose. Bracketed text
/// in prose such as `[1]` is not treated as JSON.
pub fn parse_json_response(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(captures) = FENCED_JSON.captures(trimmed) {
        if let Ok(value) = serde_json::from_str(captures[1].trim()) {
            return Some(value);
        }
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
