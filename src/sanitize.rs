//! Hard limits applied to tool arguments before they leave the process.

use serde_json::{Map, Value};

use crate::schema::DecisionArguments;

/// The search backend matches poorly on long phrases; terms are capped at this
/// many words.
pub const MAX_TERM_WORDS: usize = 2;

/// Trim a search term to its first [`MAX_TERM_WORDS`] words.
///
/// Terms within the limit come back untouched.
pub fn clamp_term(term: &str) -> String {
    let words: Vec<&str> = term.split_whitespace().collect();
    if words.len() <= MAX_TERM_WORDS {
        return term.to_string();
    }
    let clamped = words[..MAX_TERM_WORDS].join(" ");
    tracing::warn!(original = term, clamped = %clamped, "search term truncated");
    clamped
}

/// Arguments for the remote search tool.
pub fn sanitize_search(arguments: &DecisionArguments) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(term) = &arguments.term {
        out.insert("term".into(), Value::String(clamp_term(term)));
    }
    out
}

/// Primary identifier if present and non-blank, otherwise the alternate.
pub fn resolve_document_id(arguments: &DecisionArguments) -> Option<String> {
    [&arguments.document_id, &arguments.alt_document_id]
        .into_iter()
        .flatten()
        .map(|id| id.trim())
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// Arguments for the remote fetch tool. The server accepts the identifier
/// under either key, so both are sent.
pub fn fetch_arguments(document_id: &str) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("document_id".into(), Value::String(document_id.to_string()));
    out.insert("doc_id".into(), Value::String(document_id.to_string()));
    out
}
