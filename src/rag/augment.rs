use super::document::{AugmentedPrompt, RetrievalResult};

pub const CONTEXT_SEPARATOR: &str = "\n";
pub const QUERY_SEPARATOR: &str = "\n";

/// Prepends retrieved chunk texts, in result order, to the query.
///
/// With no retrieved chunks the prompt is the query alone.
pub fn augment(result: &RetrievalResult, query: &str) -> AugmentedPrompt {
    if result.is_empty() {
        return AugmentedPrompt {
            text: query.to_string(),
            context_chunks: 0,
        };
    }

    let context = result
        .matches
        .iter()
        .map(|m| m.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR);

    AugmentedPrompt {
        text: format!("{}{}{}", context, QUERY_SEPARATOR, query),
        context_chunks: result.len(),
    }
}
