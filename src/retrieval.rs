//! S4's optional-retrieve contract: fetch supporting passages when a
//! classification flags `needs_retrieval`, otherwise a no-op.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub source: String,
    pub text: String,
}

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> anyhow::Result<Vec<RetrievedPassage>>;
}

/// Always returns no passages. Used when no retrieval backend is
/// configured; callers treat an empty result as "proceed without
/// retrieval" rather than an error, per the contract's optionality.
pub struct NullRetriever;

#[async_trait]
impl Retriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> anyhow::Result<Vec<RetrievedPassage>> {
        Ok(Vec::new())
    }
}

/// Append retrieved passages to a prompt as grounding context. A no-op
/// when `passages` is empty.
pub fn augment_prompt(prompt: &str, passages: &[RetrievedPassage]) -> String {
    if passages.is_empty() {
        return prompt.to_string();
    }
    let context = passages
        .iter()
        .map(|p| format!("[{}] {}", p.source, p.text))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{prompt}\n\nSupporting context:\n{context}")
}
