//! Top-K semantic retrieval with provenance.
//!
//! Embeds the query text with the same collaborator used at ingestion (the
//! vector spaces must match), queries the index, and annotates each hit
//! with its source provenance so downstream generation stays grounded. An
//! empty index or zero matches returns an empty sequence, not an error;
//! callers fall back to generic, ungrounded content.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::debug;

use crate::embedding::Embedder;
use crate::index::EmbeddingIndex;
use crate::models::RetrievalResult;
use crate::store;

pub struct Retriever<'a> {
    pool: &'a SqlitePool,
    index: &'a EmbeddingIndex,
    embedder: &'a dyn Embedder,
}

impl<'a> Retriever<'a> {
    pub fn new(pool: &'a SqlitePool, index: &'a EmbeddingIndex, embedder: &'a dyn Embedder) -> Self {
        Self {
            pool,
            index,
            embedder,
        }
    }

    /// Top-K semantic search. Results arrive sorted by descending score,
    /// ties broken by ascending chunk ordinal.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalResult>> {
        if query.trim().is_empty() || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query).await?;
        let hits = self.index.query(&query_vec, top_k)?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let text = store::chunk_text(self.pool, &hit.chunk_id)
                .await?
                .unwrap_or_default();
            results.push(RetrievalResult {
                chunk_id: hit.chunk_id,
                score: hit.score,
                text,
                source_uri: hit.metadata.source_uri,
                ordinal: hit.metadata.ordinal,
            });
        }

        debug!(query = %query, results = results.len(), "retrieval complete");
        Ok(results)
    }

    /// Concatenated grounding context for the generation collaborators,
    /// capped at a token budget. Empty retrieval yields an empty string;
    /// the caller falls back to ungrounded content.
    pub async fn grounding_context(
        &self,
        query: &str,
        top_k: usize,
        max_tokens: usize,
    ) -> Result<String> {
        let results = self.search(query, top_k).await?;
        Ok(assemble_context(&results, max_tokens))
    }
}

/// Pack retrieval results into one context string under a token budget,
/// best passages first, tagged with their provenance.
fn assemble_context(results: &[RetrievalResult], max_tokens: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for r in results {
        let tokens = r.text.split_whitespace().count();
        if used + tokens > max_tokens && used > 0 {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&format!("[{}#{}] {}", r.source_uri, r.ordinal, r.text));
        used += tokens;
        if used >= max_tokens {
            break;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ordinal: i64, tokens: usize) -> RetrievalResult {
        RetrievalResult {
            chunk_id: format!("c{}", ordinal),
            score: 1.0 - ordinal as f32 * 0.1,
            text: (0..tokens)
                .map(|i| format!("t{}", i))
                .collect::<Vec<_>>()
                .join(" "),
            source_uri: "file:///doc.md".to_string(),
            ordinal,
        }
    }

    #[test]
    fn test_assemble_context_empty() {
        assert_eq!(assemble_context(&[], 100), "");
    }

    #[test]
    fn test_assemble_context_respects_budget() {
        let results = vec![result(0, 50), result(1, 50), result(2, 50)];
        let context = assemble_context(&results, 100);
        assert!(context.contains("[file:///doc.md#0]"));
        assert!(context.contains("[file:///doc.md#1]"));
        assert!(!context.contains("[file:///doc.md#2]"));
    }

    #[test]
    fn test_assemble_context_always_takes_first_passage() {
        // A single oversized passage still produces grounding rather than
        // an empty context.
        let results = vec![result(0, 500)];
        let context = assemble_context(&results, 100);
        assert!(context.contains("[file:///doc.md#0]"));
    }
}
