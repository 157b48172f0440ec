//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow from raw sources to the queryable knowledge base:
//! scan → extract → normalize → chunk → embed → index. A batch never fails
//! wholesale because of one bad document: unreadable sources are skipped
//! with a warning, chunks whose embeddings never succeed are dropped with
//! a warning, and a topic scrape that fails or comes back empty falls back
//! to a topic seed with a warning. Only a batch that produces zero usable
//! documents is a fatal error, surfaced to the session orchestrator before
//! planning.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_document;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::extract_file;
use crate::index::EmbeddingIndex;
use crate::models::{Chunk, ChunkMetadata, Document, IngestionReport};
use crate::scrape::{ScrapedArticle, TopicSource};
use crate::store;

/// What to ingest: explicit document paths, or a topic whose material is
/// pulled from the scrape fallback (seeding a minimal topic document when
/// scraping yields nothing).
#[derive(Debug, Clone)]
pub enum IngestInput {
    Paths(Vec<PathBuf>),
    Topic(String),
}

/// Stable document id derived from the source URI, so re-ingestion of the
/// same source maps onto the same row.
pub fn document_id(source_uri: &str) -> String {
    let digest = Sha256::digest(source_uri.as_bytes());
    format!("{:x}", digest)[..32].to_string()
}

/// Scan the configured input directory for ingestible documents.
pub fn scan_input_dir(config: &Config) -> Result<Vec<PathBuf>> {
    let root = &config.ingest.input_dir;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let include_set = build_globset(&config.ingest.include_globs)?;
    let exclude_set = build_globset(&config.ingest.exclude_globs)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    // Deterministic ordering across platforms.
    paths.sort();
    Ok(paths)
}

/// Run one ingestion batch and return its report.
///
/// `max_documents` truncates the batch; zero usable documents is an error.
pub async fn ingest(
    config: &Config,
    pool: &SqlitePool,
    index: &EmbeddingIndex,
    embedder: &dyn Embedder,
    topic_source: &dyn TopicSource,
    input: IngestInput,
    max_documents: usize,
) -> Result<IngestionReport> {
    let mut report = IngestionReport::default();

    let documents = match input {
        IngestInput::Paths(mut paths) => {
            paths.truncate(max_documents);
            let mut docs = Vec::new();
            for path in &paths {
                match normalize_path(path) {
                    Ok(doc) => docs.push(doc),
                    Err(e) => {
                        let msg = format!("skipping {}: {}", path.display(), e);
                        warn!("{}", msg);
                        report.documents_skipped += 1;
                        report.warnings.push(msg);
                    }
                }
            }
            docs
        }
        IngestInput::Topic(topic) => {
            let mut docs = topic_documents(config, topic_source, &topic, &mut report).await;
            docs.truncate(max_documents);
            docs
        }
    };

    if documents.is_empty() {
        bail!(
            "No usable documents: {} source(s) skipped",
            report.documents_skipped
        );
    }

    for doc in &documents {
        let chunks = chunk_document(
            doc,
            config.chunking.window_tokens,
            config.chunking.overlap_tokens(),
        );
        if chunks.is_empty() {
            let msg = format!("skipping {}: no text after extraction", doc.source_uri);
            warn!("{}", msg);
            report.documents_skipped += 1;
            report.warnings.push(msg);
            continue;
        }

        store::upsert_document(pool, doc).await?;
        store::replace_chunks(pool, &doc.id, &chunks).await?;

        let (written, dropped) = embed_and_index(pool, index, embedder, doc, &chunks, &mut report)
            .await?;
        report.chunks_written += written;
        report.chunks_dropped += dropped;
        report.documents_ingested += 1;

        info!(
            source = %doc.source_uri,
            chunks = chunks.len(),
            "document ingested"
        );
    }

    if report.documents_ingested == 0 {
        bail!(
            "No usable documents: all {} source(s) skipped",
            report.documents_skipped
        );
    }

    Ok(report)
}

/// Embed a document's chunks and upsert them into the index and the
/// write-through vector table. Embedding failure (after the embedder's own
/// bounded retries) drops the affected chunks, never the batch.
async fn embed_and_index(
    pool: &SqlitePool,
    index: &EmbeddingIndex,
    embedder: &dyn Embedder,
    doc: &Document,
    chunks: &[Chunk],
    report: &mut IngestionReport,
) -> Result<(u64, u64)> {
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let vectors = match embedder.embed(&texts).await {
        Ok(v) => v,
        Err(e) => {
            let msg = format!(
                "embedding failed for {} ({} chunks dropped): {}",
                doc.source_uri,
                chunks.len(),
                e
            );
            warn!("{}", msg);
            report.warnings.push(msg);
            return Ok((0, chunks.len() as u64));
        }
    };

    let mut written = 0u64;
    for (chunk, vector) in chunks.iter().zip(vectors.into_iter()) {
        let metadata = ChunkMetadata {
            source_uri: doc.source_uri.clone(),
            ordinal: chunk.ordinal,
        };
        store::upsert_vector(pool, &chunk.id, &metadata, &vector).await?;
        index.upsert(&chunk.id, vector, metadata)?;
        written += 1;
    }
    Ok((written, 0))
}

/// Rebuild the in-memory index from persisted vectors.
pub async fn load_index(pool: &SqlitePool, dims: usize) -> Result<EmbeddingIndex> {
    let index = EmbeddingIndex::new(dims);
    for (chunk_id, vector, metadata) in store::load_vectors(pool).await? {
        if vector.len() != dims {
            warn!(
                chunk_id = %chunk_id,
                "skipping persisted vector with stale dims"
            );
            continue;
        }
        index.upsert(&chunk_id, vector, metadata)?;
    }
    Ok(index)
}

fn normalize_path(path: &Path) -> Result<Document> {
    let text = extract_file(path).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    if text.trim().is_empty() {
        bail!("document is empty");
    }

    let source_uri = format!("file://{}", path.display());
    let title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string());

    Ok(Document {
        id: document_id(&source_uri),
        source_uri,
        title,
        raw_text: text,
    })
}

/// Resolve a bare topic into documents: scrape remote articles first,
/// then fall back to a minimal topic seed. A failed or empty scrape is a
/// recoverable warning, never a batch error.
async fn topic_documents(
    config: &Config,
    topic_source: &dyn TopicSource,
    topic: &str,
    report: &mut IngestionReport,
) -> Vec<Document> {
    if config.ingest.scrape_articles == 0 {
        info!(topic = %topic, "scrape disabled; seeding from topic");
        return vec![topic_seed_document(topic)];
    }

    info!(topic = %topic, "no local material; scraping topic sources");
    match topic_source
        .fetch(topic, config.ingest.scrape_articles)
        .await
    {
        Ok(articles) if !articles.is_empty() => {
            articles.iter().map(scraped_document).collect()
        }
        Ok(_) => {
            let msg = format!(
                "scrape for \"{}\" returned no articles; seeding from topic text",
                topic
            );
            warn!("{}", msg);
            report.warnings.push(msg);
            vec![topic_seed_document(topic)]
        }
        Err(e) => {
            let msg = format!(
                "scrape for \"{}\" failed ({}); seeding from topic text",
                topic, e
            );
            warn!("{}", msg);
            report.warnings.push(msg);
            vec![topic_seed_document(topic)]
        }
    }
}

fn scraped_document(article: &ScrapedArticle) -> Document {
    Document {
        id: document_id(&article.url),
        source_uri: article.url.clone(),
        title: Some(article.title.clone()),
        raw_text: article.text.clone(),
    }
}

fn topic_seed_document(topic: &str) -> Document {
    let source_uri = format!("topic://{}", topic.replace(' ', "-"));
    Document {
        id: document_id(&source_uri),
        source_uri,
        title: Some(topic.to_string()),
        raw_text: topic.to_string(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id_stable() {
        assert_eq!(
            document_id("file:///notes/a.md"),
            document_id("file:///notes/a.md")
        );
        assert_ne!(
            document_id("file:///notes/a.md"),
            document_id("file:///notes/b.md")
        );
        assert_eq!(document_id("x").len(), 32);
    }

    #[test]
    fn test_topic_seed_document_deterministic() {
        let a = topic_seed_document("gradient descent");
        let b = topic_seed_document("gradient descent");
        assert_eq!(a.id, b.id);
        assert_eq!(a.source_uri, "topic://gradient-descent");
    }

    #[test]
    fn test_scraped_document_keeps_provenance() {
        let article = ScrapedArticle {
            title: "Gravity".to_string(),
            url: "https://en.wikipedia.org/wiki/Gravity".to_string(),
            text: "Gravity is a fundamental interaction.".to_string(),
        };
        let doc = scraped_document(&article);
        assert_eq!(doc.source_uri, article.url);
        assert_eq!(doc.title.as_deref(), Some("Gravity"));
        assert_eq!(doc.id, document_id(&article.url));
    }
}
