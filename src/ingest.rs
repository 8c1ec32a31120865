//! Ingestion driver.
//!
//! Wires configuration into service handles and runs the document flow:
//! manifest → orchestrator (cache-aware) → knowledge index. Every service
//! handle is built once here and injected into the components.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::cache::{FileCache, SummaryCache};
use crate::config::Config;
use crate::elements::{load_manifest, ElementCounts};
use crate::embedding::create_provider;
use crate::generation::{create_text_generator, create_vision_generator};
use crate::index::KnowledgeIndex;
use crate::models::ContentElement;
use crate::orchestrator::SummarizationOrchestrator;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::rag::QueryEngine;
use crate::store::{open_backend, sqlite::SqliteBackend};
use crate::summarize::ElementSummarizer;

/// Outcome of one ingest run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub fingerprint: String,
    pub from_cache: bool,
    pub counts: ElementCounts,
    /// Documents added to the index by this run.
    pub ingested: usize,
    pub total_documents: usize,
}

/// Open the knowledge index described by `[index]` and `[embedding]`.
pub async fn build_index(config: &Config) -> Result<KnowledgeIndex> {
    let embedder = create_provider(&config.embedding)?;
    let backend = open_backend(&config.index, &embedder.identity()).await?;
    Ok(KnowledgeIndex::new(&config.index.name, embedder, backend))
}

pub fn build_summarizer(config: &Config) -> Result<ElementSummarizer> {
    let text = create_text_generator(&config.generation)?;
    let vision = create_vision_generator(&config.vision)?;
    Ok(ElementSummarizer::new(text, vision)
        .with_temperature(config.generation.temperature)
        .with_fallback_chars(config.summarization.fallback_chars))
}

pub fn build_orchestrator(config: &Config) -> Result<SummarizationOrchestrator> {
    let summarizer = build_summarizer(config)?;
    let cache: Box<dyn SummaryCache> = Box::new(FileCache::new(config.cache_file()));
    Ok(SummarizationOrchestrator::new(Arc::new(summarizer), cache)
        .with_concurrency(config.summarization.concurrency)
        .with_original_chars(config.summarization.original_chars))
}

/// Build a query engine over an already opened index.
pub fn build_engine(config: &Config, index: Arc<KnowledgeIndex>) -> Result<QueryEngine> {
    let generator = create_text_generator(&config.generation)?;
    Ok(QueryEngine::new(index, generator)
        .with_temperature(config.generation.temperature)
        .with_max_tokens(config.retrieval.max_answer_tokens)
        .with_preview_chars(config.retrieval.preview_chars))
}

/// Summarize and index `document_path` using the parser output at `elements_path`.
pub async fn run_ingest(
    config: &Config,
    document_path: &Path,
    elements_path: &Path,
    reporter: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let document = std::fs::read(document_path)
        .with_context(|| format!("Failed to read document: {}", document_path.display()))?;
    let elements = load_manifest(elements_path)?;

    let orchestrator = build_orchestrator(config)?;
    let index = build_index(config).await?;

    ingest_elements(&orchestrator, &index, &document, &elements, reporter).await
}

/// Run the orchestrator, then index the summaries unless the cache was hit
/// and the index already holds documents.
pub async fn ingest_elements(
    orchestrator: &SummarizationOrchestrator,
    index: &KnowledgeIndex,
    document: &[u8],
    elements: &[ContentElement],
    reporter: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let run = orchestrator
        .summarize_all(document, elements, reporter)
        .await?;

    let populated = index.is_populated().await?;
    let ingested = if run.from_cache && populated {
        info!("cache hit and index populated, skipping indexing");
        0
    } else {
        reporter.report(ProgressEvent::Indexing {
            documents: run.summaries.len() as u64,
        });
        index.ingest(&run.summaries).await?
    };

    let total_documents = index.stats().await?.total_documents;
    reporter.report(ProgressEvent::Done);

    Ok(IngestReport {
        fingerprint: run.fingerprint,
        from_cache: run.from_cache,
        counts: ElementCounts::of(elements),
        ingested,
        total_documents,
    })
}

/// Delete the summary cache record. A no-op when none exists.
pub fn clear_cache(config: &Config) -> Result<()> {
    FileCache::new(config.cache_file()).invalidate()
}

/// Drop every indexed document and the recorded embedding identity.
/// Returns the number of documents removed.
pub async fn reset_index(config: &Config) -> Result<u64> {
    match config.index.backend.as_str() {
        "sqlite" => SqliteBackend::reset(&config.index.path, &config.index.name).await,
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::embedding::HashEmbedder;
    use crate::generation::MockGenerator;
    use crate::progress::NoProgress;
    use crate::store::memory::InMemoryBackend;

    fn fixtures() -> (SummarizationOrchestrator, KnowledgeIndex, Arc<MockGenerator>) {
        let generator = Arc::new(MockGenerator::with_text("a summary"));
        let summarizer = ElementSummarizer::new(generator.clone(), generator.clone());
        let orchestrator =
            SummarizationOrchestrator::new(Arc::new(summarizer), Box::new(InMemoryCache::new()));
        let index = KnowledgeIndex::new(
            "test",
            Box::new(HashEmbedder::new(64)),
            Box::new(InMemoryBackend::new()),
        );
        (orchestrator, index, generator)
    }

    fn elements() -> Vec<ContentElement> {
        vec![
            ContentElement::text("text_0", 1, "Intro."),
            ContentElement::table("table_0", 2, "a | b"),
        ]
    }

    #[tokio::test]
    async fn second_run_skips_summaries_and_indexing() {
        let (orch, index, generator) = fixtures();

        let first = ingest_elements(&orch, &index, b"doc", &elements(), &NoProgress)
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.ingested, 2);
        assert_eq!(first.total_documents, 2);
        assert_eq!(first.counts.total(), 2);

        let second = ingest_elements(&orch, &index, b"doc", &elements(), &NoProgress)
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(second.ingested, 0);
        assert_eq!(second.total_documents, 2);
        assert_eq!(generator.request_count(), 2);
    }

    #[tokio::test]
    async fn cache_hit_with_empty_index_reindexes() {
        let (orch, index, generator) = fixtures();
        ingest_elements(&orch, &index, b"doc", &elements(), &NoProgress)
            .await
            .unwrap();
        index.reset().await.unwrap();

        let report = ingest_elements(&orch, &index, b"doc", &elements(), &NoProgress)
            .await
            .unwrap();
        assert!(report.from_cache);
        assert_eq!(report.ingested, 2);
        assert_eq!(generator.request_count(), 2);
    }
}
