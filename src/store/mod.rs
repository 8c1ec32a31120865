//! Vector index backends.
//!
//! The [`VectorBackend`] trait is the nearest-neighbor service behind the
//! [`KnowledgeIndex`](crate::index::KnowledgeIndex): it stores documents with
//! their vectors and ranks them against a query vector. Two backends ship:
//!
//! - [`memory::InMemoryBackend`]: process-local, for tests and one-shot runs.
//! - [`sqlite::SqliteBackend`]: durable, one SQLite file per deployment.
//!
//! Both rank by cosine similarity, highest first, with ties kept in
//! insertion order.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::config::IndexConfig;
use crate::models::{ElementType, IndexedDocument};

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: IndexedDocument,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Abstract nearest-neighbor store.
///
/// Implementations must be `Send + Sync` to work with async runtimes.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Append documents with their vectors. `vectors[i]` belongs to
    /// `documents[i]`. No deduplication is performed.
    async fn add(&self, documents: &[IndexedDocument], vectors: &[Vec<f32>]) -> Result<()>;

    /// Top `k` documents by similarity, optionally restricted to one element type.
    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<ElementType>,
    ) -> Result<Vec<SearchHit>>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize>;

    /// Remove every stored document.
    async fn clear(&self) -> Result<()>;
}

/// Rank scored hits by decreasing similarity. The sort is stable, so hits
/// that arrive in insertion order keep it on ties.
pub(crate) fn rank(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

/// Cosine of the angle between `a` and `b`.
///
/// Zero when the lengths differ or either vector has no magnitude, so a
/// blank query never outranks a real match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let magnitude = (aa * bb).sqrt();
    if magnitude <= f32::EPSILON {
        0.0
    } else {
        dot / magnitude
    }
}

/// Open the backend named by `config.backend`.
///
/// `embedding_identity` is recorded by persistent backends; opening an index
/// built with a different embedding function fails.
pub async fn open_backend(
    config: &IndexConfig,
    embedding_identity: &str,
) -> Result<Box<dyn VectorBackend>> {
    match config.backend.as_str() {
        "memory" => Ok(Box::new(memory::InMemoryBackend::new())),
        "sqlite" => Ok(Box::new(
            sqlite::SqliteBackend::open(&config.path, &config.name, embedding_identity).await?,
        )),
        other => anyhow::bail!("Unknown index backend: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentMetadata;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            document: IndexedDocument {
                id: id.to_string(),
                content: String::new(),
                metadata: DocumentMetadata {
                    element_id: id.to_string(),
                    element_type: ElementType::Text,
                    page: 1,
                    original_text: None,
                    image_path: None,
                },
            },
            score,
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.document.id.as_str()).collect()
    }

    #[test]
    fn rank_orders_by_score_and_keeps_ties_stable() {
        let hits = vec![hit("a", 0.2), hit("b", 0.9), hit("c", 0.2), hit("d", 0.5)];
        assert_eq!(ids(&rank(hits, 3)), vec!["b", "d", "a"]);
    }

    #[test]
    fn rank_tolerates_nan_scores() {
        let hits = vec![hit("a", 0.3), hit("nan", f32::NAN), hit("b", 0.7), hit("c", -0.1)];
        let ranked = rank(hits, 4);
        assert_eq!(ranked.len(), 4);
        let finite: Vec<&str> = ranked
            .iter()
            .filter(|h| !h.score.is_nan())
            .map(|h| h.document.id.as_str())
            .collect();
        assert_eq!(finite, vec!["b", "a", "c"]);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert!((cosine_similarity(&[3.0, 4.0], &[6.0, 8.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
