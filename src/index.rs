//! Knowledge index: summaries in, ranked documents out.
//!
//! Wraps one [`EmbeddingProvider`] and one [`VectorBackend`]. The provider is
//! fixed for the lifetime of the index; the SQLite backend refuses to open a
//! collection that was built with a different provider.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::IndexError;
use crate::models::{DocumentMetadata, ElementType, IndexedDocument, SummarizedElement, SummarySet};
use crate::store::{SearchHit, VectorBackend};

/// Read-only introspection result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub name: String,
}

pub struct KnowledgeIndex {
    name: String,
    embedder: Box<dyn EmbeddingProvider>,
    backend: Box<dyn VectorBackend>,
}

impl KnowledgeIndex {
    pub fn new(
        name: impl Into<String>,
        embedder: Box<dyn EmbeddingProvider>,
        backend: Box<dyn VectorBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            embedder,
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    /// Embed and store every summary in `summaries`, text first, then tables,
    /// then images. Returns the number of documents added.
    ///
    /// Each call assigns fresh record ids; ingesting the same summaries twice
    /// stores them twice.
    pub async fn ingest(&self, summaries: &SummarySet) -> Result<usize> {
        let documents: Vec<IndexedDocument> = summaries.iter().map(to_document).collect();
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .context("Failed to embed summaries")?;
        if vectors.len() != documents.len() {
            anyhow::bail!(
                "Embedding provider returned {} vectors for {} summaries",
                vectors.len(),
                documents.len()
            );
        }

        self.backend
            .add(&documents, &vectors)
            .await
            .context("Failed to write to knowledge index")?;

        info!(
            index = %self.name,
            documents = documents.len(),
            "ingested summaries"
        );
        Ok(documents.len())
    }

    /// Top `k` documents for `text`, most similar first.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        filter: Option<ElementType>,
    ) -> Result<Vec<IndexedDocument>, IndexError> {
        Ok(self
            .query_scored(text, k, filter)
            .await?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Like [`query`](Self::query) but keeps the similarity scores.
    pub async fn query_scored(
        &self,
        text: &str,
        k: usize,
        filter: Option<ElementType>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self
            .embedder
            .embed_query(text)
            .await
            .map_err(IndexError::Embedding)?;
        let hits = self
            .backend
            .search(&query_vec, k, filter)
            .await
            .map_err(IndexError::Storage)?;
        debug!(k, hits = hits.len(), filter = ?filter, "index query");
        Ok(hits)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            total_documents: self.backend.count().await?,
            name: self.name.clone(),
        })
    }

    pub async fn is_populated(&self) -> Result<bool> {
        Ok(self.backend.count().await? > 0)
    }

    /// Remove every document from the index.
    pub async fn reset(&self) -> Result<()> {
        self.backend.clear().await
    }
}

fn to_document(summary: &SummarizedElement) -> IndexedDocument {
    IndexedDocument {
        id: uuid::Uuid::new_v4().to_string(),
        content: summary.summary.clone(),
        metadata: DocumentMetadata {
            element_id: summary.element_id.clone(),
            element_type: summary.element_type,
            page: summary.page,
            original_text: summary.original_text.clone(),
            image_path: summary
                .image_path
                .as_ref()
                .map(|p| p.display().to_string()),
        },
    }
}
