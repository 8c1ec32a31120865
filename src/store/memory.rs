//! In-memory [`VectorBackend`] implementation for tests and one-shot runs.
//!
//! Uses a `Vec` behind `std::sync::RwLock` for thread safety. Vector search
//! is brute-force cosine similarity over all stored vectors.

use std::sync::{PoisonError, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::{ElementType, IndexedDocument};

use super::{cosine_similarity, rank, SearchHit, VectorBackend};

struct StoredVector {
    document: IndexedDocument,
    vector: Vec<f32>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryBackend {
    vectors: RwLock<Vec<StoredVector>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for InMemoryBackend {
    async fn add(&self, documents: &[IndexedDocument], vectors: &[Vec<f32>]) -> Result<()> {
        if documents.len() != vectors.len() {
            bail!(
                "{} documents but {} vectors",
                documents.len(),
                vectors.len()
            );
        }
        let mut stored = self.vectors.write().unwrap_or_else(PoisonError::into_inner);
        for (document, vector) in documents.iter().zip(vectors) {
            stored.push(StoredVector {
                document: document.clone(),
                vector: vector.clone(),
            });
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<ElementType>,
    ) -> Result<Vec<SearchHit>> {
        let stored = self.vectors.read().unwrap_or_else(PoisonError::into_inner);
        let hits = stored
            .iter()
            .filter(|sv| filter.map_or(true, |t| sv.document.metadata.element_type == t))
            .map(|sv| SearchHit {
                document: sv.document.clone(),
                score: cosine_similarity(query_vec, &sv.vector),
            })
            .collect();
        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .vectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len())
    }

    async fn clear(&self) -> Result<()> {
        self.vectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
