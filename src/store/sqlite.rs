//! SQLite-backed [`VectorBackend`] implementation.
//!
//! Schema:
//!
//! - `collections(name, embedding, created_at)` records which embedding
//!   function built each named collection.
//! - `documents(seq, id, collection, element_type, content, metadata_json, embedding)`
//!   holds summaries with their vectors as little-endian `f32` BLOBs.
//!
//! `seq` is an autoincrement key, so scanning in `seq` order is insertion
//! order and ties in the ranked output follow it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

use crate::models::{DocumentMetadata, ElementType, IndexedDocument};

use super::{cosine_similarity, rank, SearchHit, VectorBackend};

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Trailing bytes that do not fill a whole `f32` are ignored.
fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// SQLite implementation of the [`VectorBackend`] trait.
pub struct SqliteBackend {
    pool: SqlitePool,
    collection: String,
}

/// Open (creating if missing) the SQLite database at `path`.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open index: {}", path.display()))?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            name TEXT PRIMARY KEY,
            embedding TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            collection TEXT NOT NULL,
            element_type TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection, element_type)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl SqliteBackend {
    /// Open the collection `name` in the database at `path`.
    ///
    /// A new collection records `embedding_identity`. An existing one must
    /// have been built with the same identity.
    pub async fn open(path: &Path, name: &str, embedding_identity: &str) -> Result<Self> {
        let pool = connect(path).await?;
        run_migrations(&pool).await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT embedding FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&pool)
                .await?;

        match stored {
            Some(identity) if identity != embedding_identity => bail!(
                "Index '{}' was built with embedding '{}' but '{}' is configured. \
                 Run `mrag index reset` and ingest again.",
                name,
                identity,
                embedding_identity
            ),
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO collections (name, embedding, created_at) VALUES (?, ?, ?)",
                )
                .bind(name)
                .bind(embedding_identity)
                .bind(chrono::Utc::now().timestamp())
                .execute(&pool)
                .await?;
            }
        }

        Ok(Self {
            pool,
            collection: name.to_string(),
        })
    }

    /// Drop the collection and its documents without checking the recorded
    /// embedding identity.
    pub async fn reset(path: &Path, name: &str) -> Result<u64> {
        let pool = connect(path).await?;
        run_migrations(&pool).await?;

        let mut tx = pool.begin().await?;
        let removed = sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        pool.close().await;
        Ok(removed)
    }
}

#[async_trait]
impl VectorBackend for SqliteBackend {
    async fn add(&self, documents: &[IndexedDocument], vectors: &[Vec<f32>]) -> Result<()> {
        if documents.len() != vectors.len() {
            bail!(
                "{} documents but {} vectors",
                documents.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (document, vector) in documents.iter().zip(vectors) {
            let metadata_json = serde_json::to_string(&document.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO documents (id, collection, element_type, content, metadata_json, embedding)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&document.id)
            .bind(&self.collection)
            .bind(document.metadata.element_type.as_str())
            .bind(&document.content)
            .bind(&metadata_json)
            .bind(encode_vector(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<ElementType>,
    ) -> Result<Vec<SearchHit>> {
        let rows = match filter {
            Some(element_type) => {
                sqlx::query(
                    r#"
                    SELECT id, content, metadata_json, embedding
                    FROM documents
                    WHERE collection = ? AND element_type = ?
                    ORDER BY seq
                    "#,
                )
                .bind(&self.collection)
                .bind(element_type.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, content, metadata_json, embedding
                    FROM documents
                    WHERE collection = ?
                    ORDER BY seq
                    "#,
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
                .context("Corrupt document metadata in index")?;
            hits.push(SearchHit {
                document: IndexedDocument {
                    id: row.get("id"),
                    content: row.get("content"),
                    metadata,
                },
                score: cosine_similarity(query_vec, &decode_vector(&blob)),
            });
        }

        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
