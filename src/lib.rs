//! # Multimodal RAG
//!
//! Question answering over a single document whose content has been split
//! into text blocks, tables, and images by an external parser.
//!
//! Every element is summarized by a language or vision model, the summaries
//! are embedded into a vector index, and questions are answered from the
//! top-ranked summaries with per-source provenance.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────┐
//! │   Elements   │──▶│ Orchestrator  │──▶│ Summarizer │──▶ LLM / vision
//! │ (manifest)   │   │   + Cache     │   └────────────┘
//! └──────────────┘   └───────┬───────┘
//!                            ▼
//!                    ┌───────────────┐   ┌──────────────┐
//!                    │ KnowledgeIndex│◀──│ QueryEngine  │──▶ LLM
//!                    │ embed + store │   │  (ask/chat)  │
//!                    └───────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mrag ingest paper.pdf --elements paper.elements.json
//! mrag ask "What mechanism does the model use?"
//! mrag search "BLEU" --type table
//! mrag chat
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Service and query error types |
//! | [`elements`] | Parser manifest loading and validation |
//! | [`cache`] | Fingerprinted summary cache |
//! | [`generation`] | Text and vision generation clients |
//! | [`summarize`] | Per-element summaries with fallbacks |
//! | [`orchestrator`] | Cache-aware summarization of a whole document |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index backends (memory, SQLite) |
//! | [`index`] | Knowledge index over summaries |
//! | [`rag`] | Retrieval-augmented answering |
//! | [`progress`] | Progress reporting on stderr |
//! | [`ingest`] | Ingestion driver and service wiring |

pub mod cache;
pub mod config;
pub mod elements;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod rag;
pub mod store;
pub mod summarize;
