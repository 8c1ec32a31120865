//! Retrieval-augmented question answering.
//!
//! One query runs through a fixed state machine:
//!
//! ```text
//! RETRIEVE ─┬─ empty ──────────────────────────────▶ DONE (canned answer, low)
//!           └─ documents ─▶ GENERATE ─┬─ ok ─▶ SCORE ▶ DONE
//!                                     └─ error ──────▶ DONE (error answer, low)
//! ```
//!
//! Nothing in this path retries, and every branch yields a [`RagResponse`].
//! Only an empty question and an unreadable index are returned as errors.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{IndexError, QueryError};
use crate::generation::{GenerationRequest, SharedGenerator};
use crate::index::KnowledgeIndex;
use crate::models::{truncate_chars, Confidence, IndexedDocument, RagResponse, SourceRef};

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based on provided context. Always cite your sources.";

/// Answer returned when retrieval finds nothing.
pub const NO_RESULTS_ANSWER: &str =
    "I couldn't find relevant information to answer this question.";

/// Answer used in batch output for a question that was rejected as empty.
pub const EMPTY_QUESTION_ANSWER: &str = "Question is empty; nothing to answer.";

pub struct QueryEngine {
    index: Arc<KnowledgeIndex>,
    generator: SharedGenerator,
    temperature: f32,
    max_tokens: u32,
    preview_chars: usize,
}

impl QueryEngine {
    pub fn new(index: Arc<KnowledgeIndex>, generator: SharedGenerator) -> Self {
        Self {
            index,
            generator,
            temperature: 0.3,
            max_tokens: 500,
            preview_chars: 150,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    /// Answer `question` from the top `k` indexed summaries.
    ///
    /// # Errors
    ///
    /// [`QueryError::EmptyQuestion`] for a blank question (no remote calls are
    /// made) and [`QueryError::Index`] when the index storage cannot be read.
    pub async fn answer(&self, question: &str, k: usize) -> Result<RagResponse, QueryError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuestion);
        }

        let documents = match self.index.query(question, k, None).await {
            Ok(documents) => documents,
            Err(IndexError::Storage(e)) => return Err(QueryError::Index(e)),
            Err(IndexError::Embedding(e)) => {
                let reason = format!("{:#}", e);
                warn!(error = %reason, "query embedding failed");
                return Ok(RagResponse {
                    answer: format!("Error retrieving context: {}", reason),
                    sources: Vec::new(),
                    confidence: Confidence::Low,
                });
            }
        };

        if documents.is_empty() {
            info!("no documents retrieved");
            return Ok(RagResponse {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: Confidence::Low,
            });
        }

        let sources = self.sources(&documents);
        let prompt = build_prompt(question, &build_context(&documents));
        let request = GenerationRequest::new(prompt)
            .with_system(SYSTEM_PROMPT)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        match self.generator.generate(&request).await {
            Ok(answer) => {
                let confidence = assess_confidence(&answer);
                info!(
                    retrieved = documents.len(),
                    confidence = %confidence,
                    "answer generated"
                );
                Ok(RagResponse {
                    answer,
                    sources,
                    confidence,
                })
            }
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                Ok(RagResponse {
                    answer: format!("Error generating response: {}", e),
                    sources,
                    confidence: Confidence::Low,
                })
            }
        }
    }

    /// Answer each question in order, one response per question.
    ///
    /// A blank question yields a low-confidence response with
    /// [`EMPTY_QUESTION_ANSWER`] so the output stays aligned with the input.
    /// An index storage failure stops the batch.
    pub async fn batch_answer(
        &self,
        questions: &[String],
        k: usize,
    ) -> Result<Vec<RagResponse>, QueryError> {
        let mut responses = Vec::with_capacity(questions.len());
        for question in questions {
            let response = match self.answer(question, k).await {
                Ok(response) => response,
                Err(QueryError::EmptyQuestion) => RagResponse {
                    answer: EMPTY_QUESTION_ANSWER.to_string(),
                    sources: Vec::new(),
                    confidence: Confidence::Low,
                },
                Err(e) => return Err(e),
            };
            responses.push(response);
        }
        Ok(responses)
    }

    fn sources(&self, documents: &[IndexedDocument]) -> Vec<SourceRef> {
        documents
            .iter()
            .map(|doc| SourceRef {
                element_id: doc.metadata.element_id.clone(),
                element_type: doc.metadata.element_type,
                page: doc.metadata.page,
                content_preview: truncate_chars(&doc.content, self.preview_chars),
            })
            .collect()
    }
}

/// Render retrieved documents as numbered context blocks, in retrieval order.
pub fn build_context(documents: &[IndexedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "[Source {}] (Type: {}, Page: {})\n{}\n",
                i + 1,
                doc.metadata.element_type,
                doc.metadata.page,
                doc.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a helpful AI assistant answering questions based on provided context from a document.\n\
         \n\
         Context:\n\
         {context}\n\
         \n\
         Question: {question}\n\
         \n\
         Instructions:\n\
         1. Answer the question based ONLY on the provided context\n\
         2. Be specific and cite which sources you're using (e.g., \"According to Source 1...\")\n\
         3. If the context doesn't contain enough information, say so\n\
         4. Keep your answer clear and concise\n\
         \n\
         Answer:"
    )
}

/// Length and citation heuristic. Not a calibrated probability.
///
/// - `high`: mentions "source" (any case) and is longer than 100 characters
/// - `medium`: longer than 50 characters
/// - `low`: anything else
pub fn assess_confidence(answer: &str) -> Confidence {
    let len = answer.chars().count();
    if answer.to_lowercase().contains("source") && len > 100 {
        Confidence::High
    } else if len > 50 {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}

/// Human-readable rendering used by the CLI.
pub fn format_response(response: &RagResponse) -> String {
    let rule = "=".repeat(80);
    let mut out = format!("\n{}\n", rule);
    out.push_str(&format!("ANSWER:\n{}\n\n", response.answer));
    out.push_str(&format!(
        "CONFIDENCE: {}\n\n",
        response.confidence.as_str().to_uppercase()
    ));
    out.push_str(&format!("SOURCES ({}):\n", response.sources.len()));
    for (i, source) in response.sources.iter().enumerate() {
        out.push_str(&format!(
            "\n  [{}] {} (Page {})\n",
            i + 1,
            source.element_type.as_str().to_uppercase(),
            source.page
        ));
        out.push_str(&format!("      ID: {}\n", source.element_id));
        out.push_str(&format!("      Preview: {}...\n", source.content_preview));
    }
    out.push_str(&format!("{}\n", rule));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, ElementType};

    fn doc(element_id: &str, element_type: ElementType, page: u32, content: &str) -> IndexedDocument {
        IndexedDocument {
            id: format!("id-{}", element_id),
            content: content.to_string(),
            metadata: DocumentMetadata {
                element_id: element_id.to_string(),
                element_type,
                page,
                original_text: None,
                image_path: None,
            },
        }
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(assess_confidence(&"x".repeat(30)), Confidence::Low);
        assert_eq!(assess_confidence(&"source ".repeat(4)), Confidence::Low);
        assert_eq!(assess_confidence(&"x".repeat(51)), Confidence::Medium);
        assert_eq!(assess_confidence(&"x".repeat(150)), Confidence::Medium);

        let cited = format!("According to SOURCE 2, {}", "y".repeat(127));
        assert_eq!(cited.chars().count(), 150);
        assert_eq!(assess_confidence(&cited), Confidence::High);

        // exactly 100 characters is not enough
        let edge = format!("Source {}", "z".repeat(93));
        assert_eq!(edge.chars().count(), 100);
        assert_eq!(assess_confidence(&edge), Confidence::Medium);
    }

    #[test]
    fn context_lists_rank_type_and_page() {
        let docs = vec![
            doc("text_0", ElementType::Text, 3, "The model uses self-attention."),
            doc("table_0", ElementType::Table, 5, "Table 2 reports BLEU scores."),
        ];
        let context = build_context(&docs);
        assert_eq!(
            context,
            "[Source 1] (Type: text, Page: 3)\nThe model uses self-attention.\n\n\
             [Source 2] (Type: table, Page: 5)\nTable 2 reports BLEU scores.\n"
        );

        let prompt = build_prompt("What?", &context);
        assert!(prompt.contains("Question: What?"));
        assert!(prompt.contains("ONLY on the provided context"));
        assert!(prompt.contains("According to Source 1"));
        assert!(prompt.ends_with("Answer:"));
    }

    #[tokio::test]
    async fn unreachable_embedder_answers_after_one_attempt() {
        use crate::config::EmbeddingConfig;
        use crate::embedding::{test_server::serve, OllamaProvider};
        use crate::generation::MockGenerator;
        use crate::store::memory::InMemoryBackend;

        let server = serve("503 Service Unavailable", "down").await;
        let embedder = OllamaProvider::new(&EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            url: Some(server.url.clone()),
            max_retries: 5,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        let index = KnowledgeIndex::new("t", Box::new(embedder), Box::new(InMemoryBackend::new()));
        let generator = Arc::new(MockGenerator::with_text("unused"));
        let engine = QueryEngine::new(Arc::new(index), generator.clone());

        let started = std::time::Instant::now();
        let response = engine.answer("What?", 5).await.unwrap();

        assert!(response.answer.starts_with("Error retrieving context"));
        assert!(response.answer.contains("503"));
        assert!(response.sources.is_empty());
        assert_eq!(response.confidence, Confidence::Low);
        assert_eq!(server.hits(), 1);
        assert_eq!(generator.request_count(), 0);
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn format_response_layout() {
        let response = RagResponse {
            answer: "It uses attention.".into(),
            sources: vec![SourceRef {
                element_id: "text_0".into(),
                element_type: ElementType::Text,
                page: 3,
                content_preview: "The model uses".into(),
            }],
            confidence: Confidence::Medium,
        };
        let out = format_response(&response);
        assert!(out.contains("ANSWER:\nIt uses attention.\n"));
        assert!(out.contains("CONFIDENCE: MEDIUM"));
        assert!(out.contains("SOURCES (1):"));
        assert!(out.contains("[1] TEXT (Page 3)"));
        assert!(out.contains("ID: text_0"));
        assert!(out.contains("Preview: The model uses..."));
    }
}
