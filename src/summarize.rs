//! Per-element summarization.
//!
//! Each [`ElementType`] maps to a [`Strategy`]: the prompt sent to the
//! generation service and the fallback built when that call fails.
//!
//! | Type | Service | Fallback |
//! |------|---------|----------|
//! | text | text model | first `fallback_chars` characters of the text |
//! | table | text model | first `fallback_chars` characters of the table text |
//! | image | vision model | pixel dimensions plus a truncated error message |
//!
//! [`ElementSummarizer::summarize`] never fails and never returns an empty
//! string. The raw service result is available from
//! [`ElementSummarizer::try_summarize`].

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::generation::{GenerationRequest, ImageInput, SharedGenerator};
use crate::models::{truncate_chars, ContentElement, ElementContent, ElementType};

const TEXT_SYSTEM: &str = "You are a helpful assistant that creates concise, accurate summaries.";
const TABLE_SYSTEM: &str =
    "You are a helpful assistant that analyzes tables and extracts key insights.";
const IMAGE_INSTRUCTION: &str = "Describe this image in detail. Focus on important visual elements, diagrams, charts, or any text present. Be specific and informative about what you see.";

/// Characters of the error message kept in an image fallback.
const IMAGE_ERROR_CHARS: usize = 50;

/// Prompt and sizing for one element type.
struct Strategy {
    system: Option<&'static str>,
    max_tokens: u32,
    prompt: fn(&str) -> String,
}

fn text_prompt(text: &str) -> String {
    format!(
        "Summarize the following text concisely while preserving key information and context:\n\n\
         Text: {}\n\n\
         Provide a clear, informative summary in 2-3 sentences.",
        text
    )
}

fn table_prompt(table: &str) -> String {
    format!(
        "Analyze and summarize the following table, highlighting key data points and relationships:\n\n\
         Table:\n{}\n\n\
         Provide a summary that captures the table's structure and main findings.",
        table
    )
}

fn image_prompt(_: &str) -> String {
    IMAGE_INSTRUCTION.to_string()
}

fn strategy(element_type: ElementType) -> Strategy {
    match element_type {
        ElementType::Text => Strategy {
            system: Some(TEXT_SYSTEM),
            max_tokens: 200,
            prompt: text_prompt,
        },
        ElementType::Table => Strategy {
            system: Some(TABLE_SYSTEM),
            max_tokens: 250,
            prompt: table_prompt,
        },
        ElementType::Image => Strategy {
            system: None,
            max_tokens: 500,
            prompt: image_prompt,
        },
    }
}

/// Anything that can turn an element into a summary string.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize one element. Always returns a non-empty string.
    async fn summarize(&self, element: &ContentElement) -> String;
}

/// Summarizer backed by a text model and a vision model.
pub struct ElementSummarizer {
    text: SharedGenerator,
    vision: SharedGenerator,
    temperature: f32,
    fallback_chars: usize,
}

impl ElementSummarizer {
    pub fn new(text: SharedGenerator, vision: SharedGenerator) -> Self {
        Self {
            text,
            vision,
            temperature: 0.3,
            fallback_chars: 200,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_fallback_chars(mut self, chars: usize) -> Self {
        self.fallback_chars = chars.max(1);
        self
    }

    /// Call the generation service for `element` without any fallback.
    pub async fn try_summarize(&self, element: &ContentElement) -> Result<String, ServiceError> {
        let strategy = strategy(element.element_type());
        let (payload, image) = match &element.content {
            ElementContent::Text { text } | ElementContent::Table { text, .. } => {
                (text.as_str(), None)
            }
            ElementContent::Image { path } => {
                let bytes = tokio::fs::read(path).await?;
                ("", Some(ImageInput::from_bytes(bytes)))
            }
        };

        let mut request = GenerationRequest::new((strategy.prompt)(payload))
            .with_temperature(self.temperature)
            .with_max_tokens(strategy.max_tokens);
        if let Some(system) = strategy.system {
            request = request.with_system(system);
        }

        let service = match image {
            Some(image) => {
                request = request.with_image(image);
                &self.vision
            }
            None => &self.text,
        };
        service.generate(&request).await
    }

    /// Deterministic replacement summary used when the service call fails.
    pub fn fallback(&self, element: &ContentElement, error: &ServiceError) -> String {
        match &element.content {
            ElementContent::Text { text } | ElementContent::Table { text, .. } => {
                if text.trim().is_empty() {
                    format!(
                        "Empty {} element {} (page {})",
                        element.element_type(),
                        element.element_id,
                        element.page
                    )
                } else {
                    truncate_chars(text, self.fallback_chars)
                }
            }
            ElementContent::Image { path } => image_fallback(&element.element_id, path, error),
        }
    }
}

fn image_fallback(element_id: &str, path: &Path, error: &ServiceError) -> String {
    match image::image_dimensions(path) {
        Ok((width, height)) => format!(
            "Image {}: {}x{} pixels. (Note: AI description failed: {})",
            element_id,
            width,
            height,
            truncate_chars(&error.to_string(), IMAGE_ERROR_CHARS)
        ),
        Err(_) => format!("Image at {} (Description unavailable)", path.display()),
    }
}

#[async_trait]
impl Summarizer for ElementSummarizer {
    async fn summarize(&self, element: &ContentElement) -> String {
        match self.try_summarize(element).await {
            Ok(summary) => {
                debug!(element_id = %element.element_id, "summarized");
                summary
            }
            Err(e) => {
                warn!(
                    element_id = %element.element_id,
                    element_type = %element.element_type(),
                    error = %e,
                    "summary generation failed, using fallback"
                );
                self.fallback(element, &e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockGenerator;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn summarizer(text: Arc<MockGenerator>, vision: Arc<MockGenerator>) -> ElementSummarizer {
        ElementSummarizer::new(text, vision)
    }

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        image::RgbImage::new(w, h).save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn text_uses_text_model_with_instruction() {
        let text = Arc::new(MockGenerator::with_text("Short summary."));
        let vision = Arc::new(MockGenerator::with_text("unused"));
        let s = summarizer(text.clone(), vision.clone());

        let out = s
            .summarize(&ContentElement::text("t0", 1, "The Transformer relies on attention."))
            .await;
        assert_eq!(out, "Short summary.");
        assert_eq!(vision.request_count(), 0);

        let req = &text.requests()[0];
        assert!(req.prompt.contains("The Transformer relies on attention."));
        assert!(req.prompt.contains("2-3 sentences"));
        assert_eq!(req.system.as_deref(), Some(TEXT_SYSTEM));
        assert_eq!(req.max_tokens, 200);
    }

    #[tokio::test]
    async fn table_prompt_emphasizes_structure() {
        let text = Arc::new(MockGenerator::with_text("Table summary."));
        let s = summarizer(text.clone(), Arc::new(MockGenerator::with_text("x")));
        s.summarize(&ContentElement::table("tb0", 5, "Model | BLEU\nBase | 27.3"))
            .await;
        let req = &text.requests()[0];
        assert!(req.prompt.contains("structure"));
        assert!(req.prompt.contains("Base | 27.3"));
        assert_eq!(req.max_tokens, 250);
    }

    #[tokio::test]
    async fn text_fallback_is_first_200_chars() {
        let s = summarizer(
            Arc::new(MockGenerator::failing("quota exceeded")),
            Arc::new(MockGenerator::failing("quota exceeded")),
        );
        let long = "a".repeat(300);
        let out = s.summarize(&ContentElement::text("t0", 1, long)).await;
        assert_eq!(out, "a".repeat(200));

        let out = s.summarize(&ContentElement::table("tb", 1, "x | y")).await;
        assert_eq!(out, "x | y");
    }

    #[tokio::test]
    async fn text_fallback_keeps_leading_whitespace() {
        let s = summarizer(
            Arc::new(MockGenerator::failing("timeout")),
            Arc::new(MockGenerator::failing("timeout")),
        );
        let text = format!("\n  {}", "b".repeat(250));
        let out = s.summarize(&ContentElement::text("t1", 2, text.clone())).await;
        assert_eq!(out.chars().count(), 200);
        assert_eq!(out, text.chars().take(200).collect::<String>());
        assert!(out.starts_with("\n  b"));
    }

    #[tokio::test]
    async fn empty_text_fallback_is_not_empty() {
        let s = summarizer(
            Arc::new(MockGenerator::failing("down")),
            Arc::new(MockGenerator::failing("down")),
        );
        let out = s.summarize(&ContentElement::text("t9", 4, "   ")).await;
        assert!(!out.is_empty());
        assert!(out.contains("t9"));
    }

    #[tokio::test]
    async fn image_goes_to_vision_model() {
        let tmp = TempDir::new().unwrap();
        let path = write_png(tmp.path(), "fig.png", 64, 48);
        let text = Arc::new(MockGenerator::with_text("unused"));
        let vision = Arc::new(MockGenerator::with_text("A diagram of the encoder."));
        let s = summarizer(text.clone(), vision.clone());

        let out = s.summarize(&ContentElement::image("image_0", 3, &path)).await;
        assert_eq!(out, "A diagram of the encoder.");
        assert_eq!(text.request_count(), 0);

        let req = &vision.requests()[0];
        let image = req.image.as_ref().unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(req.prompt, IMAGE_INSTRUCTION);
    }

    #[tokio::test]
    async fn image_fallback_reports_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = write_png(tmp.path(), "fig.png", 120, 80);
        let s = summarizer(
            Arc::new(MockGenerator::failing("x")),
            Arc::new(MockGenerator::failing(
                "the vision service refused this request because the quota was exhausted",
            )),
        );
        let out = s.summarize(&ContentElement::image("image_2", 1, &path)).await;
        assert!(out.starts_with("Image image_2: 120x80 pixels."));
        assert!(out.contains("AI description failed"));
        let note = out.split("failed: ").nth(1).unwrap().trim_end_matches(')');
        assert_eq!(note.chars().count(), IMAGE_ERROR_CHARS);
    }

    #[tokio::test]
    async fn missing_image_still_yields_description() {
        let vision = Arc::new(MockGenerator::with_text("never called"));
        let s = summarizer(Arc::new(MockGenerator::failing("x")), vision.clone());
        let out = s
            .summarize(&ContentElement::image("image_3", 1, "/nonexistent/fig.png"))
            .await;
        assert_eq!(out, "Image at /nonexistent/fig.png (Description unavailable)");
        assert_eq!(vision.request_count(), 0);
    }
}
