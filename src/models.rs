//! Core data models used throughout the pipeline.
//!
//! These types represent the parsed content elements, their summaries, the
//! documents stored in the knowledge index, and the structured answers that
//! flow out of the query engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The closed set of content kinds a parser can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Text,
    Table,
    Image,
}

impl ElementType {
    /// All element types, in the order summaries are grouped and ingested.
    pub const ALL: [ElementType; 3] = [ElementType::Text, ElementType::Table, ElementType::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Text => "text",
            ElementType::Table => "table",
            ElementType::Image => "image",
        }
    }

    /// Parse a type name as accepted on the command line and in metadata.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(ElementType::Text),
            "table" | "tables" => Some(ElementType::Table),
            "image" | "images" => Some(ElementType::Image),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-dependent payload of a [`ContentElement`].
///
/// Serialized with an internal `type` tag so a parser manifest reads as
/// `{"element_id": "t0", "page": 1, "type": "text", "text": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementContent {
    Text {
        text: String,
    },
    Table {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
    },
    Image {
        path: PathBuf,
    },
}

/// One atomic unit extracted from the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentElement {
    /// Unique across the whole element set, regardless of type.
    pub element_id: String,
    /// 1-based page number.
    pub page: u32,
    #[serde(flatten)]
    pub content: ElementContent,
}

impl ContentElement {
    pub fn text(element_id: impl Into<String>, page: u32, text: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            page,
            content: ElementContent::Text { text: text.into() },
        }
    }

    pub fn table(element_id: impl Into<String>, page: u32, text: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            page,
            content: ElementContent::Table {
                text: text.into(),
                html: None,
            },
        }
    }

    pub fn image(element_id: impl Into<String>, page: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            element_id: element_id.into(),
            page,
            content: ElementContent::Image { path: path.into() },
        }
    }

    pub fn element_type(&self) -> ElementType {
        match self.content {
            ElementContent::Text { .. } => ElementType::Text,
            ElementContent::Table { .. } => ElementType::Table,
            ElementContent::Image { .. } => ElementType::Image,
        }
    }
}

/// A content element paired with its generated summary.
///
/// Created once per element during orchestration and never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizedElement {
    pub element_id: String,
    pub element_type: ElementType,
    pub page: u32,
    pub summary: String,
    /// Truncated copy of the text payload (text and table elements).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    /// File reference of the image payload (image elements).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
}

impl SummarizedElement {
    /// Build the summarized form of `element`, keeping at most
    /// `original_chars` characters of its text payload.
    pub fn from_element(element: &ContentElement, summary: String, original_chars: usize) -> Self {
        let (original_text, image_path) = match &element.content {
            ElementContent::Text { text } | ElementContent::Table { text, .. } => {
                (Some(truncate_chars(text, original_chars)), None)
            }
            ElementContent::Image { path } => (None, Some(path.clone())),
        };
        Self {
            element_id: element.element_id.clone(),
            element_type: element.element_type(),
            page: element.page,
            summary,
            original_text,
            image_path,
        }
    }
}

/// Summaries grouped by element type, each group in input order.
///
/// This is also the persisted layout of a cache record:
/// `{"text": [...], "tables": [...], "images": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarySet {
    #[serde(default)]
    pub text: Vec<SummarizedElement>,
    #[serde(default)]
    pub tables: Vec<SummarizedElement>,
    #[serde(default)]
    pub images: Vec<SummarizedElement>,
}

impl SummarySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, element_type: ElementType) -> &[SummarizedElement] {
        match element_type {
            ElementType::Text => &self.text,
            ElementType::Table => &self.tables,
            ElementType::Image => &self.images,
        }
    }

    fn group_mut(&mut self, element_type: ElementType) -> &mut Vec<SummarizedElement> {
        match element_type {
            ElementType::Text => &mut self.text,
            ElementType::Table => &mut self.tables,
            ElementType::Image => &mut self.images,
        }
    }

    /// Append to the group matching the element's own type.
    pub fn push(&mut self, element: SummarizedElement) {
        self.group_mut(element.element_type).push(element);
    }

    pub fn len(&self) -> usize {
        self.text.len() + self.tables.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All summaries: text first, then tables, then images.
    pub fn iter(&self) -> impl Iterator<Item = &SummarizedElement> {
        self.text
            .iter()
            .chain(self.tables.iter())
            .chain(self.images.iter())
    }
}

/// Metadata stored alongside each indexed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub element_id: String,
    pub element_type: ElementType,
    pub page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

/// The unit stored in the knowledge index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    /// Record UUID assigned at ingestion.
    pub id: String,
    /// Summary text used for embedding and retrieval.
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Heuristic confidence label attached to an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance record for one retrieved document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub element_id: String,
    pub element_type: ElementType,
    pub page: u32,
    pub content_preview: String,
}

/// The structured result of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
}

/// Keep at most `max` characters of `s`, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
