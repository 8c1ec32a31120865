//! Element manifests produced by the external document parser.
//!
//! A manifest is a JSON array of [`ContentElement`]s:
//!
//! ```json
//! [
//!   { "element_id": "text_0",  "page": 1, "type": "text",  "text": "..." },
//!   { "element_id": "table_0", "page": 5, "type": "table", "text": "...", "html": "<table>..." },
//!   { "element_id": "image_0", "page": 2, "type": "image", "path": "images/fig1.png" }
//! ]
//! ```
//!
//! Relative image paths resolve against the manifest's directory.

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;

use crate::models::{ContentElement, ElementContent, ElementType};

/// Per-type element counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ElementCounts {
    pub text: usize,
    pub tables: usize,
    pub images: usize,
}

impl ElementCounts {
    pub fn of(elements: &[ContentElement]) -> Self {
        let mut counts = Self::default();
        for element in elements {
            match element.element_type() {
                ElementType::Text => counts.text += 1,
                ElementType::Table => counts.tables += 1,
                ElementType::Image => counts.images += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.text + self.tables + self.images
    }
}

/// Read, resolve, and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<Vec<ContentElement>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read element manifest: {}", path.display()))?;
    let mut elements: Vec<ContentElement> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse element manifest: {}", path.display()))?;

    if let Some(base) = path.parent() {
        for element in &mut elements {
            if let ElementContent::Image { path: image } = &mut element.content {
                if image.is_relative() {
                    *image = base.join(&*image);
                }
            }
        }
    }

    validate(&elements)?;
    Ok(elements)
}

/// Check the parser contract: unique ids across all types, 1-based pages,
/// and a file reference on every image.
pub fn validate(elements: &[ContentElement]) -> Result<()> {
    let mut seen = HashSet::with_capacity(elements.len());
    for element in elements {
        if element.element_id.trim().is_empty() {
            bail!("Element with empty element_id on page {}", element.page);
        }
        if !seen.insert(element.element_id.as_str()) {
            bail!("Duplicate element_id: '{}'", element.element_id);
        }
        if element.page < 1 {
            bail!(
                "Element '{}' has page {}; pages are 1-based",
                element.element_id,
                element.page
            );
        }
        if let ElementContent::Image { path } = &element.content {
            if path.as_os_str().is_empty() {
                bail!("Image element '{}' has no path", element.element_id);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_and_resolves_image_paths() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("elements.json");
        std::fs::write(
            &path,
            r#"[
                {"element_id": "text_0", "page": 1, "type": "text", "text": "Intro"},
                {"element_id": "image_0", "page": 2, "type": "image", "path": "img/fig.png"}
            ]"#,
        )
        .unwrap();

        let elements = load_manifest(&path).unwrap();
        assert_eq!(elements.len(), 2);
        match &elements[1].content {
            ElementContent::Image { path } => assert_eq!(path, &tmp.path().join("img/fig.png")),
            other => panic!("unexpected content {:?}", other),
        }
        assert_eq!(
            ElementCounts::of(&elements),
            ElementCounts {
                text: 1,
                tables: 0,
                images: 1
            }
        );
    }

    #[test]
    fn duplicate_ids_across_types_rejected() {
        let elements = vec![
            ContentElement::text("e1", 1, "a"),
            ContentElement::table("e1", 2, "b"),
        ];
        let err = validate(&elements).unwrap_err();
        assert!(err.to_string().contains("Duplicate element_id"));
    }

    #[test]
    fn zero_page_rejected() {
        let elements = vec![ContentElement::text("e1", 0, "a")];
        assert!(validate(&elements).is_err());
    }

    #[test]
    fn malformed_manifest_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("elements.json");
        std::fs::write(&path, r#"[{"element_id": "x", "page": 1, "type": "video"}]"#).unwrap();
        assert!(load_manifest(&path).is_err());
    }
}
