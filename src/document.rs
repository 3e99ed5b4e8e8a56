//! The assembled, immutable document
//!
//! Page records are kept in page order and their text is joined under
//! `--- Page N ---` marker lines so that analysis output can cite pages.

use crate::orientation::{OrientationMethod, Rotation};
use crate::rasterizer::DocumentKind;
use crate::DocumentError;
use serde::Serialize;
use std::borrow::Cow;

/// Largest accepted document: 50 MiB
pub const MAX_DOCUMENT_SIZE: u64 = 50 * 1024 * 1024;

/// How a page's text was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Native,
    Ocr,
}

/// A failure confined to one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum PageError {
    #[error("page could not be decoded: {0}")]
    Decode(String),
    #[error("text recognition failed: {0}")]
    Recognition(String),
}

/// Extraction result for one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageRecord {
    /// Zero-based page position
    pub page_index: u32,
    pub method: ExtractionMethod,
    /// Clockwise rotation applied before recognition
    pub rotation: Rotation,
    /// Which detector decided the rotation (OCR pages only)
    pub orientation: Option<OrientationMethod>,
    pub raw_text: String,
    /// Mean recognition confidence in 0.0..=1.0 (OCR pages only)
    pub confidence: Option<f32>,
    pub error: Option<PageError>,
}

impl PageRecord {
    pub fn native(page_index: u32, text: String) -> Self {
        Self {
            page_index,
            method: ExtractionMethod::Native,
            rotation: Rotation::Deg0,
            orientation: None,
            raw_text: text,
            confidence: None,
            error: None,
        }
    }

    /// One-based page number, as used in markers and citations
    pub fn page_number(&self) -> u32 {
        self.page_index + 1
    }
}

/// The marker line that precedes a page's text
pub fn page_marker(page_number: u32) -> String {
    format!("--- Page {} ---", page_number)
}

fn parse_page_marker(line: &str) -> Option<u32> {
    line.trim()
        .strip_prefix("--- Page ")?
        .strip_suffix(" ---")?
        .parse()
        .ok()
}

/// Rewrite marker-shaped lines inside page text so only real page
/// boundaries parse as markers. `--- Page 9 ---` becomes `-- Page 9 --`.
fn neutralize_markers(text: &str) -> Cow<'_, str> {
    if !text.lines().any(|line| parse_page_marker(line).is_some()) {
        return Cow::Borrowed(text);
    }
    let lines: Vec<String> = text
        .lines()
        .map(|line| match parse_page_marker(line) {
            Some(number) => format!("-- Page {} --", number),
            None => line.to_string(),
        })
        .collect();
    Cow::Owned(lines.join("\n"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotatedPage {
    pub page: u32,
    pub degrees: u16,
}

/// Summary of an assembled document
#[derive(Debug, Clone, Serialize)]
pub struct DocumentMetadata {
    pub file_name: Option<String>,
    pub kind: DocumentKind,
    pub size_bytes: u64,
    pub size_mb: f64,
    pub page_count: u32,
    pub native_pages: u32,
    pub ocr_pages: u32,
    pub rotated_pages: Vec<RotatedPage>,
    pub failed_pages: Vec<u32>,
    pub char_count: usize,
    pub word_count: usize,
    pub dpi_used: Option<u32>,
    pub mean_ocr_confidence: Option<f32>,
}

/// A normalized document; immutable once assembled
#[derive(Debug, Clone)]
pub struct Document {
    kind: DocumentKind,
    size_bytes: u64,
    file_name: Option<String>,
    dpi: u32,
    pages: Vec<PageRecord>,
    assembled_text: String,
}

impl Document {
    /// Order the page records and join their text under page markers
    pub fn assemble(
        kind: DocumentKind,
        size_bytes: u64,
        mut pages: Vec<PageRecord>,
        dpi: u32,
    ) -> Result<Self, DocumentError> {
        if size_bytes > MAX_DOCUMENT_SIZE {
            return Err(DocumentError::TooLarge {
                size: size_bytes,
                limit: MAX_DOCUMENT_SIZE,
            });
        }

        pages.sort_by_key(|p| p.page_index);

        let assembled_text = pages
            .iter()
            .map(|page| {
                let text = neutralize_markers(page.raw_text.trim_end());
                if text.is_empty() {
                    page_marker(page.page_number())
                } else {
                    format!("{}\n{}", page_marker(page.page_number()), text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        log::info!(
            "Assembled {} document: {} pages, {} chars",
            kind.as_str(),
            pages.len(),
            assembled_text.chars().count()
        );

        Ok(Self {
            kind,
            size_bytes,
            file_name: None,
            dpi,
            pages,
            assembled_text,
        })
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    /// Look up a page by its one-based number
    pub fn page(&self, page_number: u32) -> Option<&PageRecord> {
        let index = page_number.checked_sub(1)?;
        self.pages.iter().find(|p| p.page_index == index)
    }

    pub fn assembled_text(&self) -> &str {
        &self.assembled_text
    }

    /// Number of page marker lines in the assembled text
    pub fn page_marker_count(&self) -> usize {
        self.assembled_text
            .lines()
            .filter(|line| parse_page_marker(line).is_some())
            .count()
    }

    pub fn metadata(&self) -> DocumentMetadata {
        let ocr_pages: Vec<&PageRecord> = self
            .pages
            .iter()
            .filter(|p| p.method == ExtractionMethod::Ocr)
            .collect();

        let confidences: Vec<f32> = ocr_pages.iter().filter_map(|p| p.confidence).collect();
        let mean_ocr_confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
        };

        let text_pages = self.pages.iter().map(|p| p.raw_text.as_str());

        DocumentMetadata {
            file_name: self.file_name.clone(),
            kind: self.kind,
            size_bytes: self.size_bytes,
            size_mb: (self.size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            page_count: self.page_count(),
            native_pages: (self.pages.len() - ocr_pages.len()) as u32,
            ocr_pages: ocr_pages.len() as u32,
            rotated_pages: self
                .pages
                .iter()
                .filter(|p| p.rotation != Rotation::Deg0)
                .map(|p| RotatedPage {
                    page: p.page_number(),
                    degrees: p.rotation.degrees(),
                })
                .collect(),
            failed_pages: self
                .pages
                .iter()
                .filter(|p| p.error.is_some())
                .map(|p| p.page_number())
                .collect(),
            char_count: text_pages.clone().map(|t| t.chars().count()).sum(),
            word_count: text_pages.map(|t| t.split_whitespace().count()).sum(),
            dpi_used: (!ocr_pages.is_empty()).then_some(self.dpi),
            mean_ocr_confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ocr_page(page_index: u32, text: &str, rotation: Rotation) -> PageRecord {
        PageRecord {
            page_index,
            method: ExtractionMethod::Ocr,
            rotation,
            orientation: Some(OrientationMethod::Osd),
            raw_text: text.to_string(),
            confidence: Some(0.8),
            error: None,
        }
    }

    #[test]
    fn test_pages_are_ordered_under_markers() {
        let pages = vec![
            PageRecord::native(2, "Third page".into()),
            PageRecord::native(0, "First page".into()),
            PageRecord::native(1, "Second page".into()),
        ];
        let doc = Document::assemble(DocumentKind::Pdf, 1024, pages, 300).unwrap();

        assert_eq!(
            doc.assembled_text(),
            "--- Page 1 ---\nFirst page\n\n--- Page 2 ---\nSecond page\n\n--- Page 3 ---\nThird page"
        );
        assert_eq!(doc.page_count(), 3);
        assert_eq!(doc.page_marker_count(), 3);
        assert_eq!(doc.page(2).unwrap().raw_text, "Second page");
        assert!(doc.page(0).is_none());
        assert!(doc.page(4).is_none());
    }

    #[test]
    fn test_empty_pages_keep_their_marker() {
        let mut failed = ocr_page(1, "", Rotation::Deg0);
        failed.error = Some(PageError::Decode("truncated image data".into()));
        let pages = vec![PageRecord::native(0, "Body".into()), failed];
        let doc = Document::assemble(DocumentKind::Pdf, 10, pages, 300).unwrap();

        assert_eq!(doc.page_marker_count(), 2);
        assert!(doc.assembled_text().ends_with("--- Page 2 ---"));
        assert_eq!(doc.metadata().failed_pages, vec![2]);
    }

    #[test]
    fn test_size_limit() {
        let result = Document::assemble(DocumentKind::Png, MAX_DOCUMENT_SIZE + 1, Vec::new(), 300);
        assert!(matches!(
            result,
            Err(DocumentError::TooLarge { size, limit }) if size == MAX_DOCUMENT_SIZE + 1 && limit == MAX_DOCUMENT_SIZE
        ));
        assert!(Document::assemble(DocumentKind::Png, MAX_DOCUMENT_SIZE, Vec::new(), 300).is_ok());
    }

    #[test]
    fn test_metadata() {
        let pages = vec![
            PageRecord::native(0, "Notice of debt".into()),
            ocr_page(1, "Cease and desist all contact", Rotation::Deg90),
        ];
        let doc = Document::assemble(DocumentKind::Pdf, 3 * 1024 * 1024, pages, 300)
            .unwrap()
            .with_file_name("notice.pdf");
        let meta = doc.metadata();

        assert_eq!(meta.file_name.as_deref(), Some("notice.pdf"));
        assert_eq!(meta.size_mb, 3.0);
        assert_eq!(meta.native_pages, 1);
        assert_eq!(meta.ocr_pages, 1);
        assert_eq!(meta.rotated_pages, vec![RotatedPage { page: 2, degrees: 90 }]);
        assert_eq!(meta.word_count, 8);
        assert_eq!(meta.dpi_used, Some(300));
        assert_eq!(meta.mean_ocr_confidence, Some(0.8));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["kind"], "pdf");
    }

    #[test]
    fn test_marker_lines_in_page_text_are_neutralized() {
        let pages = vec![
            PageRecord::native(0, "Exhibit list\n  --- Page 9 ---\nSee attached".into()),
            PageRecord::native(1, "--- Page 1 ---".into()),
        ];
        let doc = Document::assemble(DocumentKind::Pdf, 10, pages, 300).unwrap();

        assert_eq!(doc.page_marker_count(), 2);
        assert_eq!(doc.page_marker_count(), doc.page_count() as usize);
        let markers: Vec<u32> = doc
            .assembled_text()
            .lines()
            .filter_map(parse_page_marker)
            .collect();
        assert_eq!(markers, vec![1, 2]);
        assert!(doc.assembled_text().contains("-- Page 9 --\nSee attached"));
        assert_eq!(doc.page(1).unwrap().raw_text, "Exhibit list\n  --- Page 9 ---\nSee attached");
    }

    #[test]
    fn test_marker_parsing() {
        assert_eq!(parse_page_marker("--- Page 12 ---"), Some(12));
        assert_eq!(parse_page_marker("--- Page twelve ---"), None);
        assert_eq!(parse_page_marker("Page 3"), None);
    }
}
