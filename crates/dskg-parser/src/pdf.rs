//! PDF document parser using pdf-extract
//!
//! pdf-extract separates pages with form feeds; each page becomes one entry
//! of `ParsedDocument::pages`.

use std::path::Path;

use crate::{DocumentParser, FileType, ParsedDocument, ParserError, Result};

const PAGE_BREAK: char = '\x0C';

/// PDF document parser
pub struct PdfParser {
    /// Drop pages that contain only whitespace
    pub skip_blank_pages: bool,
}

impl PdfParser {
    /// Create a new PDF parser with default settings
    pub fn new() -> Self {
        Self {
            skip_blank_pages: true,
        }
    }

    /// Drop whitespace-only pages (on by default)
    pub fn with_blank_pages_skipped(mut self, enabled: bool) -> Self {
        self.skip_blank_pages = enabled;
        self
    }

    /// Extract raw text from a PDF file
    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ParserError::PdfError(e.to_string()))
    }

    /// Split extracted text into pages
    fn split_pages(&self, text: &str) -> Vec<String> {
        let text = text.strip_suffix(PAGE_BREAK).unwrap_or(text);

        text.split(PAGE_BREAK)
            .filter(|page| !self.skip_blank_pages || !page.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for PdfParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for PdfParser {
    fn parse(&self, path: &Path) -> Result<ParsedDocument> {
        let text = self.extract_text(path)?;
        let pages = self.split_pages(&text);

        if pages.iter().all(|p| p.trim().is_empty()) {
            tracing::warn!(path = %path.display(), "PDF contains no extractable text");
        }

        Ok(ParsedDocument::new(path.display().to_string(), FileType::Pdf).with_pages(pages))
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::Pdf]
    }
}
