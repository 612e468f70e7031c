//! Text extraction for `Encoder::add_file`.
//!
//! Extractors are probed in registration order; the first that supports a path wins.

mod epub;
mod html;
#[cfg(feature = "pdf_extract")]
mod pdf;
mod plain;

use std::path::Path;

pub use epub::EpubExtractor;
pub use html::HtmlExtractor;
#[cfg(feature = "pdf_extract")]
pub use pdf::PdfExtractor;
pub use plain::PlainTextExtractor;

use crate::error::{MemvidError, Result};

/// Coarse document classification derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Html,
    Pdf,
    Epub,
    Unknown,
}

impl DocumentFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            None | Some("txt" | "text" | "json" | "jsonl" | "csv" | "log") => Self::PlainText,
            Some("md" | "markdown") => Self::Markdown,
            Some("html" | "htm" | "xhtml") => Self::Html,
            Some("pdf") => Self::Pdf,
            Some("epub") => Self::Epub,
            Some(_) => Self::Unknown,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Unknown => "unknown",
        }
    }
}

/// Turns a document into plain text.
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, path: &Path) -> bool;

    fn extract_text(&self, path: &Path) -> Result<String>;
}

pub(crate) fn extraction_error(path: &Path, reason: impl Into<String>) -> MemvidError {
    MemvidError::ExtractionFailed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    pub fn register<E>(&mut self, extractor: E)
    where
        E: TextExtractor + 'static,
    {
        self.extractors.push(Box::new(extractor));
    }

    #[must_use]
    pub fn extractors(&self) -> &[Box<dyn TextExtractor>] {
        &self.extractors
    }

    pub fn extract_text(&self, path: &Path) -> Result<String> {
        let extractor = self
            .extractors
            .iter()
            .find(|extractor| extractor.supports(path))
            .ok_or_else(|| {
                extraction_error(
                    path,
                    format!(
                        "no extractor for {} documents",
                        DocumentFormat::from_path(path).label()
                    ),
                )
            })?;
        tracing::debug!(
            target = "memvid::extract",
            path = %path.display(),
            extractor = extractor.name(),
            "extracting text"
        );
        extractor.extract_text(path)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(PlainTextExtractor);
        registry.register(HtmlExtractor);
        registry.register(EpubExtractor);
        #[cfg(feature = "pdf_extract")]
        registry.register(PdfExtractor);
        registry
    }
}

/// Extract text with the default registry.
pub fn extract_text(path: impl AsRef<Path>) -> Result<String> {
    ExtractorRegistry::default().extract_text(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.MD")), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_path(Path::new("notes")), DocumentFormat::PlainText);
        assert_eq!(DocumentFormat::from_path(Path::new("x.htm")), DocumentFormat::Html);
        assert_eq!(DocumentFormat::from_path(Path::new("x.docx")), DocumentFormat::Unknown);
        assert_eq!(DocumentFormat::from_path(Path::new("novel.EPUB")), DocumentFormat::Epub);
    }

    #[test]
    fn unsupported_format_is_extraction_error() {
        let err = extract_text("slides.pptx").expect_err("unsupported");
        assert!(matches!(err, MemvidError::ExtractionFailed { .. }));
    }

    #[test]
    fn default_registry_reads_epub() {
        let registry = ExtractorRegistry::default();
        let names: Vec<&str> = registry.extractors().iter().map(|e| e.name()).collect();
        assert!(names.contains(&"epub"));
        let epub = registry
            .extractors()
            .iter()
            .find(|e| e.supports(Path::new("book.epub")))
            .map(|e| e.name());
        assert_eq!(epub, Some("epub"));
    }

    #[test]
    fn registry_uses_first_supporting_extractor() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("page.html");
        std::fs::write(&path, "<html><body><p>Hello <b>there</b></p></body></html>").unwrap();
        assert_eq!(extract_text(&path).unwrap(), "Hello there");
    }
}
