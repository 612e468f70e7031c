use std::path::Path;

use super::{DocumentFormat, TextExtractor, extraction_error};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn name(&self) -> &'static str {
        "pdf_extract"
    }

    fn supports(&self, path: &Path) -> bool {
        DocumentFormat::from_path(path) == DocumentFormat::Pdf
    }

    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = fs_err::read(path)?;
        let text = pdf_extract::extract_text_from_mem(&bytes)
            .map_err(|err| extraction_error(path, err.to_string()))?;
        if text.trim().is_empty() {
            tracing::warn!(
                target = "memvid::extract",
                path = %path.display(),
                "pdf contained no extractable text"
            );
        }
        Ok(text)
    }
}
