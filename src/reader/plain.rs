use std::path::Path;

use super::{DocumentFormat, TextExtractor, extraction_error};
use crate::error::Result;

/// UTF-8 text files: plain text, Markdown, JSON, CSV, and files without an extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn name(&self) -> &'static str {
        "plain_text"
    }

    fn supports(&self, path: &Path) -> bool {
        matches!(
            DocumentFormat::from_path(path),
            DocumentFormat::PlainText | DocumentFormat::Markdown
        )
    }

    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = fs_err::read(path)?;
        String::from_utf8(bytes).map_err(|err| extraction_error(path, err.to_string()))
    }
}
