use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{DocumentFormat, TextExtractor};
use crate::error::Result;

#[allow(clippy::unwrap_used)]
static SCRIPT_STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap());
#[allow(clippy::unwrap_used)]
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
#[allow(clippy::unwrap_used)]
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Tag-stripping HTML extractor. Script and style bodies are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    #[must_use]
    pub fn strip(html: &str) -> String {
        let without_code = SCRIPT_STYLE.replace_all(html, " ");
        let without_tags = TAG.replace_all(&without_code, " ");
        let decoded = without_tags
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");
        WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
    }
}

impl TextExtractor for HtmlExtractor {
    fn name(&self) -> &'static str {
        "html"
    }

    fn supports(&self, path: &Path) -> bool {
        DocumentFormat::from_path(path) == DocumentFormat::Html
    }

    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = fs_err::read(path)?;
        Ok(Self::strip(&String::from_utf8_lossy(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_scripts_and_decodes_entities() {
        let html = "<head><style>p{}</style><script>var x = 1;</script></head>\
                    <p>Fish &amp; chips</p>\n<p>2 &lt; 3</p>";
        assert_eq!(HtmlExtractor::strip(html), "Fish & chips 2 < 3");
    }
}
