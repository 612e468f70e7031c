//! EPUB text extraction.
//!
//! An EPUB is a zip archive. `META-INF/container.xml` names the OPF package document, whose
//! manifest maps ids to XHTML files and whose spine gives the reading order. Each spine
//! document is reduced to text with the HTML tag stripper.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use zip::ZipArchive;

use super::html::HtmlExtractor;
use super::{DocumentFormat, TextExtractor, extraction_error};
use crate::error::Result;

const CONTAINER_PATH: &str = "META-INF/container.xml";

#[derive(Debug, Clone, Copy, Default)]
pub struct EpubExtractor;

#[derive(Debug)]
struct ManifestItem {
    href: String,
    media_type: String,
}

impl TextExtractor for EpubExtractor {
    fn name(&self) -> &'static str {
        "epub"
    }

    fn supports(&self, path: &Path) -> bool {
        DocumentFormat::from_path(path) == DocumentFormat::Epub
    }

    fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = fs_err::read(path)?;
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))
            .map_err(|err| extraction_error(path, format!("failed to open epub zip: {err}")))?;

        let documents = match read_entry(&mut archive, CONTAINER_PATH)
            .and_then(|xml| rootfile_path(&xml))
        {
            Some(opf_path) => {
                let opf = read_entry(&mut archive, &opf_path).ok_or_else(|| {
                    extraction_error(path, format!("package document {opf_path} is missing"))
                })?;
                spine_documents(&opf, opf_dir(&opf_path))
            }
            None => {
                tracing::debug!(
                    target = "memvid::extract",
                    path = %path.display(),
                    "epub has no container.xml; reading xhtml entries in name order"
                );
                xhtml_entries(&mut archive)
            }
        };

        let mut sections = Vec::new();
        for document in &documents {
            let Some(markup) = read_entry(&mut archive, document) else {
                tracing::warn!(
                    target = "memvid::extract",
                    path = %path.display(),
                    entry = %document,
                    "spine entry missing from archive"
                );
                continue;
            };
            let text = HtmlExtractor::strip(&markup);
            if !text.is_empty() {
                sections.push(text);
            }
        }
        if sections.is_empty() {
            return Err(extraction_error(path, "epub contains no readable text"));
        }
        Ok(sections.join("\n\n"))
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut file = archive.by_name(name).ok()?;
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    Some(buf)
}

/// `full-path` of the first `<rootfile>` in container.xml.
fn rootfile_path(xml: &str) -> Option<String> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"full-path" {
                        if let Ok(value) = attr.unescape_value() {
                            return Some(value.into_owned());
                        }
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn opf_dir(opf_path: &str) -> &str {
    opf_path.rfind('/').map_or("", |idx| &opf_path[..=idx])
}

/// Archive paths of the spine's (X)HTML documents in reading order.
fn spine_documents(opf: &str, base: &str) -> Vec<String> {
    let mut reader = XmlReader::from_str(opf);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut manifest: HashMap<String, ManifestItem> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"item" => {
                    let (mut id, mut href, mut media_type) = (None, None, String::new());
                    for attr in e.attributes().flatten() {
                        let Ok(value) = attr.unescape_value() else {
                            continue;
                        };
                        match attr.key.local_name().as_ref() {
                            b"id" => id = Some(value.into_owned()),
                            b"href" => href = Some(value.into_owned()),
                            b"media-type" => media_type = value.into_owned(),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, ManifestItem { href, media_type });
                    }
                }
                b"itemref" => {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().as_ref() == b"idref" {
                            if let Ok(value) = attr.unescape_value() {
                                spine.push(value.into_owned());
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    spine
        .iter()
        .filter_map(|idref| manifest.get(idref))
        .filter(|item| item.media_type.contains("html"))
        .map(|item| resolve_href(base, &item.href))
        .collect()
}

/// Join a manifest href onto the package directory, folding `..` segments.
fn resolve_href(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut parts: Vec<&str> = base.split('/').filter(|part| !part.is_empty()).collect();
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn xhtml_entries(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Vec<String> {
    let mut names: Vec<String> = (0..archive.len())
        .filter_map(|idx| archive.by_index(idx).ok().map(|file| file.name().to_string()))
        .filter(|name| {
            let lower = name.to_ascii_lowercase();
            lower.ends_with(".xhtml") || lower.ends_with(".html") || lower.ends_with(".htm")
        })
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    use super::*;

    const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    const PACKAGE: &str = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    fn write_epub(path: &Path, entries: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, body) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn spine_order_drives_the_text() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("book.epub");
        write_epub(
            &path,
            &[
                ("mimetype", "application/epub+zip"),
                (CONTAINER_PATH, CONTAINER),
                ("OEBPS/content.opf", PACKAGE),
                ("OEBPS/style.css", "p { margin: 0 }"),
                (
                    "OEBPS/text/ch1.xhtml",
                    "<html><body><h1>Chapter One</h1><p>It was a dark night.</p></body></html>",
                ),
                (
                    "OEBPS/text/ch2.xhtml",
                    "<html><body><p>Morning came &amp; went.</p></body></html>",
                ),
            ],
        );
        let text = EpubExtractor.extract_text(&path).expect("extract");
        assert_eq!(text, "Chapter One It was a dark night.\n\nMorning came & went.");
    }

    #[test]
    fn missing_container_falls_back_to_entry_names() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("loose.epub");
        write_epub(&path, &[("b.xhtml", "<p>second</p>"), ("a.xhtml", "<p>first</p>")]);
        assert_eq!(EpubExtractor.extract_text(&path).unwrap(), "first\n\nsecond");
    }

    #[test]
    fn not_a_zip_is_extraction_error() {
        let dir = tempfile::tempdir().expect("tmp");
        let path = dir.path().join("broken.epub");
        std::fs::write(&path, b"plain bytes").unwrap();
        let err = EpubExtractor.extract_text(&path).expect_err("not a zip");
        assert!(matches!(err, crate::MemvidError::ExtractionFailed { .. }));
    }

    #[test]
    fn hrefs_resolve_against_the_package_directory() {
        assert_eq!(resolve_href("OEBPS/", "text/ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/text/", "../ch.xhtml#top"), "OEBPS/ch.xhtml");
        assert_eq!(resolve_href("", "ch.xhtml"), "ch.xhtml");
    }
}
