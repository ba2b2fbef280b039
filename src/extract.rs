//! Plain-text extraction for the supported upload formats.
//!
//! Every format sits behind [`TextExtractor`], and [`Extractors`] maps file
//! extensions (case-insensitively) to an implementation. Files whose
//! extension has no extractor are not an error; the loader simply skips
//! them.

use std::{
    collections::HashMap,
    io::Read,
    path::Path,
};

use quick_xml::events::Event;
use serde::Serialize;

use crate::{
    chunking::PAGE_BREAK,
    error::{Error, Result},
};

/// Provenance carried by every passage and answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceMeta {
    /// Base name of the source file.
    pub name: String,
    /// Full path of the source file inside its session directory.
    pub path: String,
}

impl SourceMeta {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, path.to_string_lossy())
    }
}

/// Extracted, not yet cleaned, text of one file.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub text: String,
    pub meta: SourceMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Pdf,
    Txt,
    Docx,
}

impl Format {
    pub const ALL: [Format; 3] = [Format::Pdf, Format::Txt, Format::Docx];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Pdf => "pdf",
            Format::Txt => "txt",
            Format::Docx => "docx",
        }
    }

    /// Match an extension, ignoring case and an optional leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.strip_prefix('.').unwrap_or(ext);
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Turns one file into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Extension → extractor registry.
pub struct Extractors {
    by_format: HashMap<Format, Box<dyn TextExtractor>>,
}

impl Extractors {
    /// A registry with no extractors at all.
    pub fn empty() -> Self {
        Self {
            by_format: HashMap::new(),
        }
    }

    /// Register (or replace) the extractor for a format.
    pub fn with(
        mut self,
        format: Format,
        extractor: impl TextExtractor + 'static,
    ) -> Self {
        self.by_format.insert(format, Box::new(extractor));
        self
    }

    /// The extractor registered for `path`'s extension, if any.
    pub fn for_path(&self, path: &Path) -> Option<(Format, &dyn TextExtractor)> {
        let format = Format::from_path(path)?;
        self.by_format
            .get(&format)
            .map(|extractor| (format, extractor.as_ref()))
    }

    /// Extract a file with the extractor registered for `format`.
    pub fn extract(&self, path: &Path, format: Format) -> Result<RawDocument> {
        let extractor = self.by_format.get(&format).ok_or_else(|| {
            Error::extraction(path, format!("no extractor for .{format}"))
        })?;
        Ok(RawDocument {
            text: extractor.extract(path)?,
            meta: SourceMeta::from_path(path),
        })
    }
}

impl Default for Extractors {
    fn default() -> Self {
        Self::empty()
            .with(Format::Pdf, PdfExtractor::default())
            .with(Format::Txt, TxtExtractor)
            .with(Format::Docx, DocxExtractor)
    }
}

impl std::fmt::Debug for Extractors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractors")
            .field("formats", &self.by_format.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Plain text, decoded as UTF-8 with invalid sequences replaced.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxtExtractor;

impl TextExtractor for TxtExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let bytes =
            std::fs::read(path).map_err(|e| Error::extraction(path, e))?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(text.strip_prefix('\u{feff}').unwrap_or(&text).to_string())
    }
}

/// PDF text, one page per form-feed separated block.
#[derive(Debug, Clone, Copy)]
pub struct PdfExtractor {
    /// Drop lines that look like rows of a numeric table.
    pub remove_numeric_tables: bool,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self {
            remove_numeric_tables: true,
        }
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let mut doc = pdf_oxide::PdfDocument::open(path)
            .map_err(|e| Error::extraction(path, e))?;
        let page_count =
            doc.page_count().map_err(|e| Error::extraction(path, e))?;

        let mut pages = Vec::with_capacity(page_count);
        for page in 0..page_count {
            let text = doc
                .extract_text(page)
                .map_err(|e| Error::extraction(path, e))?;
            pages.push(if self.remove_numeric_tables {
                remove_numeric_rows(&text)
            } else {
                text
            });
        }

        Ok(pages.join(&PAGE_BREAK.to_string()))
    }
}

/// Drop lines where more than 40% of the words contain digits, unless the
/// line ends like a sentence.
fn remove_numeric_rows(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.is_empty() || line.trim_end().ends_with('.') {
                return true;
            }
            let numeric = words
                .iter()
                .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
                .count();
            numeric * 10 <= words.len() * 4
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Word documents: the text runs of `word/document.xml`, one line per
/// paragraph.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let file =
            std::fs::File::open(path).map_err(|e| Error::extraction(path, e))?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| Error::extraction(path, e))?;
        let mut entry = archive
            .by_name("word/document.xml")
            .map_err(|e| Error::extraction(path, e))?;

        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| Error::extraction(path, e))?;

        docx_text(&xml).map_err(|e| Error::extraction(path, e))
    }
}

/// Collect the visible text of a WordprocessingML body.
pub fn docx_text(xml: &str) -> std::result::Result<String, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => out.push('\t'),
                b"w:br" | b"w:cr" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text => {
                out.push_str(&String::from_utf8_lossy(&t));
            }
            Event::GeneralRef(r) if in_text => {
                let resolved = match &*r {
                    b"amp" => Some('&'),
                    b"lt" => Some('<'),
                    b"gt" => Some('>'),
                    b"quot" => Some('"'),
                    b"apos" => Some('\''),
                    _ => r.resolve_char_ref()?,
                };
                if let Some(c) = resolved {
                    out.push(c);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}
