//! Cleaning and splitting of extracted text into passages.
//!
//! Text is cleaned first (trimmed lines, collapsed blank lines, repeated
//! page headers and footers removed), then packed into passages of at most
//! [`DEFAULT_PASSAGE_WORDS`] words made of whole sentences. A sentence that
//! alone exceeds the limit is cut at the word limit.

use crate::{
    extract::{RawDocument, SourceMeta},
    text_util::{split_sentences, word_count},
};

/// Default passage length in words.
pub const DEFAULT_PASSAGE_WORDS: usize = 200;

/// Minimum number of pages before header/footer detection kicks in.
const MIN_PAGES_FOR_HEADER_FOOTER: usize = 3;

/// Page separator emitted by extractors that know about pages.
pub const PAGE_BREAK: char = '\u{c}';

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Maximum passage length in words.
    pub passage_words: usize,
    /// Only break between sentences unless a sentence is itself too long.
    pub respect_sentence_boundary: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            passage_words: DEFAULT_PASSAGE_WORDS,
            respect_sentence_boundary: true,
        }
    }
}

/// A bounded chunk of document text with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub text: String,
    pub meta: SourceMeta,
    /// Zero-based position of this passage within its source document.
    pub position: usize,
}

/// Clean a document's text and split it into passages.
///
/// # Examples
///
/// ```
/// use docsift::chunking::{chunk_document, ChunkingConfig};
/// use docsift::extract::{RawDocument, SourceMeta};
///
/// let doc = RawDocument {
///     text: "One sentence. Another sentence.".to_string(),
///     meta: SourceMeta::new("doc.txt", "/tmp/doc.txt"),
/// };
/// let passages = chunk_document(&doc, &ChunkingConfig::default());
/// assert_eq!(passages.len(), 1);
/// assert_eq!(passages[0].meta.name, "doc.txt");
/// ```
pub fn chunk_document(doc: &RawDocument, config: &ChunkingConfig) -> Vec<Passage> {
    let cleaned = clean_text(&doc.text);
    let limit = config.passage_words.max(1);

    let texts = if config.respect_sentence_boundary {
        pack_sentences(&cleaned, limit)
    } else {
        split_words(&cleaned, limit)
    };

    texts
        .into_iter()
        .enumerate()
        .map(|(position, text)| Passage {
            text,
            meta: doc.meta.clone(),
            position,
        })
        .collect()
}

/// Strip every line, collapse runs of blank lines to one, and drop header
/// and footer lines repeated on every page.
pub fn clean_text(text: &str) -> String {
    let mut pages: Vec<Vec<&str>> = text
        .split(PAGE_BREAK)
        .map(|page| page.lines().map(str::trim).collect())
        .collect();

    if pages.len() >= MIN_PAGES_FOR_HEADER_FOOTER {
        strip_repeated(&mut pages, |page| page.iter().position(|l| !l.is_empty()));
        strip_repeated(&mut pages, |page| page.iter().rposition(|l| !l.is_empty()));
    }

    let mut out = String::with_capacity(text.len());
    let mut blank_run = true;
    for page in &pages {
        for line in page {
            if line.is_empty() {
                if !blank_run {
                    out.push('\n');
                    blank_run = true;
                }
                continue;
            }
            out.push_str(line);
            out.push('\n');
            blank_run = false;
        }
        if !blank_run {
            out.push('\n');
            blank_run = true;
        }
    }

    out.trim_end().to_string()
}

/// Remove the line picked by `locate` from every page when it is the same
/// on all of them once digits (page numbers) are masked out.
fn strip_repeated(
    pages: &mut [Vec<&str>],
    locate: impl Fn(&[&str]) -> Option<usize>,
) {
    let Some(positions) = pages
        .iter()
        .map(|page| locate(page.as_slice()))
        .collect::<Option<Vec<usize>>>()
    else {
        return;
    };

    let shape = mask_digits(pages[0][positions[0]]);
    let repeated = pages
        .iter()
        .zip(&positions)
        .all(|(page, &i)| mask_digits(page[i]) == shape);

    if repeated {
        for (page, &i) in pages.iter_mut().zip(&positions) {
            page.remove(i);
        }
    }
}

fn mask_digits(line: &str) -> String {
    line.chars()
        .map(|c| if c.is_ascii_digit() { '#' } else { c })
        .collect()
}

fn pack_sentences(text: &str, limit: usize) -> Vec<String> {
    let mut passages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for sentence in split_sentences(text) {
        let words = word_count(sentence);

        if current_words + words > limit && !current.is_empty() {
            passages.push(current.join(" "));
            current.clear();
            current_words = 0;
        }

        if words > limit {
            passages.extend(split_words(sentence, limit));
            continue;
        }

        current.push(sentence);
        current_words += words;
    }

    if !current.is_empty() {
        passages.push(current.join(" "));
    }

    passages
}

fn split_words(text: &str, limit: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.chunks(limit).map(|chunk| chunk.join(" ")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> RawDocument {
        RawDocument {
            text: text.to_string(),
            meta: SourceMeta::new("doc.txt", "/sessions/s/doc.txt"),
        }
    }

    fn config(words: usize) -> ChunkingConfig {
        ChunkingConfig {
            passage_words: words,
            respect_sentence_boundary: true,
        }
    }

    #[test]
    fn short_text_single_passage() {
        let passages = chunk_document(
            &doc("The quick brown fox jumps over the lazy dog."),
            &ChunkingConfig::default(),
        );
        assert_eq!(passages.len(), 1);
        assert_eq!(
            passages[0].text,
            "The quick brown fox jumps over the lazy dog."
        );
        assert_eq!(passages[0].position, 0);
        assert_eq!(passages[0].meta.name, "doc.txt");
        assert_eq!(passages[0].meta.path, "/sessions/s/doc.txt");
    }

    #[test]
    fn empty_text_no_passages() {
        assert!(chunk_document(&doc(" \n\n \t"), &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn breaks_between_sentences() {
        let text = "One two three. Four five six. Seven eight nine.";
        let passages = chunk_document(&doc(text), &config(6));

        let texts: Vec<_> = passages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["One two three. Four five six.", "Seven eight nine."]
        );
        assert_eq!(passages[1].position, 1);
    }

    #[test]
    fn long_sentence_is_cut_at_word_limit() {
        let text = format!("{}end.", "word ".repeat(9));
        let passages = chunk_document(&doc(&text), &config(4));

        let counts: Vec<_> = passages.iter().map(|p| word_count(&p.text)).collect();
        assert_eq!(counts, vec![4, 4, 2]);
    }

    #[test]
    fn passages_respect_limit_and_keep_every_word() {
        let text = "Alpha beta gamma delta. ".repeat(120);
        let passages = chunk_document(&doc(&text), &ChunkingConfig::default());

        assert!(passages.len() > 1);
        for p in &passages {
            assert!(word_count(&p.text) <= DEFAULT_PASSAGE_WORDS);
            assert!(!p.text.trim().is_empty());
        }
        let total: usize = passages.iter().map(|p| word_count(&p.text)).sum();
        assert_eq!(total, 480);
    }

    #[test]
    fn positions_are_sequential() {
        let text = "Sentence number here. ".repeat(200);
        let passages = chunk_document(&doc(&text), &config(10));
        for (i, p) in passages.iter().enumerate() {
            assert_eq!(p.position, i);
        }
    }

    #[test]
    fn word_split_mode_ignores_sentences() {
        let text = "a b c. d e f. g";
        let passages = chunk_document(
            &doc(text),
            &ChunkingConfig {
                passage_words: 4,
                respect_sentence_boundary: false,
            },
        );
        let texts: Vec<_> = passages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a b c. d", "e f. g"]);
    }

    #[test]
    fn clean_text_strips_and_collapses() {
        let cleaned = clean_text("  line one  \n\n\n\n   line two\t\n");
        assert_eq!(cleaned, "line one\n\nline two");
    }

    #[test]
    fn clean_text_removes_repeated_header_and_footer() {
        let page = |n: usize| format!("ACME Report\nBody of page {n}.\nPage {n}");
        let text = [page(1), page(2), page(3)].join("\u{c}");

        let cleaned = clean_text(&text);
        assert!(!cleaned.contains("ACME Report"));
        assert!(!cleaned.contains("Page 2"));
        assert!(cleaned.contains("Body of page 1."));
        assert!(cleaned.contains("Body of page 3."));
    }

    #[test]
    fn clean_text_keeps_headers_with_few_pages() {
        let text = "Title\nBody one.\u{c}Title\nBody two.";
        assert!(clean_text(text).contains("Title"));
    }

    #[test]
    fn clean_text_keeps_differing_first_lines() {
        let text = "Intro\nA.\u{c}Middle\nB.\u{c}Outro\nC.";
        let cleaned = clean_text(text);
        assert!(cleaned.contains("Intro"));
        assert!(cleaned.contains("Outro"));
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "Café naïve 日本語 🎉. ".repeat(100);
        let passages = chunk_document(&doc(&text), &config(50));
        assert!(!passages.is_empty());
        for p in &passages {
            assert!(p.text.chars().count() > 0);
        }
    }
}
