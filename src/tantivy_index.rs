use tantivy::{
    Index,
    IndexReader,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, FuzzyTermQuery, Occur, Query, QueryParser},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{chunking::Passage, error::Result, extract::SourceMeta};

/// Field names used in the schema.
pub mod fields {
    pub const NAME: &str = "name";
    pub const PATH: &str = "path";
    pub const POSITION: &str = "position";
    pub const BODY: &str = "body";
}

/// Name under which the stemming analyzer is registered.
pub const EN_STEM: &str = "en_stem";

/// Memory handed to the single indexing thread of a reset.
const WRITER_MEMORY_BUDGET: usize = 30_000_000;

/// Query terms shorter than this are not fuzzy-matched.
const MIN_FUZZY_TERM_LEN: usize = 3;

/// In-memory passage index for one session.
///
/// The index only ever holds the passages of the last
/// [`reset_and_load`](Self::reset_and_load) call.
pub struct PassageIndex {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

/// Resolved field handles for the schema.
#[derive(Clone, Copy)]
pub struct SchemaFields {
    pub name: Field,
    pub path: Field,
    pub position: Field,
    pub body: Field,
}

/// A passage returned by retrieval, with its BM25 score.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub score: f32,
    pub passage: Passage,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let name = builder.add_text_field(fields::NAME, STRING | STORED);
    let path = builder.add_text_field(fields::PATH, STRING | STORED);
    let position = builder.add_u64_field(fields::POSITION, STORED);

    let body_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(EN_STEM)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let body = builder.add_text_field(fields::BODY, body_opts);

    let schema = builder.build();
    (
        schema,
        SchemaFields {
            name,
            path,
            position,
            body,
        },
    )
}

/// The analyzer used for passage bodies: simple tokens, lowercased and
/// English-stemmed.
pub fn en_stem_analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build()
}

/// Run `text` through `analyzer` and collect the resulting terms.
pub fn analyze(analyzer: &mut TextAnalyzer, text: &str) -> Vec<String> {
    let mut stream = analyzer.token_stream(text);
    let mut terms = Vec::new();
    while stream.advance() {
        terms.push(stream.token().text.clone());
    }
    terms
}

impl PassageIndex {
    /// Create an empty in-memory index.
    pub fn open_in_ram() -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        index.tokenizers().register(EN_STEM, en_stem_analyzer());
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Replace the whole index content with `passages`.
    pub fn reset_and_load(&self, passages: &[Passage]) -> Result<()> {
        let f = self.fields;
        let mut writer = self
            .index
            .writer_with_num_threads::<TantivyDocument>(1, WRITER_MEMORY_BUDGET)?;

        writer.delete_all_documents()?;
        for passage in passages {
            writer.add_document(doc!(
                f.name => passage.meta.name.as_str(),
                f.path => passage.meta.path.as_str(),
                f.position => passage.position as u64,
                f.body => passage.text.as_str(),
            ))?;
        }
        writer.commit()?;
        self.reader.reload()?;

        Ok(())
    }

    /// Number of passages currently searchable.
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// BM25 retrieval combined with fuzzy (edit distance 1) term matching.
    ///
    /// Returns at most `limit` passages, best first.
    pub fn retrieve(&self, query_str: &str, limit: usize) -> Result<Vec<Candidate>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields;
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![f.body]);
        let (bm25_query, _errors) = parser.parse_query_lenient(query_str);

        let mut should_clauses: Vec<(Occur, Box<dyn Query>)> =
            vec![(Occur::Should, bm25_query)];

        let mut analyzer = en_stem_analyzer();
        for term_str in analyze(&mut analyzer, query_str) {
            if term_str.chars().count() >= MIN_FUZZY_TERM_LEN {
                let term = tantivy::Term::from_field_text(f.body, &term_str);
                let fuzzy = FuzzyTermQuery::new(term, 1, true);
                should_clauses.push((Occur::Should, Box::new(fuzzy)));
            }
        }

        let query = BooleanQuery::new(should_clauses);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(Candidate {
                score,
                passage: Passage {
                    text: extract_text(&doc, f.body),
                    meta: SourceMeta::new(
                        extract_text(&doc, f.name),
                        extract_text(&doc, f.path),
                    ),
                    position: extract_u64(&doc, f.position) as usize,
                },
            });
        }

        Ok(results)
    }
}

impl std::fmt::Debug for PassageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassageIndex").finish_non_exhaustive()
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(name: &str, text: &str, position: usize) -> Passage {
        Passage {
            text: text.to_string(),
            meta: SourceMeta::new(name, format!("/s/{name}")),
            position,
        }
    }

    #[test]
    fn load_and_retrieve() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[
            passage("hello.txt", "This is a test document about hello world", 0),
            passage("rust.txt", "Rust is a systems programming language", 0),
        ])
        .unwrap();

        let results = idx.retrieve("hello world", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].passage.meta.name, "hello.txt");
        assert_eq!(results[0].passage.meta.path, "/s/hello.txt");
        assert_eq!(
            results[0].passage.text,
            "This is a test document about hello world"
        );
    }

    #[test]
    fn reset_replaces_previous_content() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("old.txt", "ancient parchment", 0)])
            .unwrap();
        idx.reset_and_load(&[passage("new.txt", "modern paper", 0)])
            .unwrap();

        assert_eq!(idx.len(), 1);
        assert!(idx.retrieve("parchment", 10).unwrap().is_empty());
        assert_eq!(idx.retrieve("paper", 10).unwrap().len(), 1);
    }

    #[test]
    fn reset_with_nothing_empties_index() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("a.txt", "content", 0)]).unwrap();
        idx.reset_and_load(&[]).unwrap();

        assert!(idx.is_empty());
        assert!(idx.retrieve("content", 10).unwrap().is_empty());
    }

    #[test]
    fn empty_index_returns_nothing() {
        let idx = PassageIndex::open_in_ram().unwrap();
        assert!(idx.retrieve("anything", 10).unwrap().is_empty());
        assert!(idx.retrieve("", 10).unwrap().is_empty());
    }

    #[test]
    fn zero_limit_returns_nothing() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("a.txt", "content", 0)]).unwrap();
        assert!(idx.retrieve("content", 0).unwrap().is_empty());
    }

    #[test]
    fn respects_limit_and_orders_by_score() {
        let idx = PassageIndex::open_in_ram().unwrap();
        let passages: Vec<_> = (0..5)
            .map(|i| passage("doc.txt", &"fox ".repeat(i + 1), i))
            .collect();
        idx.reset_and_load(&passages).unwrap();

        let results = idx.retrieve("fox", 3).unwrap();
        assert_eq!(results.len(), 3);
        for window in results.windows(2) {
            assert!(window[0].score >= window[1].score);
        }
    }

    #[test]
    fn stemming_works() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("a.txt", "the runners were running quickly", 0)])
            .unwrap();
        assert!(!idx.retrieve("run", 10).unwrap().is_empty());
    }

    #[test]
    fn fuzzy_matching_finds_typos() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("a.txt", "programming language guide", 0)])
            .unwrap();
        assert!(!idx.retrieve("progrmming", 10).unwrap().is_empty());
    }

    #[test]
    fn position_roundtrips() {
        let idx = PassageIndex::open_in_ram().unwrap();
        idx.reset_and_load(&[passage("a.txt", "unique marker", 7)]).unwrap();
        let results = idx.retrieve("marker", 10).unwrap();
        assert_eq!(results[0].passage.position, 7);
    }

    #[test]
    fn analyze_lowercases_and_stems() {
        let mut analyzer = en_stem_analyzer();
        assert_eq!(
            analyze(&mut analyzer, "The Runners, RUNNING!"),
            vec!["the", "runner", "run"]
        );
    }
}
