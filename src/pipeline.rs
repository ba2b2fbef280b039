use tracing::debug;

use crate::{
    chunking::Passage,
    error::Result,
    reader::{Answer, SpanReader},
    tantivy_index::PassageIndex,
};

/// Retrieval breadth used when nothing else is configured.
pub const DEFAULT_RETRIEVAL_TOP_K: usize = 10;

/// Number of answers returned when nothing else is configured.
pub const DEFAULT_EXTRACTION_TOP_K: usize = 5;

/// Searchable passage store plus answer extraction.
///
/// Implementations must return an empty vector, not an error, for an empty
/// store or a query nothing matches.
pub trait QueryPipeline: Send {
    /// Replace everything searchable with `passages`.
    fn reset_and_load(&mut self, passages: &[Passage]) -> Result<()>;

    /// Up to `extraction_top_k` answers drawn from the best
    /// `retrieval_top_k` passages, highest score first.
    fn answer(
        &mut self,
        query: &str,
        retrieval_top_k: usize,
        extraction_top_k: usize,
    ) -> Result<Vec<Answer>>;
}

/// BM25 retrieval over a [`PassageIndex`] followed by [`SpanReader`].
#[derive(Debug)]
pub struct ExtractivePipeline {
    index: PassageIndex,
    reader: SpanReader,
}

impl ExtractivePipeline {
    pub fn new() -> Result<Self> {
        Ok(Self {
            index: PassageIndex::open_in_ram()?,
            reader: SpanReader::default(),
        })
    }

    pub fn index(&self) -> &PassageIndex {
        &self.index
    }
}

impl QueryPipeline for ExtractivePipeline {
    fn reset_and_load(&mut self, passages: &[Passage]) -> Result<()> {
        self.index.reset_and_load(passages)
    }

    fn answer(
        &mut self,
        query: &str,
        retrieval_top_k: usize,
        extraction_top_k: usize,
    ) -> Result<Vec<Answer>> {
        let candidates = self.index.retrieve(query, retrieval_top_k)?;
        let analyzed = self.reader.analyze_query(query);
        debug!(candidates = candidates.len(), terms = ?analyzed.terms(), "retrieved");

        // Stable sort keeps retrieval order between equal reader scores.
        let mut answers: Vec<Answer> = candidates
            .iter()
            .filter_map(|c| self.reader.read(&analyzed, &c.passage, c.score))
            .collect();
        answers.sort_by(|a, b| b.score.total_cmp(&a.score));
        answers.truncate(extraction_top_k);

        Ok(answers)
    }
}
