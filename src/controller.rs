//! The three user actions, and the rendering of their results.
//!
//! Every session gets its own [`QueryPipeline`] instance, so passages from
//! one session can never surface in another session's results. The
//! pipeline is locked for the whole load-then-answer sequence; the session
//! directory is only held shared while its files are being read.

use std::{
    collections::HashMap,
    io::Read,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    chunking::ChunkingConfig,
    config::{Config, Deadline, RebuildPolicy},
    error::Result,
    extract::Extractors,
    loader::{LoadWarning, load_all},
    pipeline::{ExtractivePipeline, QueryPipeline},
    reader::Answer,
    session_id::SessionId,
    session_store::{SessionStore, Upload},
    text_util::normalize_whitespace,
};

/// Shown instead of results when a search finds nothing.
pub const NO_RESULTS: &str = "No passages found.";

/// Shown after a session was cleared.
pub const ALL_DELETED: &str = "All files were deleted.";

const DIVIDER: &str = "\n---\n";

/// Builds a fresh pipeline for a session seen for the first time.
pub type PipelineFactory =
    Box<dyn Fn() -> Result<Box<dyn QueryPipeline>> + Send + Sync>;

struct SessionIndex {
    pipeline: Box<dyn QueryPipeline>,
    /// Store generation the pipeline was last loaded from.
    loaded: Option<u64>,
    warnings: Vec<LoadWarning>,
}

/// Result of a search before rendering.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub answers: Vec<Answer>,
    /// Files skipped while loading the session.
    pub skipped: Vec<LoadWarning>,
}

impl SearchOutcome {
    pub fn render(&self) -> String {
        let mut out = render_answers(&self.answers);
        if let Some(note) = render_skipped(&self.skipped) {
            out.push_str("\n\n");
            out.push_str(&note);
        }
        out
    }
}

pub struct SessionController {
    store: SessionStore,
    extractors: Extractors,
    config: Config,
    factory: PipelineFactory,
    indexes: Mutex<HashMap<SessionId, Arc<Mutex<SessionIndex>>>>,
}

impl SessionController {
    /// A controller using the default extractors and the extractive
    /// pipeline.
    pub fn new(store: SessionStore, config: Config) -> Self {
        Self::with_parts(
            store,
            config,
            Extractors::default(),
            Box::new(|| -> Result<Box<dyn QueryPipeline>> {
                Ok(Box::new(ExtractivePipeline::new()?))
            }),
        )
    }

    pub fn with_parts(
        store: SessionStore,
        config: Config,
        extractors: Extractors,
        factory: PipelineFactory,
    ) -> Self {
        Self {
            store,
            extractors,
            config,
            factory,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Store uploads in the session and report how many were written.
    pub fn add_files<R: Read>(
        &self,
        id: &SessionId,
        files: Vec<Upload<R>>,
    ) -> Result<String> {
        let count = self.store.add_files(id, files)?;
        Ok(format!("{count} file(s) added."))
    }

    /// Remove every file of the session.
    pub fn delete_files(&self, id: &SessionId) -> Result<String> {
        self.store.clear_session(id)?;
        Ok(ALL_DELETED.to_string())
    }

    pub fn list_files(&self, id: &SessionId) -> Result<Vec<PathBuf>> {
        self.store.list_session_files(id)
    }

    /// Search the session's files and render the answers, using the
    /// configured search timeout.
    pub fn search(&self, id: &SessionId, query: &str) -> Result<String> {
        self.search_with(id, query, &self.config.deadline())
    }

    pub fn search_with(
        &self,
        id: &SessionId,
        query: &str,
        deadline: &Deadline,
    ) -> Result<String> {
        Ok(self.query(id, query, deadline)?.render())
    }

    /// Search without rendering.
    pub fn query(
        &self,
        id: &SessionId,
        query: &str,
        deadline: &Deadline,
    ) -> Result<SearchOutcome> {
        let slot = self.index_for(id)?;
        let mut index = slot.lock().unwrap_or_else(PoisonError::into_inner);

        self.refresh(id, &mut index, deadline)?;
        deadline.check()?;

        let answers = index.pipeline.answer(
            query,
            self.config.retrieval_top_k,
            self.config.extraction_top_k,
        )?;
        info!(session = id.short(), answers = answers.len(), "search complete");

        Ok(SearchOutcome {
            answers,
            skipped: index.warnings.clone(),
        })
    }

    /// Delete idle sessions and forget their indexes.
    pub fn evict_idle(&self, max_idle: Duration) -> Result<Vec<SessionId>> {
        let evicted = self.store.evict_idle(max_idle)?;
        let mut indexes =
            self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        for id in &evicted {
            indexes.remove(id);
        }
        Ok(evicted)
    }

    fn index_for(&self, id: &SessionId) -> Result<Arc<Mutex<SessionIndex>>> {
        let mut indexes =
            self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = indexes.get(id) {
            return Ok(slot.clone());
        }

        let slot = Arc::new(Mutex::new(SessionIndex {
            pipeline: (self.factory)()?,
            loaded: None,
            warnings: Vec::new(),
        }));
        indexes.insert(id.clone(), slot.clone());
        Ok(slot)
    }

    fn refresh(
        &self,
        id: &SessionId,
        index: &mut SessionIndex,
        deadline: &Deadline,
    ) -> Result<()> {
        let chunking = ChunkingConfig {
            passage_words: self.config.passage_words,
            ..ChunkingConfig::default()
        };

        let report = self.store.with_shared(id, |dir| {
            // Writers bump the generation under the exclusive lock, so it
            // cannot move while this closure runs.
            let generation = self.store.generation(id);
            if self.config.rebuild == RebuildPolicy::OnChange
                && index.loaded == Some(generation)
            {
                return Ok(None);
            }
            let report = load_all(dir, &self.extractors, &chunking, deadline)?;
            Ok(Some((generation, report)))
        })?;

        let Some((generation, report)) = report else {
            debug!(session = id.short(), "index up to date");
            return Ok(());
        };

        index.loaded = None;
        index.pipeline.reset_and_load(&report.passages)?;
        index.loaded = Some(generation);
        index.warnings = report.warnings;
        debug!(
            session = id.short(),
            files = report.loaded_files,
            passages = report.passages.len(),
            "index rebuilt"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Render answers as excerpt blocks separated by a divider.
pub fn render_answers(answers: &[Answer]) -> String {
    if answers.is_empty() {
        return NO_RESULTS.to_string();
    }

    answers
        .iter()
        .map(|a| {
            format!(
                "**Excerpt:** {}\n\n**File:** {}\n**Path:** {}",
                normalize_whitespace(&a.context),
                a.meta.name,
                a.meta.path,
            )
        })
        .collect::<Vec<_>>()
        .join(DIVIDER)
}

fn render_skipped(skipped: &[LoadWarning]) -> Option<String> {
    if skipped.is_empty() {
        return None;
    }
    let files = skipped
        .iter()
        .map(|w| format!("{} ({})", w.name, w.reason))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("_Skipped {} file(s): {files}_", skipped.len()))
}
