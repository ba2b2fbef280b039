//! Runtime settings shared by every surface.

use std::time::{Duration, Instant};

use crate::{
    chunking::DEFAULT_PASSAGE_WORDS,
    error::{Error, Result},
    pipeline::{DEFAULT_EXTRACTION_TOP_K, DEFAULT_RETRIEVAL_TOP_K},
};

/// Sessions unused for this long are swept.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Search deadline applied by the HTTP surface.
pub const DEFAULT_HTTP_SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest request body the HTTP surface accepts.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// When a session's index is rebuilt from its files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RebuildPolicy {
    /// Reload every file on every search.
    #[default]
    Always,
    /// Reload only after files were added or deleted since the last search.
    OnChange,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Passages handed from retrieval to the reader.
    pub retrieval_top_k: usize,
    /// Answers returned per search.
    pub extraction_top_k: usize,
    /// Maximum passage length in words.
    pub passage_words: usize,
    pub rebuild: RebuildPolicy,
    /// `None` lets searches run to completion.
    pub search_timeout: Option<Duration>,
    pub idle_ttl: Duration,
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
            extraction_top_k: DEFAULT_EXTRACTION_TOP_K,
            passage_words: DEFAULT_PASSAGE_WORDS,
            rebuild: RebuildPolicy::default(),
            search_timeout: None,
            idle_ttl: DEFAULT_IDLE_TTL,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Config {
    /// Reject settings that would make every search come back empty.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval_top_k == 0 {
            return Err(Error::Config("retrieval_top_k must be at least 1".into()));
        }
        if self.extraction_top_k == 0 {
            return Err(Error::Config("extraction_top_k must be at least 1".into()));
        }
        if self.passage_words == 0 {
            return Err(Error::Config("passage_words must be at least 1".into()));
        }
        Ok(())
    }

    /// Deadline for a search starting now.
    pub fn deadline(&self) -> Deadline {
        match self.search_timeout {
            Some(timeout) => Deadline::after(timeout),
            None => Deadline::none(),
        }
    }
}

/// Point in time after which a search gives up.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    pub fn is_expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    /// `Err(Cancelled)` once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retrieval_top_k, 10);
        assert_eq!(config.extraction_top_k, 5);
        assert_eq!(config.passage_words, 200);
        assert_eq!(config.rebuild, RebuildPolicy::Always);
        assert!(config.search_timeout.is_none());
    }

    #[test]
    fn zero_breadth_is_rejected() {
        let config = Config {
            extraction_top_k: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn no_deadline_never_expires() {
        assert!(Deadline::none().check().is_ok());
        assert!(Config::default().deadline().check().is_ok());
    }

    #[test]
    fn zero_timeout_is_already_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.is_expired());
        assert!(matches!(deadline.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn long_timeout_is_not_expired() {
        assert!(Deadline::after(Duration::from_secs(3600)).check().is_ok());
    }
}
