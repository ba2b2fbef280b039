use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not extract text from {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    #[error("search pipeline error: {0}")]
    Pipeline(String),

    #[error("invalid session id: {0:?}")]
    InvalidSession(String),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("search cancelled: deadline exceeded")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("sessions directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn extraction(
        path: impl Into<PathBuf>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl From<tantivy::TantivyError> for Error {
    fn from(err: tantivy::TantivyError) -> Self {
        Self::Pipeline(err.to_string())
    }
}

/// Render an error the way every surface shows it to the user.
pub fn user_message(err: &Error) -> String {
    format!("Error: {err}")
}
