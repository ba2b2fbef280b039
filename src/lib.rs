//! docsift - per-session document upload and passage search.
//!
//! Users drop PDF, TXT and DOCX files into a private session. A search
//! re-reads the session's files, indexes their passages in memory with
//! [Tantivy](https://github.com/quickwit-oss/tantivy) and extracts the
//! sentences that best answer the query, along with the file each one came
//! from.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{Config, DataDir, SessionController, SessionId, SessionStore};
//! use docsift::session_store::Upload;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let controller =
//!     SessionController::new(SessionStore::new(data_dir.root()), Config::default());
//!
//! let session = SessionId::generate();
//! let text = "The quick brown fox jumps over the lazy dog.";
//! controller
//!     .add_files(&session, vec![Upload::new("doc.txt", text.as_bytes())])
//!     .unwrap();
//!
//! println!("{}", controller.search(&session, "brown fox").unwrap());
//! ```

pub mod chunking;
pub mod cli;
pub mod config;
pub mod controller;
pub mod data_dir;
pub mod error;
pub mod extract;
pub mod loader;
pub mod mcp;
pub mod pipeline;
pub mod reader;
pub mod session_id;
pub mod session_store;
pub mod tantivy_index;
pub mod text_util;
pub mod walker;
pub mod web;

pub use config::{Config, RebuildPolicy};
pub use controller::SessionController;
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use pipeline::{ExtractivePipeline, QueryPipeline};
pub use session_id::SessionId;
pub use session_store::SessionStore;
