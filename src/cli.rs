use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::config::{
    Config,
    DEFAULT_HTTP_SEARCH_TIMEOUT,
    DEFAULT_IDLE_TTL,
    DEFAULT_MAX_UPLOAD_BYTES,
    RebuildPolicy,
};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Upload documents into private sessions and search them for passages"
)]
pub struct Cli {
    /// Root directory holding one subdirectory per session
    #[arg(long, global = true, env = "DOCSIFT_SESSIONS_DIR")]
    pub sessions_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(flatten)]
    pub search: SearchSettings,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Copy files into a session
    Add(AddArgs),
    /// Delete every file of a session
    Delete(SessionArgs),
    /// List the files stored in a session
    List(ListArgs),
    /// Search a session for passages answering a query
    Search(SearchArgs),
    /// Delete sessions that have been idle for too long
    Sweep(SweepArgs),
    /// Serve the browser UI
    Serve(ServeArgs),
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// Create a new session and print its token
    New,
    /// List every session under the sessions directory
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Search tuning shared by every command that runs searches.
#[derive(Debug, Clone, Args)]
pub struct SearchSettings {
    /// Passages handed from retrieval to answer extraction
    #[arg(long, global = true, env = "DOCSIFT_RETRIEVAL_TOP_K", default_value_t = 10)]
    pub retrieval_top_k: usize,

    /// Answers returned per search
    #[arg(long, global = true, env = "DOCSIFT_EXTRACTION_TOP_K", default_value_t = 5)]
    pub extraction_top_k: usize,

    /// Maximum passage length in words
    #[arg(long, global = true, env = "DOCSIFT_PASSAGE_WORDS", default_value_t = 200)]
    pub passage_words: usize,

    /// When to rebuild a session's index
    #[arg(
        long,
        global = true,
        env = "DOCSIFT_REBUILD",
        value_enum,
        default_value_t = RebuildPolicy::Always
    )]
    pub rebuild: RebuildPolicy,

    /// Give up on a search after this many seconds
    #[arg(long, global = true, env = "DOCSIFT_SEARCH_TIMEOUT_SECS")]
    pub search_timeout_secs: Option<u64>,
}

impl SearchSettings {
    /// Build a [`Config`], using `default_timeout` when no timeout flag was
    /// given.
    pub fn to_config(&self, default_timeout: Option<Duration>) -> Config {
        Config {
            retrieval_top_k: self.retrieval_top_k,
            extraction_top_k: self.extraction_top_k,
            passage_words: self.passage_words,
            rebuild: self.rebuild,
            search_timeout: self
                .search_timeout_secs
                .map(Duration::from_secs)
                .or(default_timeout),
            ..Config::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    /// Session token
    #[arg(short, long, env = "DOCSIFT_SESSION")]
    pub session: String,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// The search query
    pub query: String,

    /// Output answers as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Sessions unused for longer than this are deleted
    #[arg(long, env = "DOCSIFT_IDLE_TTL_SECS", default_value_t = DEFAULT_IDLE_TTL.as_secs())]
    pub max_idle_secs: u64,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "DOCSIFT_BIND", default_value = "127.0.0.1:7860")]
    pub bind: SocketAddr,

    /// Sessions unused for longer than this are deleted
    #[arg(long, env = "DOCSIFT_IDLE_TTL_SECS", default_value_t = DEFAULT_IDLE_TTL.as_secs())]
    pub idle_ttl_secs: u64,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "DOCSIFT_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl ServeArgs {
    pub fn to_config(&self, search: &SearchSettings) -> Config {
        Config {
            idle_ttl: Duration::from_secs(self.idle_ttl_secs),
            max_upload_bytes: self.max_upload_bytes,
            ..search.to_config(Some(DEFAULT_HTTP_SEARCH_TIMEOUT))
        }
    }
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docsift",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    const TOKEN: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docsift", "search", "--session", TOKEN, "brown fox"]);
        let config = cli.search.to_config(None);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.query, "brown fox");
                assert_eq!(args.session.session, TOKEN);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
        assert_eq!(config.retrieval_top_k, 10);
        assert_eq!(config.extraction_top_k, 5);
        assert_eq!(config.rebuild, RebuildPolicy::Always);
        assert!(config.search_timeout.is_none());
    }

    #[test]
    fn parse_add_with_many_files() {
        let cli = Cli::parse_from(["docsift", "add", "-s", TOKEN, "a.txt", "b.pdf"]);
        match cli.command {
            Command::Add(args) => assert_eq!(args.files.len(), 2),
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn global_tuning_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "docsift",
            "search",
            "-s",
            TOKEN,
            "q",
            "--extraction-top-k",
            "2",
            "--rebuild",
            "on-change",
        ]);
        let config = cli.search.to_config(None);
        assert_eq!(config.extraction_top_k, 2);
        assert_eq!(config.rebuild, RebuildPolicy::OnChange);
    }

    #[test]
    fn serve_gets_http_timeout_by_default() {
        let cli = Cli::parse_from(["docsift", "serve"]);
        match cli.command {
            Command::Serve(args) => {
                let config = args.to_config(&cli.search);
                assert_eq!(config.search_timeout, Some(DEFAULT_HTTP_SEARCH_TIMEOUT));
                assert_eq!(config.idle_ttl, DEFAULT_IDLE_TTL);
                assert_eq!(args.bind.port(), 7860);
            }
            _ => panic!("expected serve command"),
        }
    }
}
