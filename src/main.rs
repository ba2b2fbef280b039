use std::{path::Path, process::ExitCode, time::Duration};

use clap::Parser;
use docsift::{
    DataDir,
    SessionController,
    SessionId,
    SessionStore,
    cli::{self, Cli, Command, SessionAction},
    config::Config,
    error::{self, Error},
    mcp,
    session_store::Upload,
    web,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", error::user_message(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> error::Result<()> {
    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.sessions_dir.as_deref())?;
    let store = SessionStore::new(data_dir.root());

    match cli.command {
        Command::Session { action } => match action {
            SessionAction::New => {
                let id = SessionId::generate();
                store.get_or_create_session_dir(&id)?;
                println!("{id}");
            }
            SessionAction::List { json } => {
                session_list(&store, json)?;
            }
        },
        Command::Add(args) => {
            let id = parse_session(&args.session)?;
            let controller = controller(store, cli.search.to_config(None))?;
            cmd_add(&controller, &id, &args.files)?;
        }
        Command::Delete(args) => {
            let id = parse_session(&args)?;
            let controller = controller(store, cli.search.to_config(None))?;
            println!("{}", controller.delete_files(&id)?);
        }
        Command::List(args) => {
            let id = parse_session(&args.session)?;
            cmd_list(&store, &id, args.json)?;
        }
        Command::Search(args) => {
            let id = parse_session(&args.session)?;
            let controller = controller(store, cli.search.to_config(None))?;
            cmd_search(&controller, &id, &args)?;
        }
        Command::Sweep(args) => {
            let controller = controller(store, cli.search.to_config(None))?;
            let evicted =
                controller.evict_idle(Duration::from_secs(args.max_idle_secs))?;
            println!("Removed {} idle session(s).", evicted.len());
        }
        Command::Serve(args) => {
            let config = args.to_config(&cli.search);
            let controller = controller(store, config)?;
            web::run_server(controller, args.bind)?;
        }
        Command::Mcp => {
            let controller = controller(store, cli.search.to_config(None))?;
            mcp::run_mcp(controller)?;
        }
        Command::Completions(args) => args.generate(),
    }

    Ok(())
}

fn controller(
    store: SessionStore,
    config: Config,
) -> error::Result<SessionController> {
    config.validate()?;
    Ok(SessionController::new(store, config))
}

fn parse_session(args: &cli::SessionArgs) -> error::Result<SessionId> {
    args.session.parse()
}

fn cmd_add(
    controller: &SessionController,
    id: &SessionId,
    files: &[std::path::PathBuf],
) -> error::Result<()> {
    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidFileName(path.display().to_string()))?;
        let file = std::fs::File::open(path).map_err(|source| Error::Storage {
            path: path.clone(),
            source,
        })?;
        uploads.push(Upload::new(name, file));
    }

    println!("{}", controller.add_files(id, uploads)?);
    Ok(())
}

fn cmd_list(store: &SessionStore, id: &SessionId, json: bool) -> error::Result<()> {
    let dir = store.session_dir(id);
    let files = store.list_session_files(id)?;
    let relative: Vec<String> = files
        .iter()
        .map(|f| relative_display(&dir, f))
        .collect();

    if json {
        let value = serde_json::json!({
            "session": id.as_str(),
            "path": dir.to_string_lossy(),
            "files": relative,
        });
        println!("{value}");
    } else if relative.is_empty() {
        println!("No files in session.");
    } else {
        for file in &relative {
            println!("{file}");
        }
    }
    Ok(())
}

fn session_list(store: &SessionStore, json: bool) -> error::Result<()> {
    let sessions = store.sessions()?;

    if json {
        let ids: Vec<&str> = sessions.iter().map(SessionId::as_str).collect();
        println!("{}", serde_json::json!(ids));
    } else if sessions.is_empty() {
        println!("No sessions.");
    } else {
        for id in &sessions {
            println!("{id}");
        }
    }
    Ok(())
}

fn cmd_search(
    controller: &SessionController,
    id: &SessionId,
    args: &cli::SearchArgs,
) -> error::Result<()> {
    let deadline = controller.config().deadline();

    if args.json {
        let outcome = controller.query(id, &args.query, &deadline)?;
        let value = serde_json::json!({
            "query": args.query,
            "answers": outcome.answers,
            "skipped": outcome.skipped,
        });
        println!("{value}");
    } else {
        println!("{}", controller.search_with(id, &args.query, &deadline)?);
    }

    info!(session = id.short(), "search finished");
    Ok(())
}

fn relative_display(dir: &Path, file: &Path) -> String {
    file.strip_prefix(dir)
        .unwrap_or(file)
        .to_string_lossy()
        .into_owned()
}
