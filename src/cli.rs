use crate::engine::{ConnectClient, Transport};
use crate::listing::build_catalog_listing;
use crate::model::{
    Catalog, ClientConfig, RunOutcome, Selection, SessionCommand, SessionEvent,
};
use crate::orchestrator::run_session;
use crate::selection::resolve;
use crate::sink::TerminalSink;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_CANCELED: i32 = 130;

const INTERACTIVE_HELP: &str = "\
commands:
  <enter> | run     re-read the source file and run it (supersedes a running run)
  lang <id>         select a language
  proc <id>         select a processor
  task <id>         select a task
  abort             cancel the running run
  list              show the catalog
  reload            fetch the catalog again
  help              show this help
  quit              leave (Ctrl-C aborts a run, or quits when idle)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "proclet",
    version,
    about = "Run source code on a Proclet backend and stream its output"
)]
pub struct Cli {
    /// Base URL of the Proclet backend
    #[arg(long, default_value = "http://localhost:9000")]
    pub base_url: String,

    /// TCP connect timeout for backend calls
    #[arg(long, default_value = "10s")]
    pub connect_timeout: humantime::Duration,

    /// Language to run (defaults to the first one offered)
    #[arg(short, long)]
    pub language: Option<String>,

    /// Processor to run with (defaults to the first one of the language)
    #[arg(short, long)]
    pub processor: Option<String>,

    /// Task to run (defaults to the first one of the processor)
    #[arg(short, long)]
    pub task: Option<String>,

    /// Print the catalog and exit
    #[arg(long)]
    pub list: bool,

    /// Print the catalog as JSON (with --list)
    #[arg(long, requires = "list")]
    pub json: bool,

    /// Read commands from stdin and re-run FILE on demand
    #[arg(short, long, requires = "file")]
    pub interactive: bool,

    /// Do not clear the terminal when a new run starts
    #[arg(long)]
    pub no_clear: bool,

    /// Log level (overrides PROCLET_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Source file to run; `-` or omitted reads stdin
    pub file: Option<PathBuf>,
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        connect_timeout: Duration::from(args.connect_timeout),
        user_agent: format!("proclet/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Run the selected mode and return the process exit code.
pub async fn run(args: Cli) -> Result<i32> {
    let cfg = build_config(&args);
    debug!(?cfg, "client configuration");
    let client = ConnectClient::new(&cfg).context("failed to build HTTP client")?;
    let transport: Arc<dyn Transport> = Arc::new(client);

    if args.list {
        return run_list(&args, transport).await;
    }
    if args.interactive {
        return run_interactive(args, transport).await;
    }
    run_oneshot(args, transport).await
}

/// The selection requested on the command line, before resolution.
fn requested_selection(args: &Cli) -> Selection {
    Selection {
        language_id: args.language.clone(),
        processor_id: args.processor.clone(),
        task_id: args.task.clone(),
    }
}

async fn run_list(args: &Cli, transport: Arc<dyn Transport>) -> Result<i32> {
    let catalog = transport
        .fetch_catalog(CancellationToken::new())
        .await
        .context("catalog unavailable")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
    } else {
        let selection = resolve(&catalog, &requested_selection(args));
        for line in build_catalog_listing(&catalog, &selection).lines {
            println!("{line}");
        }
    }
    Ok(EXIT_OK)
}

async fn read_source(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) if path != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut source = String::new();
            tokio::io::stdin()
                .read_to_string(&mut source)
                .await
                .context("failed to read source from stdin")?;
            Ok(source)
        }
    }
}

/// A running session plus the terminal writer it renders into.
struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
    sink: TerminalSink,
    session: tokio::task::JoinHandle<crate::errors::Result<()>>,
    writer: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    fn spawn(args: &Cli, transport: Arc<dyn Transport>) -> Self {
        let clear_on_reset = !args.no_clear && std::io::stdout().is_terminal();
        let (sink, writer) = TerminalSink::spawn(clear_on_reset);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<SessionCommand>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let shutdown = CancellationToken::new();

        let session = tokio::spawn(run_session(
            transport,
            sink.clone(),
            events_tx,
            cmd_rx,
            shutdown.clone(),
        ));

        // Selection commands queue up behind the catalog fetch.
        let handle = Self {
            cmd_tx,
            events_rx,
            shutdown,
            sink,
            session,
            writer,
        };
        if let Some(id) = args.language.clone() {
            handle.send(SessionCommand::SelectLanguage(id));
        }
        if let Some(id) = args.processor.clone() {
            handle.send(SessionCommand::SelectProcessor(id));
        }
        if let Some(id) = args.task.clone() {
            handle.send(SessionCommand::SelectTask(id));
        }
        handle
    }

    fn send(&self, cmd: SessionCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    /// Stop the session and wait until all queued output is written.
    async fn finish(self) -> Result<()> {
        let _ = self.cmd_tx.send(SessionCommand::Quit);
        let res = self.session.await.context("session task failed")?;
        drop(self.sink);
        let _ = self.writer.await;
        res.context("session failed")
    }
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Completed => EXIT_OK,
        RunOutcome::Failed(_) => EXIT_FAILED,
        RunOutcome::Canceled => EXIT_CANCELED,
    }
}

async fn run_oneshot(args: Cli, transport: Arc<dyn Transport>) -> Result<i32> {
    let source = read_source(args.file.as_deref()).await?;
    let mut session = SessionHandle::spawn(&args, transport);
    session.send(SessionCommand::Trigger { source });

    let mut running = false;
    let code = loop {
        tokio::select! {
            ev = session.events_rx.recv() => match ev {
                Some(SessionEvent::CatalogUnavailable(e)) => {
                    session.sink.note(format!("catalog unavailable: {e}"));
                    break EXIT_FAILED;
                }
                Some(SessionEvent::StartRejected(sel)) => {
                    session.sink.note(format!("nothing to run for selection {sel}"));
                    break EXIT_FAILED;
                }
                Some(SessionEvent::RunStateChanged(r)) => running = r,
                Some(SessionEvent::RunFinished(finished)) => {
                    if finished.outcome != RunOutcome::Completed {
                        session.sink.note(finished.to_message());
                    }
                    break exit_code(&finished.outcome);
                }
                Some(_) => {}
                None => break EXIT_FAILED,
            },
            _ = tokio::signal::ctrl_c() => {
                if running {
                    session.send(SessionCommand::Abort);
                } else {
                    session.shutdown.cancel();
                    break EXIT_CANCELED;
                }
            }
        }
    };

    session.finish().await?;
    Ok(code)
}

/// A parsed line of interactive input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Run,
    Session(SessionCommand),
    List,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(Input::Run);
    };
    let arg = words.next();
    if words.next().is_some() {
        return Err(format!("too many arguments for '{cmd}'"));
    }

    let need_id = |arg: Option<&str>| {
        arg.map(str::to_string)
            .ok_or_else(|| format!("'{cmd}' needs an id"))
    };
    let input = match cmd {
        "run" | "r" => Input::Run,
        "lang" | "language" => Input::Session(SessionCommand::SelectLanguage(need_id(arg)?)),
        "proc" | "processor" => Input::Session(SessionCommand::SelectProcessor(need_id(arg)?)),
        "task" => Input::Session(SessionCommand::SelectTask(need_id(arg)?)),
        "abort" | "stop" => Input::Session(SessionCommand::Abort),
        "reload" => Input::Session(SessionCommand::ReloadCatalog),
        "list" | "ls" => Input::List,
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(input)
}

async fn run_interactive(args: Cli, transport: Arc<dyn Transport>) -> Result<i32> {
    let path = args.file.clone().context("--interactive needs a source FILE")?;
    if path == Path::new("-") {
        anyhow::bail!("--interactive reads commands from stdin; pass a source FILE");
    }

    let mut session = SessionHandle::spawn(&args, transport);
    session.sink.note(INTERACTIVE_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut catalog = Arc::new(Catalog::default());
    let mut selection = Selection::default();
    let mut running = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Ok(Input::Run) => match read_source(Some(&path)).await {
                        Ok(source) => session.send(SessionCommand::Trigger { source }),
                        Err(e) => session.sink.note(format!("{e:#}")),
                    },
                    Ok(Input::Session(cmd)) => session.send(cmd),
                    Ok(Input::List) => {
                        for line in build_catalog_listing(&catalog, &selection).lines {
                            session.sink.note(line);
                        }
                    }
                    Ok(Input::Help) => session.sink.note(INTERACTIVE_HELP),
                    Ok(Input::Quit) => break,
                    Err(msg) => session.sink.note(msg),
                }
            }
            ev = session.events_rx.recv() => match ev {
                Some(SessionEvent::CatalogLoaded(c)) => {
                    session.sink.note(format!("catalog loaded: {} language(s)", c.languages.len()));
                    catalog = c;
                }
                Some(SessionEvent::CatalogUnavailable(e)) => {
                    session.sink.note(format!("catalog unavailable: {e} (try 'reload')"));
                }
                Some(SessionEvent::SelectionChanged(sel)) => {
                    session.sink.note(format!("selection: {sel}"));
                    selection = sel;
                }
                Some(SessionEvent::RunStateChanged(r)) => running = r,
                Some(SessionEvent::RunStarted { run_id, selection }) => {
                    debug!(%run_id, %selection, "run started");
                }
                Some(SessionEvent::RunFinished(finished)) => {
                    session.sink.note(finished.to_message());
                }
                Some(SessionEvent::StartRejected(sel)) => {
                    session.sink.note(format!("nothing to run for selection {sel}"));
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                if running {
                    session.send(SessionCommand::Abort);
                } else {
                    break;
                }
            }
        }
    }

    session.finish().await?;
    Ok(EXIT_OK)
}
