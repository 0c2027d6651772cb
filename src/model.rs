use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::TransportError;

/// Connection settings for the execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub user_agent: String,
}

/// Snapshot of everything the backend can run. Immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub languages: Vec<Language>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    pub id: String,
    pub display_name: String,
    pub processors: Vec<Processor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Processor {
    pub id: String,
    pub display_name: String,
    pub default_filename: String,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub kind: TaskKind,
}

/// How the backend presents a task. Purely informational on this side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Action,
    Tool,
    #[default]
    Unspecified,
}

impl TaskKind {
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "action" => TaskKind::Action,
            "tool" => TaskKind::Tool,
            _ => TaskKind::Unspecified,
        }
    }
}

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn language(&self, id: &str) -> Option<&Language> {
        self.languages.iter().find(|l| l.id == id)
    }

    /// Look up the full (language, processor, task) triple named by a selection.
    /// Returns `None` unless every level is set and present.
    pub fn lookup(&self, selection: &Selection) -> Option<(&Language, &Processor, &Task)> {
        let language = self.language(selection.language_id.as_deref()?)?;
        let processor = language.processor(selection.processor_id.as_deref()?)?;
        let task = processor.task(selection.task_id.as_deref()?)?;
        Some((language, processor, task))
    }
}

impl Language {
    pub fn processor(&self, id: &str) -> Option<&Processor> {
        self.processors.iter().find(|p| p.id == id)
    }
}

impl Processor {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// The user's currently chosen language, processor and task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Selection {
    pub language_id: Option<String>,
    pub processor_id: Option<String>,
    pub task_id: Option<String>,
}

impl Selection {
    pub fn new(
        language_id: impl Into<String>,
        processor_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self {
            language_id: Some(language_id.into()),
            processor_id: Some(processor_id.into()),
            task_id: Some(task_id.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.language_id.is_some() && self.processor_id.is_some() && self.task_id.is_some()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |id: &Option<String>| id.clone().unwrap_or_else(|| "-".into());
        write!(
            f,
            "{}/{}/{}",
            part(&self.language_id),
            part(&self.processor_id),
            part(&self.task_id)
        )
    }
}

/// Identity of one execution attempt. Strictly increasing per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: Bytes,
}

/// Body of a `RunOneshot` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub language_id: String,
    pub processor_id: String,
    pub task_id: String,
    pub files: Vec<SourceFile>,
}

/// One message of the `RunOneshot` response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResponse {
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Primary program output.
    Stdout(Bytes),
    /// Program error output. Never mixed into the primary channel.
    Stderr(Bytes),
    /// A payload case this client does not know about.
    Unrecognized,
}

/// Which display channel an output chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

/// A single chunk of execution output, ordered only relative to its own run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub run_id: RunId,
    pub channel: OutputChannel,
    pub bytes: Bytes,
}

/// How a run's stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The server closed the stream without error.
    Completed,
    /// The run was superseded or aborted. Not a failure.
    Canceled,
    /// Transport or application failure other than cancellation.
    Failed(TransportError),
}

impl RunOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Counters for output forwarded to the display during one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub chunks: u64,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFinished {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub stats: RunStats,
}

impl RunFinished {
    /// Render the terminal annotation shown after a run's output.
    pub fn to_message(&self) -> String {
        let secs = self.stats.elapsed.as_secs_f64();
        match &self.outcome {
            RunOutcome::Completed => format!(
                "[run {} finished in {:.2}s, {} bytes]",
                self.run_id, secs, self.stats.bytes
            ),
            RunOutcome::Canceled => format!("[run {} canceled after {:.2}s]", self.run_id, secs),
            RunOutcome::Failed(e) => format!("[run {} failed: {}]", self.run_id, e),
        }
    }
}

/// Observable state changes emitted for presentation layers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    CatalogLoaded(Arc<Catalog>),
    CatalogUnavailable(TransportError),
    SelectionChanged(Selection),
    RunStateChanged(bool),
    RunStarted {
        run_id: RunId,
        selection: Selection,
    },
    RunFinished(RunFinished),
    /// A trigger was refused because the catalog offers nothing to run.
    StartRejected(Selection),
}

/// Commands accepted by the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Trigger { source: String },
    SelectLanguage(String),
    SelectProcessor(String),
    SelectTask(String),
    Abort,
    ReloadCatalog,
    Quit,
}
