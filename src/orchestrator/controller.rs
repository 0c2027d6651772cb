//! Run lifecycle controller.
//!
//! Owns the catalog snapshot, the current selection and the single active-run
//! slot. Starting a run always retires the previous one first, so at most one
//! stream ever feeds the display.

use bytes::Bytes;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consumer::{ConsumerEvent, StreamConsumer};
use crate::engine::Transport;
use crate::errors::{ProcletError, Result, TransportError};
use crate::model::{
    Catalog, OutputChannel, OutputEvent, RunFinished, RunId, RunOutcome, RunRequest, Selection,
    SessionEvent, SourceFile,
};
use crate::selection::resolve;
use crate::sink::DisplaySink;

/// One execution attempt. Never changes after creation.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    pub source: String,
    pub language_id: String,
    pub processor_id: String,
    pub task_id: String,
    cancel: CancellationToken,
}

struct ActiveRun {
    run: Run,
    consumer: StreamConsumer,
}

pub struct RunController<S: DisplaySink> {
    transport: Arc<dyn Transport>,
    sink: S,
    catalog: Arc<Catalog>,
    selection: Selection,
    last_run_id: u64,
    active: Option<ActiveRun>,
    running: bool,
    events: UnboundedSender<SessionEvent>,
}

impl<S: DisplaySink> RunController<S> {
    /// Create a controller with an empty catalog. Nothing can run until a
    /// catalog is loaded.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: S,
        events: UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            sink,
            catalog: Arc::new(Catalog::default()),
            selection: Selection::default(),
            last_run_id: 0,
            active: None,
            running: false,
            events,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn currently_running(&self) -> bool {
        self.running
    }

    pub fn active_run(&self) -> Option<&Run> {
        self.active.as_ref().map(|a| &a.run)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Fetch the catalog and install it. No retry here; callers decide.
    pub async fn load_catalog(&mut self, cancel: CancellationToken) -> Result<()> {
        let fetched = self.transport.fetch_catalog(cancel).await;
        self.install_catalog(fetched)
    }

    /// Install the result of a catalog fetch made elsewhere. A failure keeps
    /// the current catalog and is reported as `CatalogUnavailable`.
    pub fn install_catalog(
        &mut self,
        fetched: std::result::Result<Catalog, TransportError>,
    ) -> Result<()> {
        match fetched {
            Ok(catalog) => {
                self.set_catalog(catalog);
                Ok(())
            }
            Err(e) => {
                self.emit(SessionEvent::CatalogUnavailable(e.clone()));
                Err(ProcletError::CatalogUnavailable(e))
            }
        }
    }

    /// Replace the catalog snapshot and repair the selection against it.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        let catalog = Arc::new(catalog);
        self.catalog = catalog.clone();
        self.emit(SessionEvent::CatalogLoaded(catalog));
        self.update_selection(self.selection.clone());
    }

    pub fn select_language(&mut self, id: impl Into<String>) -> &Selection {
        let id = id.into();
        if self.catalog.language(&id).is_none() {
            warn!(language = %id, "unknown language; falling back");
        }
        let wanted = Selection {
            language_id: Some(id),
            ..self.selection.clone()
        };
        self.update_selection(wanted)
    }

    pub fn select_processor(&mut self, id: impl Into<String>) -> &Selection {
        let id = id.into();
        let known = self
            .selection
            .language_id
            .as_deref()
            .and_then(|l| self.catalog.language(l))
            .and_then(|l| l.processor(&id))
            .is_some();
        if !known {
            warn!(processor = %id, "unknown processor for selected language; falling back");
        }
        let wanted = Selection {
            processor_id: Some(id),
            ..self.selection.clone()
        };
        self.update_selection(wanted)
    }

    pub fn select_task(&mut self, id: impl Into<String>) -> &Selection {
        let id = id.into();
        let wanted = Selection {
            task_id: Some(id),
            ..self.selection.clone()
        };
        let resolved = resolve(&self.catalog, &wanted);
        if resolved.task_id != wanted.task_id {
            warn!(task = ?wanted.task_id, "unknown task for selected processor; falling back");
        }
        self.update_selection(wanted)
    }

    /// Start a new run of `source`, superseding any active one.
    ///
    /// The old run is canceled and retired and the sink is reset before the
    /// new request exists. With an incomplete selection nothing is issued and
    /// the running flag drops.
    pub fn start(&mut self, source: &str) -> Result<RunId> {
        if let Some(old) = self.retire_active() {
            info!(run_id = old.run_id.0, "run superseded");
            self.emit(SessionEvent::RunFinished(old));
        }

        self.sink.reset();

        self.update_selection(self.selection.clone());
        let catalog = self.catalog.clone();
        let Some((language, processor, task)) = catalog.lookup(&self.selection) else {
            warn!(selection = %self.selection, "refusing to start: incomplete selection");
            self.set_running(false);
            self.emit(SessionEvent::StartRejected(self.selection.clone()));
            return Err(ProcletError::IncompleteSelection(self.selection.clone()));
        };

        self.last_run_id += 1;
        let run = Run {
            id: RunId(self.last_run_id),
            source: source.to_string(),
            language_id: language.id.clone(),
            processor_id: processor.id.clone(),
            task_id: task.id.clone(),
            cancel: CancellationToken::new(),
        };
        let request = RunRequest {
            language_id: run.language_id.clone(),
            processor_id: run.processor_id.clone(),
            task_id: run.task_id.clone(),
            files: vec![SourceFile {
                path: processor.default_filename.clone(),
                content: Bytes::from(source.as_bytes().to_vec()),
            }],
        };

        info!(
            run_id = run.id.0,
            language = %run.language_id,
            processor = %run.processor_id,
            task = %run.task_id,
            bytes = source.len(),
            "starting run"
        );
        self.set_running(true);
        let stream = self.transport.run_oneshot(request, run.cancel.clone());
        let consumer = StreamConsumer::new(run.id, stream, run.cancel.clone());
        let id = run.id;
        self.active = Some(ActiveRun { run, consumer });
        self.emit(SessionEvent::RunStarted {
            run_id: id,
            selection: self.selection.clone(),
        });
        Ok(id)
    }

    /// Cancel the active run, if any. Canceling when idle is a no-op.
    pub fn abort(&mut self) -> Option<RunFinished> {
        let finished = self.retire_active()?;
        info!(run_id = finished.run_id.0, "run aborted");
        self.set_running(false);
        self.emit(SessionEvent::RunFinished(finished.clone()));
        Some(finished)
    }

    /// Pump the active run: forward its output until it reaches a terminal
    /// outcome, then clear the running flag and return that outcome. Pends
    /// forever while idle.
    ///
    /// Cancel safe, so it can sit in a `select!` next to a command channel.
    pub async fn drive(&mut self) -> RunFinished {
        loop {
            let Some(active) = self.active.as_mut() else {
                return futures::future::pending().await;
            };
            let event = active.consumer.next_event().await;
            match event {
                Some(ConsumerEvent::Output(output)) => self.forward(output),
                Some(ConsumerEvent::Finished(finished)) => {
                    self.active = None;
                    self.set_running(false);
                    self.emit(SessionEvent::RunFinished(finished.clone()));
                    return finished;
                }
                None => {
                    // The consumer already handed out its outcome elsewhere.
                    self.active = None;
                    self.set_running(false);
                }
            }
        }
    }

    /// Forward one chunk, but only while its run still owns the display.
    fn forward(&mut self, output: OutputEvent) {
        let live = self.active.as_ref().map(|a| a.run.id) == Some(output.run_id);
        if !live {
            debug!(run_id = output.run_id.0, "dropping output of superseded run");
            return;
        }
        match output.channel {
            OutputChannel::Stdout => self.sink.write(&output.bytes),
            OutputChannel::Stderr => self.sink.write_stderr(&output.bytes),
        }
    }

    /// Cancel the active run and collect its terminal outcome without
    /// touching the running flag.
    fn retire_active(&mut self) -> Option<RunFinished> {
        let mut active = self.active.take()?;
        active.run.cancel.cancel();
        // A canceled consumer reports on its first poll.
        let finished = match active.consumer.next_event().now_or_never() {
            Some(Some(ConsumerEvent::Finished(finished))) => finished,
            _ => RunFinished {
                run_id: active.run.id,
                outcome: RunOutcome::Canceled,
                stats: active.consumer.stats(),
            },
        };
        Some(finished)
    }

    fn update_selection(&mut self, wanted: Selection) -> &Selection {
        let resolved = resolve(&self.catalog, &wanted);
        if resolved != self.selection {
            debug!(selection = %resolved, "selection changed");
            self.selection = resolved;
            self.emit(SessionEvent::SelectionChanged(self.selection.clone()));
        }
        &self.selection
    }

    fn set_running(&mut self, running: bool) {
        if self.running != running {
            self.running = running;
            self.emit(SessionEvent::RunStateChanged(running));
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
