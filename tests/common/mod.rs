#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as fmpsc;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use proclet::engine::{ResponseStream, Transport};
use proclet::errors::TransportError;
use proclet::model::{
    Catalog, Language, Processor, ResponsePayload, RunRequest, RunResponse, SessionEvent, Task,
    TaskKind,
};

static INIT: Once = Once::new();

/// Initialise tracing for tests. Logs are captured per test and only shown
/// for failures; enable levels with `PROCLET_LOG=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("PROCLET_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

type Item = Result<RunResponse, TransportError>;

/// One `run_oneshot` call seen by [`ScriptedTransport`].
pub struct Call {
    pub request: RunRequest,
    pub cancel: CancellationToken,
    /// Whether every earlier call had already been canceled when this one
    /// was issued.
    pub earlier_canceled: bool,
    tx: Option<fmpsc::UnboundedSender<Item>>,
}

enum CatalogAnswer {
    Ready(Result<Catalog, TransportError>),
    /// Never answers; only cancellation ends the fetch.
    Hang,
}

/// In-memory transport. Catalog answers are queued up front; every run gets
/// a channel the test feeds by hand.
#[derive(Default)]
pub struct ScriptedTransport {
    catalogs: Mutex<VecDeque<CatalogAnswer>>,
    fetches: Mutex<Vec<CancellationToken>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_catalog(catalog: Catalog) -> Arc<Self> {
        let t = Self::default();
        t.queue_catalog(Ok(catalog));
        Arc::new(t)
    }

    /// Answer for the next catalog fetch. Once the queue is empty, fetches
    /// return an empty catalog.
    pub fn queue_catalog(&self, answer: Result<Catalog, TransportError>) {
        self.catalogs
            .lock()
            .unwrap()
            .push_back(CatalogAnswer::Ready(answer));
    }

    /// Make the next catalog fetch hang until it is canceled.
    pub fn hang_catalog(&self) {
        self.catalogs.lock().unwrap().push_back(CatalogAnswer::Hang);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn fetch_token(&self, idx: usize) -> CancellationToken {
        self.fetches.lock().unwrap()[idx].clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn request(&self, idx: usize) -> RunRequest {
        self.calls.lock().unwrap()[idx].request.clone()
    }

    pub fn cancel_token(&self, idx: usize) -> CancellationToken {
        self.calls.lock().unwrap()[idx].cancel.clone()
    }

    pub fn earlier_canceled(&self, idx: usize) -> bool {
        self.calls.lock().unwrap()[idx].earlier_canceled
    }

    pub fn push(&self, idx: usize, item: Item) {
        let calls = self.calls.lock().unwrap();
        if let Some(tx) = &calls[idx].tx {
            // The receiver is gone once the consumer dropped the stream.
            let _ = tx.unbounded_send(item);
        }
    }

    pub fn stdout(&self, idx: usize, text: &str) {
        self.push(idx, Ok(stdout(text)));
    }

    /// End the stream of call `idx` normally.
    pub fn close(&self, idx: usize) {
        self.calls.lock().unwrap()[idx].tx = None;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch_catalog(&self, cancel: CancellationToken) -> Result<Catalog, TransportError> {
        self.fetches.lock().unwrap().push(cancel.clone());
        if cancel.is_cancelled() {
            return Err(TransportError::Canceled);
        }
        let answer = self.catalogs.lock().unwrap().pop_front();
        match answer {
            Some(CatalogAnswer::Ready(res)) => res,
            Some(CatalogAnswer::Hang) => {
                cancel.cancelled().await;
                Err(TransportError::Canceled)
            }
            None => Ok(Catalog::default()),
        }
    }

    fn run_oneshot(&self, request: RunRequest, cancel: CancellationToken) -> ResponseStream {
        let (tx, rx) = fmpsc::unbounded();
        let mut calls = self.calls.lock().unwrap();
        let earlier_canceled = calls.iter().all(|c| c.cancel.is_cancelled());
        calls.push(Call {
            request,
            cancel,
            earlier_canceled,
            tx: Some(tx),
        });
        rx.boxed()
    }
}

pub fn stdout(text: &str) -> RunResponse {
    RunResponse {
        payload: ResponsePayload::Stdout(Bytes::copy_from_slice(text.as_bytes())),
    }
}

pub fn stderr(text: &str) -> RunResponse {
    RunResponse {
        payload: ResponsePayload::Stderr(Bytes::copy_from_slice(text.as_bytes())),
    }
}

pub fn unrecognized() -> RunResponse {
    RunResponse {
        payload: ResponsePayload::Unrecognized,
    }
}

fn task(id: &str, display_name: &str) -> Task {
    Task {
        id: id.into(),
        display_name: display_name.into(),
        kind: TaskKind::Action,
    }
}

/// Two languages: `py` (processors `cpython`, `pypy`) and `rust` (`rustc`).
pub fn catalog() -> Catalog {
    Catalog {
        languages: vec![
            Language {
                id: "py".into(),
                display_name: "Python".into(),
                processors: vec![
                    Processor {
                        id: "cpython".into(),
                        display_name: "CPython 3.12".into(),
                        default_filename: "main.py".into(),
                        tasks: vec![task("run", "Run"), task("test", "Test")],
                    },
                    Processor {
                        id: "pypy".into(),
                        display_name: "PyPy".into(),
                        default_filename: "main.py".into(),
                        tasks: vec![task("run", "Run")],
                    },
                ],
            },
            Language {
                id: "rust".into(),
                display_name: "Rust".into(),
                processors: vec![Processor {
                    id: "rustc".into(),
                    display_name: "rustc stable".into(),
                    default_filename: "main.rs".into(),
                    tasks: vec![task("run", "Run")],
                }],
            },
        ],
    }
}

/// Wait for the first session event matching `pred`, skipping others.
pub async fn wait_for<F>(rx: &mut UnboundedReceiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for session event")
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub async fn eventually<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let held = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    held.expect("condition never held");
}

/// Everything already queued on `rx`.
pub fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/// The `RunStateChanged` values among `events`, in order.
pub fn running_flags(events: &[SessionEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::RunStateChanged(r) => Some(*r),
            _ => None,
        })
        .collect()
}
