//! The session event loop.
//!
//! A single task owns the [`RunController`] and multiplexes user commands with
//! the active run's stream, so every mutation of the active-run slot and every
//! liveness check happens on this one loop without locks.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::controller::RunController;
use crate::engine::Transport;
use crate::errors::{Result, TransportError};
use crate::model::{Catalog, SessionCommand, SessionEvent};
use crate::sink::DisplaySink;

/// A catalog fetch running alongside the loop.
struct PendingReload {
    cancel: CancellationToken,
    fetch: BoxFuture<'static, std::result::Result<Catalog, TransportError>>,
}

impl PendingReload {
    fn start(transport: Arc<dyn Transport>, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        Self {
            cancel,
            fetch: Box::pin(async move { transport.fetch_catalog(token).await }),
        }
    }
}

/// Await the pending reload, or pend forever when there is none.
async fn reload_done(
    reload: &mut Option<PendingReload>,
) -> std::result::Result<Catalog, TransportError> {
    match reload.as_mut() {
        Some(pending) => (&mut pending.fetch).await,
        None => futures::future::pending().await,
    }
}

/// Run a session until `Quit`, until the command channel closes, or until
/// `shutdown` fires.
///
/// The catalog is fetched once on entry before any command is handled, so
/// selections and triggers sent early apply to it. A failed fetch is reported
/// as `CatalogUnavailable` and can be retried with `ReloadCatalog`; a reload
/// runs in the background while output and commands keep flowing.
pub async fn run_session<S: DisplaySink>(
    transport: Arc<dyn Transport>,
    sink: S,
    events: UnboundedSender<SessionEvent>,
    mut cmd_rx: UnboundedReceiver<SessionCommand>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut controller = RunController::new(transport, sink, events);
    info!("session started");

    if let Err(e) = controller.load_catalog(shutdown.child_token()).await {
        warn!(error = %e, "continuing without a catalog");
    }

    let mut reload: Option<PendingReload> = None;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                controller.abort();
                break;
            }
            cmd = cmd_rx.recv() => {
                debug!(?cmd, "session command");
                match cmd {
                    Some(SessionCommand::Trigger { source }) => {
                        if let Err(e) = controller.start(&source) {
                            warn!(error = %e, "run not started");
                        }
                    }
                    Some(SessionCommand::SelectLanguage(id)) => {
                        controller.select_language(id);
                    }
                    Some(SessionCommand::SelectProcessor(id)) => {
                        controller.select_processor(id);
                    }
                    Some(SessionCommand::SelectTask(id)) => {
                        controller.select_task(id);
                    }
                    Some(SessionCommand::Abort) => {
                        controller.abort();
                    }
                    Some(SessionCommand::ReloadCatalog) => {
                        if let Some(stale) = reload.take() {
                            debug!("replacing pending catalog reload");
                            stale.cancel.cancel();
                        }
                        reload = Some(PendingReload::start(
                            controller.transport().clone(),
                            shutdown.child_token(),
                        ));
                    }
                    Some(SessionCommand::Quit) | None => {
                        controller.abort();
                        break;
                    }
                }
            }
            fetched = reload_done(&mut reload) => {
                reload = None;
                if let Err(e) = controller.install_catalog(fetched) {
                    warn!(error = %e, "catalog reload failed");
                }
            }
            finished = controller.drive() => {
                debug!(run_id = finished.run_id.0, outcome = ?finished.outcome, "run finished");
            }
        }
    }

    if let Some(pending) = reload.take() {
        pending.cancel.cancel();
    }
    info!("session ended");
    Ok(())
}
