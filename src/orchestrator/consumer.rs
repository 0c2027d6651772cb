//! Stream consumer for a single run.
//!
//! Turns the response stream of one run into a finite, forward-only sequence
//! of output events followed by exactly one terminal outcome.

use futures::StreamExt;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::engine::ResponseStream;
use crate::model::{
    OutputChannel, OutputEvent, ResponsePayload, RunFinished, RunId, RunOutcome, RunStats,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    Output(OutputEvent),
    Finished(RunFinished),
}

pub struct StreamConsumer {
    run_id: RunId,
    cancel: CancellationToken,
    /// `None` once the terminal outcome has been handed out.
    stream: Option<ResponseStream>,
    started: Instant,
    stats: RunStats,
}

impl StreamConsumer {
    pub fn new(run_id: RunId, stream: ResponseStream, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            cancel,
            stream: Some(stream),
            started: Instant::now(),
            stats: RunStats::default(),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn is_finished(&self) -> bool {
        self.stream.is_none()
    }

    /// Request cancellation. Idempotent; the next call to
    /// [`StreamConsumer::next_event`] reports `Canceled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Counters so far; `elapsed` is only filled in on the terminal event.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Next output chunk, or the terminal outcome. Returns `None` after the
    /// terminal outcome has been returned once.
    ///
    /// Cancel safe: dropping the future between messages loses nothing.
    /// Cancellation takes priority over anything still buffered.
    pub async fn next_event(&mut self) -> Option<ConsumerEvent> {
        let outcome = {
            let stream = self.stream.as_mut()?;
            loop {
                let item = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    item = stream.next() => Some(item),
                };
                let Some(item) = item else {
                    break RunOutcome::Canceled;
                };
                if self.cancel.is_cancelled() {
                    break RunOutcome::Canceled;
                }

                let (channel, bytes) = match item {
                    Some(Ok(msg)) => match msg.payload {
                        ResponsePayload::Stdout(bytes) => (OutputChannel::Stdout, bytes),
                        ResponsePayload::Stderr(bytes) => (OutputChannel::Stderr, bytes),
                        ResponsePayload::Unrecognized => {
                            trace!(run_id = self.run_id.0, "skipping unrecognized payload");
                            continue;
                        }
                    },
                    Some(Err(e)) if e.is_canceled() => break RunOutcome::Canceled,
                    Some(Err(e)) => break RunOutcome::Failed(e),
                    None => break RunOutcome::Completed,
                };

                self.stats.chunks += 1;
                self.stats.bytes += bytes.len() as u64;
                return Some(ConsumerEvent::Output(OutputEvent {
                    run_id: self.run_id,
                    channel,
                    bytes,
                }));
            }
        };

        // Dropping the stream closes the underlying call.
        self.stream = None;
        self.stats.elapsed = self.started.elapsed();
        match &outcome {
            RunOutcome::Failed(e) => {
                warn!(run_id = self.run_id.0, error = %e, "run stream failed")
            }
            _ => debug!(run_id = self.run_id.0, ?outcome, "run stream finished"),
        }
        Some(ConsumerEvent::Finished(RunFinished {
            run_id: self.run_id,
            outcome,
            stats: self.stats,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::model::RunResponse;
    use bytes::Bytes;
    use futures::stream;

    fn out(s: &'static str) -> Result<RunResponse, TransportError> {
        Ok(RunResponse {
            payload: ResponsePayload::Stdout(Bytes::from_static(s.as_bytes())),
        })
    }

    fn consumer(items: Vec<Result<RunResponse, TransportError>>) -> StreamConsumer {
        StreamConsumer::new(RunId(1), stream::iter(items).boxed(), CancellationToken::new())
    }

    async fn drain(c: &mut StreamConsumer) -> Vec<ConsumerEvent> {
        let mut events = Vec::new();
        while let Some(ev) = c.next_event().await {
            events.push(ev);
        }
        events
    }

    fn outcome(events: &[ConsumerEvent]) -> &RunOutcome {
        match events.last() {
            Some(ConsumerEvent::Finished(f)) => &f.outcome,
            other => panic!("expected terminal event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_payloads_are_skipped_in_order() {
        let mut c = consumer(vec![
            out("a"),
            Ok(RunResponse {
                payload: ResponsePayload::Unrecognized,
            }),
            out("b"),
        ]);
        let events = drain(&mut c).await;

        let bytes: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ConsumerEvent::Output(o) => Some(o.bytes.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(bytes, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(outcome(&events), &RunOutcome::Completed);
        assert_eq!(c.stats().chunks, 2);
    }

    #[tokio::test]
    async fn stderr_is_tagged_separately() {
        let mut c = consumer(vec![Ok(RunResponse {
            payload: ResponsePayload::Stderr(Bytes::from_static(b"oops")),
        })]);
        match c.next_event().await {
            Some(ConsumerEvent::Output(o)) => assert_eq!(o.channel, OutputChannel::Stderr),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_error_is_a_failure() {
        let err = TransportError::Network("reset by peer".into());
        let mut c = consumer(vec![out("a"), Err(err.clone())]);
        let events = drain(&mut c).await;
        assert_eq!(outcome(&events), &RunOutcome::Failed(err));
    }

    #[tokio::test]
    async fn immediate_error_still_finishes_once() {
        let mut c = consumer(vec![Err(TransportError::Network("refused".into()))]);
        let events = drain(&mut c).await;
        assert_eq!(events.len(), 1);
        assert!(outcome(&events).is_failure());
        assert!(c.is_finished());
        assert_eq!(c.next_event().await, None);
    }

    #[tokio::test]
    async fn transport_canceled_error_is_not_a_failure() {
        let mut c = consumer(vec![out("a"), Err(TransportError::Canceled)]);
        let events = drain(&mut c).await;
        assert_eq!(outcome(&events), &RunOutcome::Canceled);
    }

    #[tokio::test]
    async fn cancellation_wins_over_buffered_output() {
        let mut c = consumer(vec![out("a"), out("b")]);
        c.cancel();
        c.cancel();
        let events = drain(&mut c).await;
        assert_eq!(events.len(), 1);
        assert_eq!(outcome(&events), &RunOutcome::Canceled);
    }

    #[tokio::test]
    async fn cancel_after_finish_is_a_no_op() {
        let mut c = consumer(vec![out("a")]);
        let events = drain(&mut c).await;
        assert_eq!(outcome(&events), &RunOutcome::Completed);
        c.cancel();
        assert_eq!(c.next_event().await, None);
    }

    #[tokio::test]
    async fn pending_stream_observes_cancel() {
        let cancel = CancellationToken::new();
        let mut c = StreamConsumer::new(RunId(9), stream::pending().boxed(), cancel.clone());
        let waiter = tokio::spawn(async move { c.next_event().await });
        tokio::task::yield_now().await;
        cancel.cancel();
        match waiter.await.unwrap() {
            Some(ConsumerEvent::Finished(f)) => assert_eq!(f.outcome, RunOutcome::Canceled),
            other => panic!("unexpected {other:?}"),
        }
    }
}
