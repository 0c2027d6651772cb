//! Transport to the execution backend.
//!
//! The orchestration layer only sees the [`Transport`] trait. [`ConnectClient`]
//! is the production implementation speaking the Connect protocol over HTTP;
//! tests substitute scripted transports.

mod connect;
pub mod envelope;
pub mod wire;

pub use connect::ConnectClient;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::model::{Catalog, RunRequest, RunResponse};

/// Ordered response messages of one `RunOneshot` call.
pub type ResponseStream = BoxStream<'static, Result<RunResponse, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Unary catalog fetch. Returns `TransportError::Canceled` once `cancel`
    /// fires.
    async fn fetch_catalog(&self, cancel: CancellationToken) -> Result<Catalog, TransportError>;

    /// Start a server-streaming execution. The call is issued lazily when the
    /// stream is first polled; a failure to issue is the first item. After
    /// `cancel` fires the stream yields `TransportError::Canceled` at its next
    /// suspension point and then ends.
    fn run_oneshot(&self, request: RunRequest, cancel: CancellationToken) -> ResponseStream;
}
