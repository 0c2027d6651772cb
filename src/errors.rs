//! Error taxonomy for the client.

use thiserror::Error;

use crate::model::Selection;

/// Failure of a call to the execution backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    /// Error reported by the server, either as an HTTP error body or in the
    /// end-of-stream trailer of a streaming call.
    #[error("server error ({code}): {message}")]
    Rpc { code: String, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("call canceled")]
    Canceled,
}

impl TransportError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, TransportError::Canceled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Decode(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ProcletError {
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(TransportError),

    #[error("nothing to run: selection {0} is incomplete (empty catalog?)")]
    IncompleteSelection(Selection),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ProcletError>;
