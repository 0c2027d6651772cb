use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::envelope::{self, EnvelopeDecoder};
use super::wire::{self, EndStream, ListResponse, WireError, WireRunRequest, WireRunResponse};
use super::{ResponseStream, Transport};
use crate::errors::TransportError;
use crate::model::{Catalog, ClientConfig, RunRequest, RunResponse};

const SERVICE: &str = "v1.KoyaService";
const METHOD_LIST: &str = "List";
const METHOD_RUN_ONESHOT: &str = "RunOneshot";
const PROTOCOL_VERSION_HEADER: &str = "Connect-Protocol-Version";
const CONTENT_TYPE_UNARY: &str = "application/json";
const CONTENT_TYPE_STREAM: &str = "application/connect+json";

/// Connect-protocol client for `v1.KoyaService`, JSON codec.
#[derive(Debug, Clone)]
pub struct ConnectClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}/{}", self.base_url, SERVICE, method)
    }
}

#[async_trait]
impl Transport for ConnectClient {
    async fn fetch_catalog(&self, cancel: CancellationToken) -> Result<Catalog, TransportError> {
        let url = self.method_url(METHOD_LIST);
        debug!(%url, "fetching catalog");

        let call = async {
            let resp = self
                .http
                .post(&url)
                .header(CONTENT_TYPE, CONTENT_TYPE_UNARY)
                .header(PROTOCOL_VERSION_HEADER, "1")
                .body("{}")
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.bytes().await?;
                return Err(error_from_body(status.as_u16(), &body));
            }
            let list: ListResponse = resp.json().await?;
            Ok(Catalog::from(list))
        };

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Canceled),
            res = call => res,
        };
        match &res {
            Ok(catalog) => info!(languages = catalog.languages.len(), "catalog fetched"),
            Err(e) => warn!(error = %e, "catalog fetch failed"),
        }
        res
    }

    fn run_oneshot(&self, request: RunRequest, cancel: CancellationToken) -> ResponseStream {
        let json = match serde_json::to_vec(&WireRunRequest::from(&request)) {
            Ok(json) => json,
            Err(e) => return stream::once(async move { Err(TransportError::from(e)) }).boxed(),
        };
        let state = CallState::Pending {
            http: self.http.clone(),
            url: self.method_url(METHOD_RUN_ONESHOT),
            body: envelope::encode(0, &json),
        };
        stream::unfold(state, move |state| next_message(state, cancel.clone())).boxed()
    }
}

/// Progress of one streaming call, threaded through `stream::unfold`.
enum CallState {
    Pending {
        http: reqwest::Client,
        url: String,
        body: Bytes,
    },
    Streaming {
        body: BoxStream<'static, reqwest::Result<Bytes>>,
        decoder: EnvelopeDecoder,
    },
    Done,
}

async fn next_message(
    mut state: CallState,
    cancel: CancellationToken,
) -> Option<(Result<RunResponse, TransportError>, CallState)> {
    loop {
        if matches!(state, CallState::Done) {
            return None;
        }
        if cancel.is_cancelled() {
            debug!("streaming call canceled");
            return Some((Err(TransportError::Canceled), CallState::Done));
        }

        state = match state {
            CallState::Done => return None,
            CallState::Pending { http, url, body } => {
                info!(%url, "issuing streaming call");
                let opened = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(TransportError::Canceled),
                    res = open_stream(&http, &url, body) => res,
                };
                match opened {
                    Ok(resp) => CallState::Streaming {
                        body: resp.bytes_stream().boxed(),
                        decoder: EnvelopeDecoder::default(),
                    },
                    Err(e) => return Some((Err(e), CallState::Done)),
                }
            }
            CallState::Streaming { mut body, mut decoder } => {
                match decoder.next_frame() {
                    Err(e) => return Some((Err(e), CallState::Done)),
                    Ok(Some(frame)) if frame.is_end_stream() => {
                        return match end_of_stream(&frame.payload) {
                            Ok(()) => {
                                debug!("stream closed by server");
                                None
                            }
                            Err(e) => Some((Err(e), CallState::Done)),
                        };
                    }
                    Ok(Some(frame)) => {
                        trace!(len = frame.payload.len(), "response message");
                        let item = serde_json::from_slice::<WireRunResponse>(&frame.payload)
                            .map(RunResponse::from)
                            .map_err(TransportError::from);
                        let next = if item.is_ok() {
                            CallState::Streaming { body, decoder }
                        } else {
                            CallState::Done
                        };
                        return Some((item, next));
                    }
                    Ok(None) => {}
                }

                let chunk = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Some((Err(TransportError::Canceled), CallState::Done));
                    }
                    chunk = body.next() => chunk,
                };
                match chunk {
                    Some(Ok(bytes)) => {
                        decoder.push(&bytes);
                        CallState::Streaming { body, decoder }
                    }
                    Some(Err(e)) => return Some((Err(e.into()), CallState::Done)),
                    None => {
                        let reason = if decoder.has_partial() {
                            "response body ended inside an envelope"
                        } else {
                            "response body ended without end-of-stream message"
                        };
                        let err = TransportError::Protocol(reason.into());
                        return Some((Err(err), CallState::Done));
                    }
                }
            }
        };
    }
}

async fn open_stream(
    http: &reqwest::Client,
    url: &str,
    body: Bytes,
) -> Result<reqwest::Response, TransportError> {
    let resp = http
        .post(url)
        .header(CONTENT_TYPE, CONTENT_TYPE_STREAM)
        .header(PROTOCOL_VERSION_HEADER, "1")
        .body(body)
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.bytes().await?;
    Err(error_from_body(status.as_u16(), &body))
}

fn end_of_stream(payload: &[u8]) -> Result<(), TransportError> {
    if payload.is_empty() {
        return Ok(());
    }
    let end: EndStream = serde_json::from_slice(payload)?;
    match end.error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn error_from_body(status: u16, body: &[u8]) -> TransportError {
    match serde_json::from_slice::<WireError>(body) {
        Ok(err) if !err.code.is_empty() => err.into(),
        _ => TransportError::Rpc {
            code: wire::code_for_status(status).into(),
            message: format!("HTTP {status}: {}", String::from_utf8_lossy(body).trim()),
        },
    }
}
