//! proto3-JSON shapes of the `v1.KoyaService` messages.
//!
//! Every field may be omitted on the wire (proto3 defaults), so all incoming
//! fields carry `#[serde(default)]`. `bytes` fields travel as base64.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::TransportError;
use crate::model::{
    Catalog, Language, Processor, ResponsePayload, RunRequest, RunResponse, Task, TaskKind,
};

const OUTPUT_KIND_STDOUT: i32 = 0;
const OUTPUT_KIND_STDERR: i32 = 1;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default)]
    pub languages: Vec<WireLanguage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLanguage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub show_name: String,
    #[serde(default)]
    pub processors: Vec<WireProcessor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProcessor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub show_name: String,
    #[serde(default)]
    pub default_filename: String,
    #[serde(default)]
    pub tasks: Vec<WireTask>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub show_name: String,
    #[serde(default)]
    pub kind: String,
}

impl From<ListResponse> for Catalog {
    fn from(res: ListResponse) -> Self {
        Catalog {
            languages: res
                .languages
                .into_iter()
                .map(|l| Language {
                    id: l.id,
                    display_name: l.show_name,
                    processors: l
                        .processors
                        .into_iter()
                        .map(|p| Processor {
                            id: p.id,
                            display_name: p.show_name,
                            default_filename: p.default_filename,
                            tasks: p
                                .tasks
                                .into_iter()
                                .map(|t| Task {
                                    kind: TaskKind::from_wire(&t.kind),
                                    id: t.id,
                                    display_name: t.show_name,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRunRequest<'a> {
    pub language_id: &'a str,
    pub processor_id: &'a str,
    pub task_id: &'a str,
    pub files: Vec<WireFile<'a>>,
}

#[derive(Debug, Serialize)]
pub struct WireFile<'a> {
    pub path: &'a str,
    #[serde(serialize_with = "serialize_base64")]
    pub content: &'a [u8],
}

impl<'a> From<&'a RunRequest> for WireRunRequest<'a> {
    fn from(req: &'a RunRequest) -> Self {
        WireRunRequest {
            language_id: &req.language_id,
            processor_id: &req.processor_id,
            task_id: &req.task_id,
            files: req
                .files
                .iter()
                .map(|f| WireFile {
                    path: &f.path,
                    content: &f.content,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WireRunResponse {
    #[serde(default)]
    pub output: Option<WireOutput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireOutput {
    #[serde(default)]
    pub kind: i32,
    #[serde(default, deserialize_with = "deserialize_base64")]
    pub buffer: Bytes,
}

impl From<WireRunResponse> for RunResponse {
    fn from(res: WireRunResponse) -> Self {
        let payload = match res.output {
            Some(WireOutput {
                kind: OUTPUT_KIND_STDOUT,
                buffer,
            }) => ResponsePayload::Stdout(buffer),
            Some(WireOutput {
                kind: OUTPUT_KIND_STDERR,
                buffer,
            }) => ResponsePayload::Stderr(buffer),
            _ => ResponsePayload::Unrecognized,
        };
        RunResponse { payload }
    }
}

/// Connect error body, used both for unary error responses and inside the
/// end-of-stream trailer.
#[derive(Debug, Default, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        TransportError::Rpc {
            code: if e.code.is_empty() { "unknown".into() } else { e.code },
            message: e.message,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EndStream {
    #[serde(default)]
    pub error: Option<WireError>,
}

/// Map an HTTP status to a Connect code, for error bodies that are not JSON.
pub fn code_for_status(status: u16) -> &'static str {
    match status {
        400 => "internal",
        401 => "unauthenticated",
        403 => "permission_denied",
        404 => "unimplemented",
        408 => "deadline_exceeded",
        429 | 502 | 503 | 504 => "unavailable",
        _ => "unknown",
    }
}

fn serialize_base64<S: Serializer>(bytes: &&[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&STANDARD.encode(bytes))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
    let text = String::deserialize(d)?;
    // proto3 JSON accepts either alphabet, with or without padding.
    STANDARD
        .decode(&text)
        .or_else(|_| STANDARD_NO_PAD.decode(&text))
        .or_else(|_| URL_SAFE.decode(&text))
        .or_else(|_| URL_SAFE_NO_PAD.decode(&text))
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}
