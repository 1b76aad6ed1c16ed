//! Wire messages for the four graph verbs
//!
//! Every message is bincode-encoded and carried in a frame with a `u32`
//! little-endian length prefix. Replies echo the request id of the envelope
//! they answer, so a connection may have many requests in flight.

use crate::error::{GraphError, GraphResult};
use crate::graph::{Binding, GraphDefinition, NamedTensor};
use crate::registry::GraphId;
use serde::{Deserialize, Serialize};

/// Largest frame accepted unless configured otherwise (64 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Size of the length prefix in front of every frame
pub const FRAME_HEADER_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    AlreadyExists,
    NotFound,
    InvalidGraph,
    DispatchFailed,
    AssertionFailed,
    Cancelled,
    BadRequest,
    Internal,
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    RegisterGraph {
        graph_id: GraphId,
        definition: GraphDefinition,
    },
    ForgetGraph {
        graph_id: GraphId,
    },
    ReplaceGraph {
        graph_id: GraphId,
        definition: GraphDefinition,
    },
    Inference {
        graph_id: GraphId,
        bindings: Vec<Binding>,
    },
}

impl Request {
    pub fn verb(&self) -> &'static str {
        match self {
            Request::RegisterGraph { .. } => "RegisterGraph",
            Request::ForgetGraph { .. } => "ForgetGraph",
            Request::ReplaceGraph { .. } => "ReplaceGraph",
            Request::Inference { .. } => "InferenceRequest",
        }
    }

    pub fn graph_id(&self) -> &GraphId {
        match self {
            Request::RegisterGraph { graph_id, .. }
            | Request::ForgetGraph { graph_id }
            | Request::ReplaceGraph { graph_id, .. }
            | Request::Inference { graph_id, .. } => graph_id,
        }
    }
}

/// Outcome of a registry mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatResponse {
    pub status: Status,
    pub message: Option<String>,
}

impl FlatResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            message: None,
        }
    }

    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }
}

impl From<&GraphError> for FlatResponse {
    fn from(err: &GraphError) -> Self {
        Self::failure(err.status(), err.to_string())
    }
}

/// Outcome of an inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatResult {
    pub status: Status,
    pub message: Option<String>,
    /// Version of the graph that produced `outputs`, 0 on failure
    pub graph_version: u64,
    pub outputs: Vec<NamedTensor>,
}

impl FlatResult {
    pub fn ok(graph_version: u64, outputs: Vec<NamedTensor>) -> Self {
        Self {
            status: Status::Ok,
            message: None,
            graph_version,
            outputs,
        }
    }
}

impl From<&GraphError> for FlatResult {
    fn from(err: &GraphError) -> Self {
        Self {
            status: err.status(),
            message: Some(err.to_string()),
            graph_version: 0,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Outcome(FlatResponse),
    Result(FlatResult),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Outcome(r) => r.status,
            Response::Result(r) => r.status,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Response::Outcome(r) => r.message.as_deref(),
            Response::Result(r) => r.message.as_deref(),
        }
    }

    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Response::Outcome(FlatResponse::failure(status, message))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub request_id: u64,
    pub response: Response,
}

pub fn encode<T: Serialize>(message: &T) -> GraphResult<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> GraphResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Length-prefix `payload` into a single frame
pub fn frame(payload: &[u8], max_frame_bytes: usize) -> GraphResult<Vec<u8>> {
    check_frame_len(payload.len(), max_frame_bytes)?;
    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn check_frame_len(len: usize, max_frame_bytes: usize) -> GraphResult<()> {
    if len > max_frame_bytes || len > u32::MAX as usize {
        return Err(GraphError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            len, max_frame_bytes
        )));
    }
    Ok(())
}
