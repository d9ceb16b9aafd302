//! Call and reply frames.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON body. Calls
//! and replies are matched by `call_id`, so several calls may be in flight on
//! one session.

use networkservice::{RemoteFault, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side may send.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// The two logical operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Establish or refresh a connection.
    Request,
    /// Tear a connection down.
    Close,
}

/// A call from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    /// Correlates the reply.
    pub call_id: u64,
    /// Operation requested.
    pub method: Method,
    /// Bearer token minted for this call.
    pub token: String,
    /// Descriptors the manager may take from this process.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDescriptor>,
    /// The request or connection, as JSON.
    pub payload: Value,
}

/// A reply from the manager: `{"Ok": payload}` or `{"Err": {code, message}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Call this answers.
    pub call_id: u64,
    /// Outcome.
    pub result: Result<Value, RemoteFault>,
}

/// Length-delimited framing shared by both directions.
pub fn framing() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}
