//! Inbound message structures.
//!
//! The transport delivers each request as pre-parsed chunks: the envelope,
//! an optional data chunk, and zero or more debug chunks. The envelope is
//! kept as raw JSON so that the transport-level error path can still pull
//! `id` and `sender` out of a request whose data chunk turned out to be
//! unusable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data chunk as delivered by the transport
#[derive(Debug, Clone, PartialEq)]
pub enum DataChunk {
    /// JSON content
    Structured(Value),
    /// Raw bytes; not supported by the request processor
    Binary(Vec<u8>),
}

impl DataChunk {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            DataChunk::Structured(value) => Some(value),
            DataChunk::Binary(_) => None,
        }
    }
}

/// One inbound message, split into chunks by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedChunks {
    /// Raw message envelope: `{id, sender, transaction_id, ...}`
    pub envelope: Value,
    /// The data chunk, if the message carried one
    pub data: Option<DataChunk>,
    /// Debug chunks accumulated along the delivery path
    pub debug: Vec<Value>,
    /// Count of debug chunks the transport failed to parse
    pub num_invalid_debug: u64,
}

impl ParsedChunks {
    pub fn new(envelope: Value, data: Value) -> Self {
        Self {
            envelope,
            data: Some(DataChunk::Structured(data)),
            debug: Vec::new(),
            num_invalid_debug: 0,
        }
    }

    pub fn with_debug(mut self, debug: Vec<Value>) -> Self {
        self.debug = debug;
        self
    }
}

/// Typed view of the data chunk of an action request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestData {
    pub module: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default)]
    pub notify_outcome: bool,
    pub transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}
