//! Validated view of an inbound action request.

use crate::error::{AgentError, AgentResult};
use crate::protocol::messages::{DataChunk, ParsedChunks, RequestData};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// How the caller wants the action executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    /// The caller awaits the final result inline; no spool state
    Blocking,
    /// The caller receives a provisional receipt; the result is spooled
    NonBlocking,
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Blocking => write!(f, "blocking"),
            RequestType::NonBlocking => write!(f, "non blocking"),
        }
    }
}

/// Immutable view of a validated request.
///
/// Construction performs format validation only; content validation (module
/// existence, input schema) is the processor's job. The request is moved
/// into a single worker before any concurrent use, so the only mutable
/// field, the results directory, is set exactly once by the processor
/// before dispatch.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    request_type: RequestType,
    id: String,
    sender: String,
    transaction_id: String,
    module: String,
    action: String,
    notify_outcome: bool,
    params: Value,
    params_txt: String,
    request_txt: String,
    config: Option<Value>,
    parsed_chunks: ParsedChunks,
    results_dir: Option<PathBuf>,
}

fn required_envelope_entry(envelope: &Value, key: &str) -> AgentResult<String> {
    match envelope.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        Some(_) => Err(AgentError::request_format(format!(
            "empty '{key}' entry in envelope"
        ))),
        None => Err(AgentError::request_format(format!(
            "no '{key}' entry in envelope"
        ))),
    }
}

impl ActionRequest {
    /// Fails with a format error when the envelope is malformed, the data
    /// chunk is missing or binary, or the transaction ids disagree.
    pub fn new(request_type: RequestType, parsed_chunks: ParsedChunks) -> AgentResult<Self> {
        let id = required_envelope_entry(&parsed_chunks.envelope, "id")?;
        let sender = required_envelope_entry(&parsed_chunks.envelope, "sender")?;
        let transaction_id = required_envelope_entry(&parsed_chunks.envelope, "transaction_id")?;

        let data_value = match &parsed_chunks.data {
            Some(DataChunk::Structured(value)) => value,
            Some(DataChunk::Binary(_)) => {
                return Err(AgentError::request_format(
                    "binary data is not supported",
                ));
            }
            None => return Err(AgentError::request_format("no data chunk")),
        };

        let data: RequestData = serde_json::from_value(data_value.clone())
            .map_err(|e| AgentError::request_format(format!("invalid data chunk: {e}")))?;

        if data.module.is_empty() {
            return Err(AgentError::request_format("empty module name"));
        }
        if data.action.is_empty() {
            return Err(AgentError::request_format("empty action name"));
        }
        if data.transaction_id != transaction_id {
            return Err(AgentError::request_format(
                "transaction id mismatch between envelope and data",
            ));
        }

        let params_txt = data
            .params
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_default();
        let request_txt = data_value.to_string();

        Ok(Self {
            request_type,
            id,
            sender,
            transaction_id,
            module: data.module,
            action: data.action,
            notify_outcome: data.notify_outcome,
            params: data.params.unwrap_or_else(|| Value::Object(Default::default())),
            params_txt,
            request_txt,
            config: data.config,
            parsed_chunks,
            results_dir: None,
        })
    }

    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn notify_outcome(&self) -> bool {
        self.notify_outcome
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Serialized params, or the empty string when none were given
    pub fn params_txt(&self) -> &str {
        &self.params_txt
    }

    /// The whole data chunk, serialized
    pub fn request_txt(&self) -> &str {
        &self.request_txt
    }

    /// Configuration blob riding in the data chunk, if any
    pub fn config(&self) -> Option<&Value> {
        self.config.as_ref()
    }

    pub fn parsed_chunks(&self) -> &ParsedChunks {
        &self.parsed_chunks
    }

    pub fn results_dir(&self) -> Option<&Path> {
        self.results_dir.as_deref()
    }

    /// Set the results directory; called exactly once by the processor
    /// before dispatching a non-blocking request.
    pub fn set_results_dir(&mut self, path: PathBuf) {
        debug_assert!(
            self.results_dir.is_none(),
            "results directory is set exactly once"
        );
        self.results_dir = Some(path);
    }
}
