//! Outbound reply construction.
//!
//! An `ActionResponse` records the lifecycle of one request in its action
//! metadata document and projects that document into the wire shape of each
//! response type.

use crate::modules::ModuleType;
use crate::request::{ActionRequest, RequestType};
use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::fmt;

/// Lifecycle state of an action, persisted as a stable string name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Running,
    Success,
    Failure,
}

impl ActionStatus {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "running" => Some(ActionStatus::Running),
            "success" => Some(ActionStatus::Success),
            "failure" => Some(ActionStatus::Failure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Running => "running",
            ActionStatus::Success => "success",
            ActionStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape selector for [`ActionResponse::to_json`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Blocking,
    NonBlocking,
    StatusOutput,
    RpcError,
}

/// Captured streams of an external execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub std_out: String,
    pub std_err: String,
    pub exitcode: i64,
}

/// What a module execution produced
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub module_type: ModuleType,
    pub results: Value,
    pub std_out: String,
    pub std_err: String,
    pub exit_code: i64,
}

impl ActionOutcome {
    /// Outcome of an internal module; only the results are meaningful
    pub fn internal(results: Value) -> Self {
        Self {
            module_type: ModuleType::Internal,
            results,
            std_out: String::new(),
            std_err: String::new(),
            exit_code: 0,
        }
    }

    /// Outcome of an external execution with all streams populated
    pub fn external(results: Value, std_out: String, std_err: String, exit_code: i64) -> Self {
        Self {
            module_type: ModuleType::External,
            results,
            std_out,
            std_err,
            exit_code,
        }
    }

    pub fn output(&self) -> ActionOutput {
        ActionOutput {
            std_out: self.std_out.clone(),
            std_err: self.std_err.clone(),
            exitcode: self.exit_code,
        }
    }
}

const REQUESTER: &str = "requester";
const MODULE: &str = "module";
const ACTION: &str = "action";
const REQUEST_PARAMS: &str = "request_params";
const TRANSACTION_ID: &str = "transaction_id";
const REQUEST_ID: &str = "request_id";
const NOTIFY_OUTCOME: &str = "notify_outcome";
const START: &str = "start";
const STATUS: &str = "status";
const END: &str = "end";
const RESULTS: &str = "results";
const RESULTS_ARE_VALID: &str = "results_are_valid";
const EXECUTION_ERROR: &str = "execution_error";

static ACTION_METADATA_VALIDATOR: Lazy<jsonschema::Validator> = Lazy::new(|| {
    jsonschema::validator_for(&json!({
        "type": "object",
        "required": [
            REQUESTER, MODULE, ACTION, REQUEST_PARAMS, TRANSACTION_ID,
            REQUEST_ID, NOTIFY_OUTCOME, START, STATUS
        ],
        "properties": {
            REQUESTER: {"type": "string"},
            MODULE: {"type": "string"},
            ACTION: {"type": "string"},
            REQUEST_PARAMS: {"type": "string"},
            TRANSACTION_ID: {"type": "string"},
            REQUEST_ID: {"type": "string"},
            NOTIFY_OUTCOME: {"type": "boolean"},
            START: {"type": "string"},
            STATUS: {"enum": ["running", "success", "failure"]},
            END: {"type": "string"},
            RESULTS: {},
            RESULTS_ARE_VALID: {"type": "boolean"},
            EXECUTION_ERROR: {"type": "string"}
        }
    }))
    .expect("action metadata schema compiles")
});

/// Current time as ISO-8601 UTC; fixed width so timestamps order
/// lexicographically.
pub fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Builder for the outbound reply of one action request
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub module_type: ModuleType,
    pub request_type: RequestType,
    pub output: ActionOutput,
    pub action_metadata: Value,
}

impl ActionResponse {
    /// Begin recording for a request: status running, start stamped now
    pub fn new(module_type: ModuleType, request: &ActionRequest) -> Self {
        let request_params = if request.params_txt().is_empty() {
            "none".to_string()
        } else {
            request.params_txt().to_string()
        };

        let action_metadata = json!({
            REQUESTER: request.sender(),
            MODULE: request.module(),
            ACTION: request.action(),
            REQUEST_PARAMS: request_params,
            TRANSACTION_ID: request.transaction_id(),
            REQUEST_ID: request.id(),
            NOTIFY_OUTCOME: request.notify_outcome(),
            START: iso8601_now(),
            STATUS: ActionStatus::Running.as_str(),
        });

        Self {
            module_type,
            request_type: request.request_type(),
            output: ActionOutput::default(),
            action_metadata,
        }
    }

    pub fn set_status(&mut self, status: ActionStatus) {
        self.action_metadata[STATUS] = json!(status.as_str());
    }

    pub fn status(&self) -> Option<&str> {
        self.action_metadata[STATUS].as_str()
    }

    /// Record a successful completion; the optional execution error covers
    /// failures that happened after the results were produced.
    pub fn set_valid_results_and_end(&mut self, results: Value, execution_error: Option<&str>) {
        self.action_metadata[END] = json!(iso8601_now());
        self.action_metadata[RESULTS_ARE_VALID] = json!(true);
        self.action_metadata[RESULTS] = results;
        self.action_metadata[STATUS] = json!(ActionStatus::Success.as_str());
        if let Some(error) = execution_error.filter(|e| !e.is_empty()) {
            self.action_metadata[EXECUTION_ERROR] = json!(error);
        }
    }

    pub fn set_bad_results_and_end(&mut self, execution_error: &str) {
        self.action_metadata[END] = json!(iso8601_now());
        self.action_metadata[RESULTS_ARE_VALID] = json!(false);
        self.action_metadata[EXECUTION_ERROR] = json!(execution_error);
        self.action_metadata[STATUS] = json!(ActionStatus::Failure.as_str());
    }

    /// Label used in logs, e.g. `blocking 'reverse string' request (transaction t1)`
    pub fn pretty_request_label(&self) -> String {
        format!(
            "{} '{} {}' request (transaction {})",
            self.request_type,
            self.action_metadata[MODULE].as_str().unwrap_or_default(),
            self.action_metadata[ACTION].as_str().unwrap_or_default(),
            self.action_metadata[TRANSACTION_ID].as_str().unwrap_or_default(),
        )
    }

    pub fn is_valid_action_metadata(metadata: &Value) -> bool {
        match ACTION_METADATA_VALIDATOR.validate(metadata) {
            Ok(()) => true,
            Err(e) => {
                tracing::trace!(error = %e, "invalid action metadata");
                false
            }
        }
    }

    pub fn valid(&self) -> bool {
        Self::is_valid_action_metadata(&self.action_metadata)
    }

    /// Schema-valid and complete enough for the given wire shape
    pub fn valid_for(&self, response_type: ResponseType) -> bool {
        if !self.valid() {
            return false;
        }

        match response_type {
            ResponseType::Blocking | ResponseType::NonBlocking => {
                self.action_metadata.get(RESULTS).is_some()
            }
            ResponseType::StatusOutput => true,
            ResponseType::RpcError => self.action_metadata.get(EXECUTION_ERROR).is_some(),
        }
    }

    /// Project the metadata into the wire shape of the given response type
    pub fn to_json(&self, response_type: ResponseType) -> Value {
        let transaction_id = self.action_metadata[TRANSACTION_ID].clone();

        match response_type {
            ResponseType::Blocking | ResponseType::NonBlocking => json!({
                TRANSACTION_ID: transaction_id,
                RESULTS: self.action_metadata[RESULTS].clone(),
            }),
            ResponseType::StatusOutput => json!({
                TRANSACTION_ID: transaction_id,
                STATUS: self.action_metadata[STATUS].clone(),
                "stdout": self.output.std_out,
                "stderr": self.output.std_err,
                "exitcode": self.output.exitcode,
            }),
            ResponseType::RpcError => json!({
                "id": self.action_metadata[REQUEST_ID].clone(),
                "description": self.action_metadata[EXECUTION_ERROR].clone(),
            }),
        }
    }
}
