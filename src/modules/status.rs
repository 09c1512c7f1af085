//! Internal status module: answers queries about a previously spooled
//! non-blocking transaction by reading its metadata and stream files.

use crate::error::{AgentError, AgentResult};
use crate::modules::{ActionValidator, Module, ModuleType};
use crate::request::ActionRequest;
use crate::response::{ActionOutcome, ActionStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const STATUS: &str = "status";

pub struct Status {
    spool_dir: PathBuf,
    actions: Vec<String>,
    input_validator: ActionValidator,
    output_validator: ActionValidator,
}

impl Status {
    pub fn new(spool_dir: PathBuf) -> Self {
        let mut input_validator = ActionValidator::new();
        input_validator
            .register(
                STATUS,
                &json!({
                    "type": "object",
                    "required": ["transaction_id"],
                    "properties": {"transaction_id": {"type": "string"}}
                }),
            )
            .expect("status input schema compiles");

        let mut output_validator = ActionValidator::new();
        output_validator
            .register(STATUS, &json!({"type": "object"}))
            .expect("status output schema compiles");

        Self {
            spool_dir,
            actions: vec![STATUS.to_string()],
            input_validator,
            output_validator,
        }
    }

    async fn read_stream_file(dir: &Path, name: &str) -> String {
        tokio::fs::read_to_string(dir.join(name))
            .await
            .unwrap_or_default()
    }
}

/// Status of a spooled transaction, derived from its metadata document.
/// Running until the completion rewrite lands; then the exit code and the
/// recorded execution error decide between success and failure.
fn derive_status(metadata: &Value) -> ActionStatus {
    if !metadata["completed"].as_bool().unwrap_or(false) {
        return ActionStatus::Running;
    }

    let exitcode = metadata["exitcode"].as_i64().unwrap_or(-1);
    let exec_error = metadata["exec_error"].as_str().unwrap_or_default();
    if exitcode == 0 && exec_error.is_empty() {
        ActionStatus::Success
    } else {
        ActionStatus::Failure
    }
}

#[async_trait]
impl Module for Status {
    fn name(&self) -> &str {
        STATUS
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Internal
    }

    fn actions(&self) -> &[String] {
        &self.actions
    }

    fn input_validator(&self) -> &ActionValidator {
        &self.input_validator
    }

    fn output_validator(&self) -> &ActionValidator {
        &self.output_validator
    }

    async fn execute_action(&self, request: &ActionRequest) -> AgentResult<ActionOutcome> {
        let transaction_id = request.params()["transaction_id"]
            .as_str()
            .ok_or_else(|| AgentError::request_processing("no transaction id in params"))?;

        let results_dir = self.spool_dir.join(transaction_id);
        let metadata_path = results_dir.join("metadata");

        let content = tokio::fs::read_to_string(&metadata_path).await.map_err(|_| {
            AgentError::request_processing(format!(
                "found no results for transaction {transaction_id}"
            ))
        })?;

        let metadata: Value = serde_json::from_str(&content).map_err(|e| {
            AgentError::request_processing(format!(
                "invalid metadata for transaction {transaction_id}: {e}"
            ))
        })?;

        let status = derive_status(&metadata);
        let std_out = Self::read_stream_file(&results_dir, "stdout").await;
        let std_err = Self::read_stream_file(&results_dir, "stderr").await;
        let exitcode = metadata["exitcode"].as_i64().unwrap_or(0);

        let results = json!({
            "transaction_id": transaction_id,
            "status": status.as_str(),
            "stdout": std_out,
            "stderr": std_err,
            "exitcode": exitcode,
        });

        Ok(ActionOutcome {
            module_type: ModuleType::Internal,
            results,
            std_out,
            std_err,
            exit_code: exitcode,
        })
    }
}
