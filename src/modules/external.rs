//! External modules: executables discovered on disk and driven over the
//! stdin-JSON / stdout-JSON subprocess contract.
//!
//! Invoked with no arguments an executable must print its metadata document,
//! declaring its actions with their input and output schemas. Invoked with
//! an action name it receives `{configuration, input}` on stdin and must
//! print results matching the declared output schema, exiting zero.

use crate::error::{AgentError, AgentResult};
use crate::modules::{ActionValidator, Module, ModuleType};
use crate::request::{ActionRequest, RequestType};
use crate::response::ActionOutcome;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

const INTERACTIVE_BEHAVIOR: &str = "interactive";
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

static MODULE_METADATA_VALIDATOR: Lazy<jsonschema::Validator> = Lazy::new(|| {
    jsonschema::validator_for(&json!({
        "type": "object",
        "required": ["actions"],
        "properties": {
            "configuration": {"type": "object"},
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "input", "output"],
                    "properties": {
                        "name": {"type": "string"},
                        "input": {"type": "object"},
                        "output": {"type": "object"},
                        "behavior": {"type": "string"},
                        "timeout": {"type": "number"}
                    }
                }
            }
        }
    }))
    .expect("module metadata schema compiles")
});

#[derive(Debug, Clone, Default)]
struct ActionSpec {
    behavior: Option<String>,
    timeout: Option<Duration>,
}

/// Adapter driving one executable module
#[derive(Debug)]
pub struct ExternalModule {
    module_name: String,
    path: PathBuf,
    actions: Vec<String>,
    action_specs: HashMap<String, ActionSpec>,
    input_validator: ActionValidator,
    output_validator: ActionValidator,
    configuration_schema: Option<Value>,
    configuration: Value,
    max_output_size: usize,
    default_timeout: Duration,
}

/// Keep the last part of a stream for error descriptions
fn tail(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim_end();
    match trimmed.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}

impl ExternalModule {
    /// Load an executable as a module by querying and validating its
    /// metadata document. Fails with a loading error on any irregularity;
    /// the caller skips the module.
    pub async fn load(
        path: &Path,
        max_output_size: usize,
        default_timeout: Duration,
    ) -> AgentResult<Self> {
        let module_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                AgentError::module_loading(format!("invalid module file name: {}", path.display()))
            })?
            .to_string();

        let metadata = Self::discover_metadata(path, max_output_size).await?;

        if let Err(e) = MODULE_METADATA_VALIDATOR.validate(&metadata) {
            return Err(AgentError::module_loading(format!(
                "invalid metadata for module '{module_name}': at '{}': {e}",
                e.instance_path
            )));
        }

        let mut actions = Vec::new();
        let mut action_specs = HashMap::new();
        let mut input_validator = ActionValidator::new();
        let mut output_validator = ActionValidator::new();

        for action in metadata["actions"].as_array().expect("validated above") {
            let name = action["name"].as_str().expect("validated above").to_string();
            input_validator.register(&name, &action["input"])?;
            output_validator.register(&name, &action["output"])?;
            action_specs.insert(
                name.clone(),
                ActionSpec {
                    behavior: action
                        .get("behavior")
                        .and_then(Value::as_str)
                        .map(String::from),
                    timeout: action
                        .get("timeout")
                        .and_then(Value::as_u64)
                        .map(Duration::from_secs),
                },
            );
            actions.push(name);
        }

        Ok(Self {
            module_name,
            path: path.to_path_buf(),
            actions,
            action_specs,
            input_validator,
            output_validator,
            configuration_schema: metadata.get("configuration").cloned(),
            configuration: Value::Null,
            max_output_size,
            default_timeout,
        })
    }

    /// Apply an external configuration blob, validating it against the
    /// schema the module declared in its metadata.
    pub fn validate_configuration(&mut self, configuration: Value) -> AgentResult<()> {
        if let Some(schema) = &self.configuration_schema {
            let validator = jsonschema::validator_for(schema).map_err(|e| {
                AgentError::module_loading(format!(
                    "invalid configuration schema for module '{}': {e}",
                    self.module_name
                ))
            })?;
            validator.validate(&configuration).map_err(|e| {
                AgentError::validation(format!(
                    "invalid configuration for module '{}': at '{}': {e}",
                    self.module_name, e.instance_path
                ))
            })?;
        }
        self.configuration = configuration;
        Ok(())
    }

    async fn discover_metadata(path: &Path, max_output_size: usize) -> AgentResult<Value> {
        let output = tokio::time::timeout(
            METADATA_TIMEOUT,
            Command::new(path)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            AgentError::module_loading(format!(
                "timed out waiting for metadata from {}",
                path.display()
            ))
        })?
        .map_err(|e| {
            AgentError::module_loading(format!("failed to run {}: {e}", path.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::module_loading(format!(
                "{} exited with {} while being queried for metadata: {}",
                path.display(),
                output.status,
                tail(&stderr, 500)
            )));
        }
        if output.stdout.len() > max_output_size {
            return Err(AgentError::module_loading(format!(
                "metadata of {} exceeds the output size limit",
                path.display()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            AgentError::module_loading(format!(
                "did not return valid JSON metadata from {}: {e}",
                path.display()
            ))
        })
    }

    fn action_timeout(&self, action: &str) -> Duration {
        self.action_specs
            .get(action)
            .and_then(|spec| spec.timeout)
            .unwrap_or(self.default_timeout)
    }

    fn is_interactive(&self, request: &ActionRequest) -> bool {
        request.request_type() == RequestType::NonBlocking
            && request.results_dir().is_some()
            && self
                .action_specs
                .get(request.action())
                .and_then(|spec| spec.behavior.as_deref())
                == Some(INTERACTIVE_BEHAVIOR)
    }

    fn input_document(&self, request: &ActionRequest) -> Value {
        json!({
            "configuration": self.configuration,
            "input": request.params(),
        })
    }

    /// Run the action with both streams captured in memory through bounded
    /// readers; stdin is streamed concurrently to avoid pipe deadlock.
    async fn run_captured(
        &self,
        request: &ActionRequest,
        timeout: Duration,
    ) -> AgentResult<(String, String, i64)> {
        let mut child = Command::new(&self.path)
            .arg(request.action())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::module_processing(format!(
                    "failed to spawn '{}': {e}",
                    self.module_name
                ))
            })?;

        let input_bytes = self.input_document(request).to_string().into_bytes();
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::module_processing("failed to open stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::module_processing("failed to open stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::module_processing("failed to open stderr"))?;

        // One extra byte so an at-limit stream is distinguishable from an
        // overflowing one.
        let limit = self.max_output_size as u64 + 1;

        let executed = tokio::time::timeout(timeout, async {
            let mut out_buf = Vec::new();
            let mut err_buf = Vec::new();
            let write = async {
                if let Err(e) = stdin.write_all(&input_bytes).await {
                    debug!(module = %self.module_name, error = %e, "module did not consume stdin");
                }
                drop(stdin);
            };
            let mut stdout_limited = stdout.take(limit);
            let mut stderr_limited = stderr.take(limit);
            let (_, out_read, err_read, status) = tokio::join!(
                write,
                stdout_limited.read_to_end(&mut out_buf),
                stderr_limited.read_to_end(&mut err_buf),
                child.wait()
            );
            out_read
                .map_err(|e| AgentError::module_processing(format!("failed to read stdout: {e}")))?;
            err_read
                .map_err(|e| AgentError::module_processing(format!("failed to read stderr: {e}")))?;
            let status = status
                .map_err(|e| AgentError::module_processing(format!("failed to await exit: {e}")))?;
            Ok::<_, AgentError>((out_buf, err_buf, status))
        })
        .await;

        let (out_buf, err_buf, status) = match executed {
            Ok(inner) => inner?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(AgentError::module_processing(format!(
                    "timeout after {} s",
                    timeout.as_secs()
                )));
            }
        };

        if out_buf.len() > self.max_output_size || err_buf.len() > self.max_output_size {
            return Err(AgentError::module_processing(format!(
                "'{} {}' exceeded the output size limit",
                self.module_name,
                request.action()
            )));
        }

        Ok((
            String::from_utf8_lossy(&out_buf).into_owned(),
            String::from_utf8_lossy(&err_buf).into_owned(),
            status.code().unwrap_or(-1) as i64,
        ))
    }

    /// Run an interactive action: the child writes straight into the
    /// results-directory stream files, which are read back after exit.
    async fn run_interactive(
        &self,
        request: &ActionRequest,
        timeout: Duration,
    ) -> AgentResult<(String, String, i64)> {
        let results_dir = request
            .results_dir()
            .ok_or_else(|| AgentError::module_processing("no results directory set"))?
            .to_path_buf();

        let stdout_file = std::fs::File::create(results_dir.join("stdout"))
            .map_err(|e| AgentError::module_processing(format!("failed to create stdout file: {e}")))?;
        let stderr_file = std::fs::File::create(results_dir.join("stderr"))
            .map_err(|e| AgentError::module_processing(format!("failed to create stderr file: {e}")))?;

        let mut child = Command::new(&self.path)
            .arg(request.action())
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::module_processing(format!(
                    "failed to spawn '{}': {e}",
                    self.module_name
                ))
            })?;

        let input_bytes = self.input_document(request).to_string().into_bytes();
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&input_bytes).await {
                debug!(module = %self.module_name, error = %e, "module did not consume stdin");
            }
        }

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status
                .map_err(|e| AgentError::module_processing(format!("failed to await exit: {e}")))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(AgentError::module_processing(format!(
                    "timeout after {} s",
                    timeout.as_secs()
                )));
            }
        };

        let std_out = tokio::fs::read_to_string(results_dir.join("stdout"))
            .await
            .unwrap_or_default();
        let std_err = tokio::fs::read_to_string(results_dir.join("stderr"))
            .await
            .unwrap_or_default();

        Ok((std_out, std_err, status.code().unwrap_or(-1) as i64))
    }

    /// Persist the captured streams next to the transaction's metadata
    async fn persist_streams(results_dir: &Path, std_out: &str, std_err: &str, exit_code: i64) {
        for (name, content) in [
            ("stdout", std_out.to_string()),
            ("stderr", std_err.to_string()),
            ("exitcode", format!("{exit_code}\n")),
        ] {
            if let Err(e) = tokio::fs::write(results_dir.join(name), content).await {
                warn!(file = name, error = %e, "failed to persist stream file");
            }
        }
    }
}

#[async_trait]
impl Module for ExternalModule {
    fn name(&self) -> &str {
        &self.module_name
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::External
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
        let action = request.action();
        let timeout = self.action_timeout(action);
        let interactive = self.is_interactive(request);

        let (std_out, std_err, exit_code) = if interactive {
            self.run_interactive(request, timeout).await?
        } else {
            self.run_captured(request, timeout).await?
        };

        if let Some(results_dir) = request.results_dir() {
            if interactive {
                // stdout/stderr were redirected there already
                if let Err(e) =
                    tokio::fs::write(results_dir.join("exitcode"), format!("{exit_code}\n")).await
                {
                    warn!(file = "exitcode", error = %e, "failed to persist stream file");
                }
            } else {
                Self::persist_streams(results_dir, &std_out, &std_err, exit_code).await;
            }
        }

        if exit_code != 0 {
            let stderr_tail = tail(&std_err, 500);
            let description = if stderr_tail.is_empty() {
                format!("'{} {action}' failed with exit code {exit_code}", self.module_name)
            } else {
                format!(
                    "'{} {action}' failed with exit code {exit_code}: {stderr_tail}",
                    self.module_name
                )
            };
            return Err(AgentError::module_processing(description));
        }

        let results: Value = serde_json::from_str(std_out.trim()).map_err(|_| {
            AgentError::module_processing(format!(
                "'{} {action}' returned invalid JSON on stdout: {}",
                self.module_name,
                tail(&std_err, 500)
            ))
        })?;

        self.output_validator
            .validate(action, &results)
            .map_err(|e| {
                AgentError::module_processing(format!(
                    "invalid output for '{} {action}': {e}",
                    self.module_name
                ))
            })?;

        Ok(ActionOutcome::external(results, std_out, std_err, exit_code))
    }
}
