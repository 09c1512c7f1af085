//! Request processor: validation, dispatch, and response emission.
//!
//! The processor owns the module registry and the task container, shares the
//! connector and the results mutex table with its workers, and runs on the
//! connector's inbound task. Blocking actions execute inline; non-blocking
//! actions get a results directory, a spawned worker, and a provisional
//! response.

use crate::config::AgentConfig;
use crate::connector::Connector;
use crate::error::{sanitize_error_description, AgentError, AgentResult};
use crate::modules::{Echo, ExternalModule, Module, ModuleType, Ping, Status};
use crate::protocol::messages::ParsedChunks;
use crate::request::{ActionRequest, RequestType};
use crate::response::{ActionResponse, ActionStatus, ResponseType};
use crate::spool::{ResultsMutexTable, ResultsStorage};
use crate::tasks::{DoneGuard, TaskContainer};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::{module_span, request_span};

const STATUS_MODULE: &str = "status";
const EXIT_FAILURE: i64 = 1;

/// Orchestrates the request lifecycle for one agent
pub struct RequestProcessor<C: Connector> {
    connector: Arc<C>,
    spool_path: PathBuf,
    modules: HashMap<String, Arc<dyn Module>>,
    modules_config: HashMap<String, Value>,
    mutex_table: Arc<ResultsMutexTable>,
    task_container: TaskContainer,
    drain_timeout: Duration,
}

impl<C: Connector + 'static> RequestProcessor<C> {
    /// Build a processor: load module configuration, the compiled-in
    /// modules, and the external modules found in the modules directory.
    pub async fn new(connector: Arc<C>, config: &AgentConfig) -> AgentResult<Self> {
        config.validate().map_err(AgentError::from)?;

        let modules_config = load_modules_configuration(&config.modules_config_dir).await;

        let mut processor = Self {
            connector,
            spool_path: config.spool_dir.clone(),
            modules: HashMap::new(),
            modules_config,
            mutex_table: Arc::new(ResultsMutexTable::new()),
            task_container: TaskContainer::new("action executer", config.task_capacity),
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
        };

        processor.load_internal_modules();

        if config.modules_dir.as_os_str().is_empty() {
            warn!("the modules directory was not provided; no external module will be loaded");
        } else {
            processor
                .load_external_modules_from(config)
                .await;
        }

        processor.log_loaded_modules();
        Ok(processor)
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn mutex_table(&self) -> &Arc<ResultsMutexTable> {
        &self.mutex_table
    }

    /// Wait for in-flight non-blocking tasks on shutdown; tasks still
    /// running after the drain timeout are abandoned.
    pub async fn shutdown(&self) -> usize {
        self.task_container.drain(self.drain_timeout).await
    }

    /// Process one inbound request. Every outcome is reported through the
    /// connector: a format error becomes a PCP error, any other
    /// request-scoped failure a PXP error, success a blocking response or a
    /// provisional (and later final) response.
    #[tracing::instrument(name = "process_request", skip(self, parsed_chunks))]
    pub async fn process_request(&self, request_type: RequestType, parsed_chunks: ParsedChunks) {
        trace!(envelope = %parsed_chunks.envelope, "about to validate and process request");
        let envelope = parsed_chunks.envelope.clone();

        let request = match ActionRequest::new(request_type, parsed_chunks) {
            Ok(request) => request,
            Err(e) => {
                // Bad message; the transaction cannot be identified
                let id = envelope
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let sender = envelope
                    .get("sender")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                error!(id = %id, sender = %sender, error = %e, "invalid request");

                let endpoints = vec![sender];
                let description = sanitize_error_description(&e.to_string());
                if let Err(send_err) = self
                    .connector
                    .send_pcp_error(&id, &description, &endpoints)
                    .await
                {
                    error!(id = %id, error = %send_err, "failed to send PCP error");
                }
                return;
            }
        };

        info!(
            request_id = request.id(),
            sender = request.sender(),
            transaction_id = request.transaction_id(),
            "processing {} request",
            request.request_type()
        );

        if let Err(e) = self.validate_request_content(&request) {
            error!(
                request_id = request.id(),
                transaction_id = request.transaction_id(),
                error = %e,
                "invalid {} request",
                request.request_type()
            );
            self.send_pxp_error(&request, &e.to_string()).await;
            return;
        }

        debug!(
            transaction_id = request.transaction_id(),
            "the {} request has been successfully validated",
            request.request_type()
        );

        let Some(module) = self.modules.get(request.module()).cloned() else {
            // Unreachable: content validation checked the registry
            self.send_pxp_error(&request, &format!("unknown module: {}", request.module()))
                .await;
            return;
        };

        match request.request_type() {
            RequestType::Blocking => {
                if let Err(e) = self.process_blocking_request(module, &request).await {
                    error!(
                        request_id = request.id(),
                        transaction_id = request.transaction_id(),
                        error = %e,
                        "failed to process blocking request"
                    );
                    self.send_pxp_error(&request, &e.to_string()).await;
                }
            }
            RequestType::NonBlocking => self.process_non_blocking_request(module, request).await,
        }
    }

    fn validate_request_content(&self, request: &ActionRequest) -> AgentResult<()> {
        let module = self.modules.get(request.module()).ok_or_else(|| {
            AgentError::registry_miss(format!("unknown module: {}", request.module()))
        })?;

        if !module.has_action(request.action()) {
            return Err(AgentError::registry_miss(format!(
                "unknown action '{}' for module '{}'",
                request.action(),
                request.module()
            )));
        }

        if module.module_type() == ModuleType::Internal
            && request.request_type() == RequestType::NonBlocking
        {
            return Err(AgentError::request_processing(format!(
                "the module '{}' supports only blocking requests",
                request.module()
            )));
        }

        debug!(
            request_id = request.id(),
            transaction_id = request.transaction_id(),
            "validating input parameters of '{} {}'",
            request.module(),
            request.action()
        );
        module
            .input_validator()
            .validate(request.action(), request.params())
            .map_err(|e| {
                debug!(
                    request_id = request.id(),
                    error = %e,
                    "invalid '{} {}' request",
                    request.module(),
                    request.action()
                );
                AgentError::validation(format!(
                    "invalid input for '{} {}'",
                    request.module(),
                    request.action()
                ))
            })
    }

    async fn process_blocking_request(
        &self,
        module: Arc<dyn Module>,
        request: &ActionRequest,
    ) -> AgentResult<()> {
        let execution_span = module_span!(
            module = request.module(),
            action = request.action(),
            transaction_id = request.transaction_id()
        );
        let outcome = module.execute_action(request).instrument(execution_span).await?;

        let mut response = ActionResponse::new(module.module_type(), request);
        let response_type = if request.module() == STATUS_MODULE {
            response.output = outcome.output();
            let queried_status = outcome.results["status"]
                .as_str()
                .and_then(ActionStatus::from_name)
                .unwrap_or(ActionStatus::Failure);
            response.set_valid_results_and_end(outcome.results, None);
            response.set_status(queried_status);
            ResponseType::StatusOutput
        } else {
            response.set_valid_results_and_end(outcome.results, None);
            ResponseType::Blocking
        };

        info!(
            request_id = request.id(),
            sender = request.sender(),
            "{} has completed",
            response.pretty_request_label()
        );

        if !response.valid_for(response_type) {
            return Err(AgentError::validation(format!(
                "invalid action metadata for the {}",
                response.pretty_request_label()
            )));
        }

        self.connector
            .send_blocking_response(response_type, &response, request)
            .await
            .map_err(|e| AgentError::connector(e.to_string()))
    }

    async fn process_non_blocking_request(&self, module: Arc<dyn Module>, mut request: ActionRequest) {
        request.set_results_dir(self.spool_path.join(request.transaction_id()));

        debug!(
            request_id = request.id(),
            sender = request.sender(),
            transaction_id = request.transaction_id(),
            "starting '{} {}' job",
            request.module(),
            request.action()
        );

        if self.task_container.at_capacity() {
            error!(
                transaction_id = request.transaction_id(),
                "cannot start '{} {}' job: the task container is at capacity",
                request.module(),
                request.action()
            );
            self.send_pxp_error(
                &request,
                "failed to start action task: the task container is at capacity",
            )
            .await;
            return;
        }

        let storage = match ResultsStorage::new(&request, &self.mutex_table).await {
            Ok(storage) => storage,
            Err(e) => {
                error!(
                    transaction_id = request.transaction_id(),
                    error = %e,
                    "failed to initialize the result files for '{} {}'",
                    request.module(),
                    request.action()
                );
                self.send_pxp_error(&request, &format!("failed to initialize result files: {e}"))
                    .await;
                return;
            }
        };

        // The provisional receipt goes out before the worker exists, so the
        // final response can never overtake it.
        if let Err(e) = self.connector.send_provisional_response(&request).await {
            error!(
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to send provisional response"
            );
            self.send_pxp_error(&request, &format!("failed to send provisional response: {e}"))
                .await;
            if let Err(remove_err) = self.mutex_table.remove(request.transaction_id()) {
                error!(
                    transaction_id = request.transaction_id(),
                    error = %remove_err,
                    "failed to remove the mutex for the transaction"
                );
            }
            return;
        }

        // Flag for signaling from the task to the container
        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let connector = Arc::clone(&self.connector);
            let mutex_table = Arc::clone(&self.mutex_table);
            let done_flag = Arc::clone(&done);
            let worker_span = request_span!(
                request_id = request.id(),
                transaction_id = request.transaction_id()
            );
            let request = request.clone();
            tokio::spawn(
                async move {
                    let _done_guard = DoneGuard::new(done_flag);
                    non_blocking_action_task(module, request, storage, connector, mutex_table)
                        .await;
                }
                .instrument(worker_span),
            )
        };

        if let Err(e) = self.task_container.add(worker, done) {
            // Unreachable given the capacity check above
            error!(
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to track action task"
            );
        }
    }

    async fn send_pxp_error(&self, request: &ActionRequest, description: &str) {
        let description = sanitize_error_description(description);
        if let Err(e) = self.connector.send_pxp_error(request, &description).await {
            error!(
                request_id = request.id(),
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to send PXP error"
            );
        }
    }

    fn load_internal_modules(&mut self) {
        // No external configuration for internal modules
        self.modules
            .insert("echo".to_string(), Arc::new(Echo::new()));
        self.modules
            .insert("ping".to_string(), Arc::new(Ping::new()));
        self.modules.insert(
            STATUS_MODULE.to_string(),
            Arc::new(Status::new(self.spool_path.clone())),
        );
    }

    async fn load_external_modules_from(&mut self, config: &AgentConfig) {
        let dir_path = &config.modules_dir;
        info!(dir = %dir_path.display(), "loading external modules");

        let mut dir = match tokio::fs::read_dir(dir_path).await {
            Ok(dir) => dir,
            Err(_) => {
                warn!(
                    dir = %dir_path.display(),
                    "failed to locate the modules directory; no external modules will be loaded"
                );
                return;
            }
        };

        let max_output_size = config.max_output_size;
        let default_timeout = Duration::from_secs(config.default_action_timeout_secs);

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file || !is_module_candidate(&path) {
                continue;
            }

            match ExternalModule::load(&path, max_output_size, default_timeout).await {
                Ok(mut module) => {
                    if let Some(configuration) = self.modules_config.get(module.name()) {
                        if let Err(e) = module.validate_configuration(configuration.clone()) {
                            error!(path = %path.display(), error = %e, "failed to configure module");
                            continue;
                        }
                        debug!(
                            module = module.name(),
                            "the module configuration has been validated"
                        );
                    }
                    self.modules
                        .insert(module.name().to_string(), Arc::new(module));
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to load module");
                }
            }
        }
    }

    fn log_loaded_modules(&self) {
        for name in self.module_names() {
            let module = &self.modules[&name];
            let actions = module.actions().join(", ");
            if actions.is_empty() {
                debug!(module = %name, "loaded module - found no action");
            } else {
                debug!(module = %name, actions = %actions, "loaded module");
            }
        }
    }
}

/// Executables directly inside the modules directory: no extension on
/// POSIX, `.bat` on Windows.
fn is_module_candidate(path: &std::path::Path) -> bool {
    if cfg!(windows) {
        path.extension().map(|e| e == "bat").unwrap_or(false)
    } else {
        path.extension().is_none()
    }
}

/// Read every `<module>.conf` JSON file in the modules configuration
/// directory; the file stem is the module name.
async fn load_modules_configuration(dir: &std::path::Path) -> HashMap<String, Value> {
    let mut modules_config = HashMap::new();

    if dir.as_os_str().is_empty() {
        return modules_config;
    }
    info!(dir = %dir.display(), "loading external modules configuration");

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => {
            debug!(
                dir = %dir.display(),
                "the modules configuration directory does not exist; \
                 no module configuration file will be loaded"
            );
            return modules_config;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().map(|e| e != "conf").unwrap_or(true) {
            continue;
        }
        let Some(module_name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<Value>(&content) {
                Ok(configuration) => {
                    debug!(module = module_name, file = %path.display(), "loaded module configuration");
                    modules_config.insert(module_name.to_string(), configuration);
                }
                Err(e) => {
                    warn!(
                        file = %path.display(),
                        error = %e,
                        "cannot load module config file; it contains invalid JSON"
                    );
                }
            },
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot read module config file");
            }
        }
    }

    modules_config
}

/// Body of one non-blocking worker.
///
/// The per-transaction mutex handle is obtained up front with a deferred
/// lock: the success path locks before recording the outcome, any other
/// path locks at the cleanup point below. The final metadata write happens
/// under the mutex, so `completed=true` lands in the same atomic rewrite as
/// the exit code and execution error; afterwards the table entry is removed
/// and the mutex released. This function has no early returns - the cleanup
/// tail runs on every path, and the caller's drop guard raises the done
/// flag even on panic.
pub(crate) async fn non_blocking_action_task<C: Connector>(
    module: Arc<dyn Module>,
    request: ActionRequest,
    mut storage: ResultsStorage,
    connector: Arc<C>,
    mutex_table: Arc<ResultsMutexTable>,
) {
    let timer = Instant::now();
    let mut exec_error = String::new();
    let mut exit_code = EXIT_FAILURE;

    let transaction_mutex = match mutex_table.get(request.transaction_id()) {
        Ok(mutex) => Some(mutex),
        Err(e) => {
            // This is unexpected
            error!(
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to obtain the mutex for the transaction"
            );
            None
        }
    };
    let mut transaction_guard = None;

    let execution_span = module_span!(
        module = request.module(),
        action = request.action(),
        transaction_id = request.transaction_id()
    );
    match module.execute_action(&request).instrument(execution_span).await {
        Ok(outcome) => {
            if let Some(mutex) = &transaction_mutex {
                trace!(
                    transaction_id = request.transaction_id(),
                    "locking transaction mutex"
                );
                transaction_guard = Some(mutex.lock().await);
            } else {
                trace!(
                    transaction_id = request.transaction_id(),
                    "no mutex handle for the transaction; metadata access will not be locked"
                );
            }
            exit_code = outcome.exit_code;

            info!(
                request_id = request.id(),
                sender = request.sender(),
                transaction_id = request.transaction_id(),
                "non-blocking request has completed"
            );

            if request.notify_outcome() {
                let mut response = ActionResponse::new(module.module_type(), &request);
                response.output = outcome.output();
                response.set_valid_results_and_end(outcome.results, None);

                if !response.valid_for(ResponseType::NonBlocking) {
                    exec_error =
                        "invalid action metadata for the non blocking response\n".to_string();
                    error!(
                        transaction_id = request.transaction_id(),
                        "refusing to send the {}: invalid action metadata",
                        response.pretty_request_label()
                    );
                } else if let Err(e) =
                    connector.send_non_blocking_response(&response, &request).await
                {
                    exec_error = format!("Failed to send non blocking response: {e}\n");
                    error!(
                        transaction_id = request.transaction_id(),
                        error = %e,
                        "failed to send non blocking response for '{} {}'",
                        request.module(),
                        request.action()
                    );
                }
            }
        }
        Err(e) => {
            exec_error = format!("Failed to execute: {e}\n");
            error!(
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to execute '{} {}'",
                request.module(),
                request.action()
            );

            let description = sanitize_error_description(&e.to_string());
            if let Err(send_err) = connector.send_pxp_error(&request, &description).await {
                error!(
                    transaction_id = request.transaction_id(),
                    error = %send_err,
                    "failed to send PXP error for (failed) '{} {}'",
                    request.module(),
                    request.action()
                );
            }
        }
    }

    // Cleanup tail, shared by both branches
    if transaction_guard.is_none() {
        if let Some(mutex) = &transaction_mutex {
            trace!(
                transaction_id = request.transaction_id(),
                "locking transaction mutex - the action did not complete successfully"
            );
            transaction_guard = Some(mutex.lock().await);
        }
    }

    let duration = format!("{:.3} s", timer.elapsed().as_secs_f64());
    if let Err(e) = storage.write_metadata(exit_code, &exec_error, &duration).await {
        error!(
            transaction_id = request.transaction_id(),
            error = %e,
            "failed to write metadata of non blocking request"
        );
    }

    if transaction_mutex.is_some() {
        if let Err(e) = mutex_table.remove(request.transaction_id()) {
            error!(
                transaction_id = request.transaction_id(),
                error = %e,
                "failed to remove the mutex for the transaction"
            );
        }
    }
    drop(transaction_guard);
    trace!(
        transaction_id = request.transaction_id(),
        "unlocked transaction mutex"
    );
}
