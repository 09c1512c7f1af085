//! Per-transaction results directory.
//!
//! Each non-blocking transaction owns `<spool>/<transaction_id>/` with a
//! JSON `metadata` document plus the stdout/stderr/exitcode files of
//! external executions. The metadata file is always replaced atomically
//! (write to a temp file in the same directory, then rename), so a reader
//! either sees the previous document or the new one in full.

use crate::error::{AgentError, AgentResult};
use crate::request::ActionRequest;
use crate::spool::ResultsMutexTable;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Atomically replace `path` with `content`
pub async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Writer for one transaction's metadata document
#[derive(Debug)]
pub struct ResultsStorage {
    metadata_file: PathBuf,
    action_metadata: Value,
}

impl ResultsStorage {
    /// Create the results directory, write the initial metadata, and
    /// register the transaction in the mutex table.
    pub async fn new(
        request: &ActionRequest,
        mutex_table: &ResultsMutexTable,
    ) -> AgentResult<Self> {
        let results_dir = request
            .results_dir()
            .ok_or_else(|| AgentError::storage("no results directory set on the request"))?;

        if tokio::fs::metadata(results_dir).await.is_err() {
            debug!(
                module = request.module(),
                action = request.action(),
                transaction_id = request.transaction_id(),
                dir = %results_dir.display(),
                "creating results directory"
            );
            tokio::fs::create_dir_all(results_dir).await.map_err(|e| {
                AgentError::storage(format!("failed to create results directory: {e}"))
            })?;
        }

        let input = if request.params_txt().is_empty() {
            "none".to_string()
        } else {
            request.params_txt().to_string()
        };

        let action_metadata = json!({
            "module": request.module(),
            "action": request.action(),
            "transaction_id": request.transaction_id(),
            "completed": false,
            "duration": "0 s",
            "input": input,
        });

        let metadata_file = results_dir.join("metadata");
        atomic_write(&metadata_file, &(action_metadata.to_string() + "\n"))
            .await
            .map_err(|e| AgentError::storage(format!("failed to write metadata: {e}")))?;

        if !mutex_table.add(request.transaction_id()) {
            // Can happen on retry of an already-seen id; not fatal
            debug!(
                transaction_id = request.transaction_id(),
                "mutex for transaction is already cached"
            );
        }

        Ok(Self {
            metadata_file,
            action_metadata,
        })
    }

    /// Record completion. The exit code, execution error, and duration land
    /// in the same atomic rewrite as `completed=true`.
    pub async fn write_metadata(
        &mut self,
        exit_code: i64,
        exec_error: &str,
        duration: &str,
    ) -> AgentResult<()> {
        self.action_metadata["completed"] = json!(true);
        self.action_metadata["duration"] = json!(duration);
        self.action_metadata["exitcode"] = json!(exit_code);
        self.action_metadata["exec_error"] = json!(exec_error);

        atomic_write(&self.metadata_file, &(self.action_metadata.to_string() + "\n"))
            .await
            .map_err(|e| AgentError::storage(format!("failed to write metadata: {e}")))
    }

    pub fn metadata_file(&self) -> &Path {
        &self.metadata_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ParsedChunks;
    use crate::request::RequestType;
    use serde_json::json;

    fn non_blocking_request(spool: &Path, transaction_id: &str) -> ActionRequest {
        let mut request = ActionRequest::new(
            RequestType::NonBlocking,
            ParsedChunks::new(
                json!({"id": "req-1", "sender": "s", "transaction_id": transaction_id}),
                json!({
                    "module": "reverse",
                    "action": "string",
                    "params": {"argument": "maradona"},
                    "transaction_id": transaction_id
                }),
            ),
        )
        .unwrap();
        request.set_results_dir(spool.join(transaction_id));
        request
    }

    #[tokio::test]
    async fn test_initial_metadata() {
        let spool = tempfile::tempdir().unwrap();
        let table = ResultsMutexTable::new();
        let request = non_blocking_request(spool.path(), "t1");

        let storage = ResultsStorage::new(&request, &table).await.unwrap();

        let content = tokio::fs::read_to_string(storage.metadata_file())
            .await
            .unwrap();
        let metadata: Value = serde_json::from_str(&content).unwrap();

        assert_eq!(metadata["module"], json!("reverse"));
        assert_eq!(metadata["action"], json!("string"));
        assert_eq!(metadata["transaction_id"], json!("t1"));
        assert_eq!(metadata["completed"], json!(false));
        assert_eq!(metadata["duration"], json!("0 s"));
        assert_eq!(metadata["input"], json!(r#"{"argument":"maradona"}"#));
        assert!(table.exists("t1"));
    }

    #[tokio::test]
    async fn test_input_none_without_params() {
        let spool = tempfile::tempdir().unwrap();
        let table = ResultsMutexTable::new();
        let mut request = ActionRequest::new(
            RequestType::NonBlocking,
            ParsedChunks::new(
                json!({"id": "req-1", "sender": "s", "transaction_id": "t2"}),
                json!({"module": "m", "action": "a", "transaction_id": "t2"}),
            ),
        )
        .unwrap();
        request.set_results_dir(spool.path().join("t2"));

        let storage = ResultsStorage::new(&request, &table).await.unwrap();
        let content = tokio::fs::read_to_string(storage.metadata_file())
            .await
            .unwrap();
        let metadata: Value = serde_json::from_str(&content).unwrap();

        assert_eq!(metadata["input"], json!("none"));
    }

    #[tokio::test]
    async fn test_write_metadata_completes_document() {
        let spool = tempfile::tempdir().unwrap();
        let table = ResultsMutexTable::new();
        let request = non_blocking_request(spool.path(), "t3");

        let mut storage = ResultsStorage::new(&request, &table).await.unwrap();
        storage.write_metadata(0, "", "0.250 s").await.unwrap();

        let content = tokio::fs::read_to_string(storage.metadata_file())
            .await
            .unwrap();
        let metadata: Value = serde_json::from_str(&content).unwrap();

        assert_eq!(metadata["completed"], json!(true));
        assert_eq!(metadata["exitcode"], json!(0));
        assert_eq!(metadata["exec_error"], json!(""));
        assert_eq!(metadata["duration"], json!("0.250 s"));
    }

    #[tokio::test]
    async fn test_metadata_roundtrip_is_stable() {
        let spool = tempfile::tempdir().unwrap();
        let table = ResultsMutexTable::new();
        let request = non_blocking_request(spool.path(), "t4");

        let mut storage = ResultsStorage::new(&request, &table).await.unwrap();
        storage
            .write_metadata(1, "Failed to execute: boom\n", "1.500 s")
            .await
            .unwrap();

        let first = tokio::fs::read_to_string(storage.metadata_file())
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&first).unwrap();
        let second = parsed.to_string() + "\n";

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_not_fatal() {
        let spool = tempfile::tempdir().unwrap();
        let table = ResultsMutexTable::new();
        let request = non_blocking_request(spool.path(), "t5");

        let _first = ResultsStorage::new(&request, &table).await.unwrap();
        let _second = ResultsStorage::new(&request, &table).await.unwrap();

        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_storage_error_on_uncreatable_directory() {
        let spool = tempfile::tempdir().unwrap();
        // A file where the directory should go
        let blocker = spool.path().join("t6");
        tokio::fs::write(&blocker, "not a directory").await.unwrap();

        let table = ResultsMutexTable::new();
        let request = non_blocking_request(spool.path(), "t6");

        let err = ResultsStorage::new(&request, &table).await.unwrap_err();
        assert!(matches!(err, AgentError::Storage { .. }));
        assert!(!table.exists("t6"));
    }
}
