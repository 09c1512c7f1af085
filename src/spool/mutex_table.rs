//! Per-transaction mutual exclusion.
//!
//! Maps a transaction id to the mutex guarding writes to that transaction's
//! metadata file. The table itself is guarded by an access mutex; the
//! per-transaction mutexes are async so a writer may hold one across file
//! I/O. The table is an explicitly constructed service owned by the request
//! processor and handed to worker tasks by shared handle.

use crate::error::{AgentError, AgentResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Handle to one transaction's mutex
pub type TransactionMutex = Arc<tokio::sync::Mutex<()>>;

/// Table of live non-blocking transactions and their mutexes
#[derive(Debug, Default)]
pub struct ResultsMutexTable {
    // the access mutex
    inner: Mutex<HashMap<String, TransactionMutex>>,
}

impl ResultsMutexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mutex for the transaction. Returns false when an entry was
    /// already cached, which can happen on retry of an already-seen id.
    pub fn add(&self, transaction_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("access mutex poisoned");
        if inner.contains_key(transaction_id) {
            return false;
        }
        inner.insert(
            transaction_id.to_string(),
            Arc::new(tokio::sync::Mutex::new(())),
        );
        true
    }

    pub fn exists(&self, transaction_id: &str) -> bool {
        self.inner
            .lock()
            .expect("access mutex poisoned")
            .contains_key(transaction_id)
    }

    pub fn get(&self, transaction_id: &str) -> AgentResult<TransactionMutex> {
        self.inner
            .lock()
            .expect("access mutex poisoned")
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| {
                AgentError::mutex_table(format!("no entry for transaction {transaction_id}"))
            })
    }

    pub fn remove(&self, transaction_id: &str) -> AgentResult<()> {
        self.inner
            .lock()
            .expect("access mutex poisoned")
            .remove(transaction_id)
            .map(|_| ())
            .ok_or_else(|| {
                AgentError::mutex_table(format!("no entry for transaction {transaction_id}"))
            })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("access mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
