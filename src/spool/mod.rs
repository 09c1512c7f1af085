//! Durable per-transaction state for non-blocking requests.

pub mod mutex_table;
pub mod storage;

pub use mutex_table::{ResultsMutexTable, TransactionMutex};
pub use storage::ResultsStorage;
