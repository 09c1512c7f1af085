//! rexd - remote execution agent core
//!
//! The request-processor core of an agent participating in a
//! publish/subscribe control plane. It receives structured requests over a
//! message-bus transport, dispatches each to a named module (compiled in or
//! an external executable), and reports results back:
//!
//! - Protocol message types with format validation
//! - Module registry with JSON schema validation of inputs and outputs
//! - External modules driven over the stdin-JSON / stdout-JSON contract
//! - Spooled per-transaction state for non-blocking requests
//! - Bounded worker tracking with drain-on-shutdown
//!
//! # Quick Start
//!
//! ```no_run
//! use rexd::config::AgentConfig;
//! use rexd::processor::RequestProcessor;
//! use rexd::protocol::ParsedChunks;
//! use rexd::request::RequestType;
//! use rexd::testing::mocks::MockConnector;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), rexd::error::AgentError> {
//! let connector = Arc::new(MockConnector::new());
//! let config = AgentConfig::with_spool_dir("/var/spool/rexd");
//! let processor = RequestProcessor::new(connector, &config).await?;
//!
//! let chunks = ParsedChunks::new(
//!     json!({"id": "req-1", "sender": "controller", "transaction_id": "t1"}),
//!     json!({
//!         "module": "echo",
//!         "action": "echo",
//!         "params": {"argument": "hello"},
//!         "transaction_id": "t1"
//!     }),
//! );
//! processor.process_request(RequestType::Blocking, chunks).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod error;
pub mod modules;
pub mod observability;
pub mod processor;
pub mod protocol;
pub mod request;
pub mod response;
pub mod spool;
pub mod tasks;
pub mod testing;

pub use config::AgentConfig;
pub use connector::Connector;
pub use error::{AgentError, AgentResult};
pub use modules::{Module, ModuleType};
pub use processor::RequestProcessor;
pub use protocol::ParsedChunks;
pub use request::{ActionRequest, RequestType};
pub use response::{ActionOutcome, ActionResponse, ActionStatus, ResponseType};
