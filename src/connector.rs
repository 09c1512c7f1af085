//! Connector seam between the request processor and the wire transport.
//!
//! The transport implementation behind this trait owns message signing,
//! addressing, and delivery; the processor only decides what to send and to
//! whom. Implementations must be safe for concurrent sends, since worker
//! tasks share the connector with the inbound path.

use crate::request::ActionRequest;
use crate::response::{ActionResponse, ResponseType};

/// Outbound message sink used by the request processor and its workers
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Acknowledge receipt of a non-blocking request: `{transaction_id}`
    async fn send_provisional_response(&self, request: &ActionRequest)
        -> Result<(), Self::Error>;

    /// Final reply to a blocking request, shaped by `response_type`
    /// (`Blocking` or `StatusOutput`)
    async fn send_blocking_response(
        &self,
        response_type: ResponseType,
        response: &ActionResponse,
        request: &ActionRequest,
    ) -> Result<(), Self::Error>;

    /// Push the final result of a non-blocking request whose caller asked
    /// to be notified
    async fn send_non_blocking_response(
        &self,
        response: &ActionResponse,
        request: &ActionRequest,
    ) -> Result<(), Self::Error>;

    /// Application-level error, addressed to the request's sender within
    /// its transaction
    async fn send_pxp_error(
        &self,
        request: &ActionRequest,
        description: &str,
    ) -> Result<(), Self::Error>;

    /// Transport-level error, for messages whose transaction cannot be
    /// identified
    async fn send_pcp_error(
        &self,
        id: &str,
        description: &str,
        endpoints: &[String],
    ) -> Result<(), Self::Error>;
}
