//! Mock implementations for testing.
//!
//! Provides a mock Connector capturing every outbound message, to drive the
//! whole request lifecycle without a broker.

use crate::connector::Connector;
use crate::error::AgentError;
use crate::request::ActionRequest;
use crate::response::{ActionResponse, ResponseType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A captured PXP error: request id, transaction id, description
pub type CapturedPxpError = (String, String, String);
/// A captured PCP error: message id, description, endpoints
pub type CapturedPcpError = (String, String, Vec<String>);

/// Mock connector for testing
#[derive(Debug, Default)]
pub struct MockConnector {
    pub provisional_responses: Arc<Mutex<Vec<Value>>>,
    pub blocking_responses: Arc<Mutex<Vec<Value>>>,
    pub non_blocking_responses: Arc<Mutex<Vec<Value>>>,
    pub pxp_errors: Arc<Mutex<Vec<CapturedPxpError>>>,
    pub pcp_errors: Arc<Mutex<Vec<CapturedPcpError>>>,
    pub should_fail: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub async fn get_provisional_responses(&self) -> Vec<Value> {
        self.provisional_responses.lock().await.clone()
    }

    pub async fn get_blocking_responses(&self) -> Vec<Value> {
        self.blocking_responses.lock().await.clone()
    }

    pub async fn get_non_blocking_responses(&self) -> Vec<Value> {
        self.non_blocking_responses.lock().await.clone()
    }

    pub async fn get_pxp_errors(&self) -> Vec<CapturedPxpError> {
        self.pxp_errors.lock().await.clone()
    }

    pub async fn get_pcp_errors(&self) -> Vec<CapturedPcpError> {
        self.pcp_errors.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.provisional_responses.lock().await.clear();
        self.blocking_responses.lock().await.clear();
        self.non_blocking_responses.lock().await.clear();
        self.pxp_errors.lock().await.clear();
        self.pcp_errors.lock().await.clear();
    }

    fn fail_if_requested(&self) -> Result<(), AgentError> {
        if self.should_fail {
            Err(AgentError::connector("mock send failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Error = AgentError;

    async fn send_provisional_response(
        &self,
        request: &ActionRequest,
    ) -> Result<(), Self::Error> {
        self.fail_if_requested()?;
        self.provisional_responses
            .lock()
            .await
            .push(json!({"transaction_id": request.transaction_id()}));
        Ok(())
    }

    async fn send_blocking_response(
        &self,
        response_type: ResponseType,
        response: &ActionResponse,
        _request: &ActionRequest,
    ) -> Result<(), Self::Error> {
        self.fail_if_requested()?;
        self.blocking_responses
            .lock()
            .await
            .push(response.to_json(response_type));
        Ok(())
    }

    async fn send_non_blocking_response(
        &self,
        response: &ActionResponse,
        _request: &ActionRequest,
    ) -> Result<(), Self::Error> {
        self.fail_if_requested()?;
        self.non_blocking_responses
            .lock()
            .await
            .push(response.to_json(ResponseType::NonBlocking));
        Ok(())
    }

    async fn send_pxp_error(
        &self,
        request: &ActionRequest,
        description: &str,
    ) -> Result<(), Self::Error> {
        self.fail_if_requested()?;
        self.pxp_errors.lock().await.push((
            request.id().to_string(),
            request.transaction_id().to_string(),
            description.to_string(),
        ));
        Ok(())
    }

    async fn send_pcp_error(
        &self,
        id: &str,
        description: &str,
        endpoints: &[String],
    ) -> Result<(), Self::Error> {
        self.fail_if_requested()?;
        self.pcp_errors.lock().await.push((
            id.to_string(),
            description.to_string(),
            endpoints.to_vec(),
        ));
        Ok(())
    }
}
