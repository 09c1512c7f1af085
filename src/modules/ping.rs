//! Internal ping module: returns the hop list accumulated in the request's
//! debug chunk so callers can measure the delivery path.

use crate::error::{AgentError, AgentResult};
use crate::modules::{ActionValidator, Module, ModuleType};
use crate::request::ActionRequest;
use crate::response::ActionOutcome;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::error;

const PING: &str = "ping";

pub struct Ping {
    actions: Vec<String>,
    input_validator: ActionValidator,
    output_validator: ActionValidator,
}

impl Ping {
    pub fn new() -> Self {
        let mut input_validator = ActionValidator::new();
        input_validator
            .register(
                PING,
                &json!({
                    "type": "object",
                    "properties": {
                        "sender_timestamp": {"type": "string"}
                    }
                }),
            )
            .expect("ping input schema compiles");

        let mut output_validator = ActionValidator::new();
        output_validator
            .register(PING, &json!({"type": "object"}))
            .expect("ping output schema compiles");

        Self {
            actions: vec![PING.to_string()],
            input_validator,
            output_validator,
        }
    }

    fn ping(&self, request: &ActionRequest) -> AgentResult<Value> {
        let debug = &request.parsed_chunks().debug;
        if debug.is_empty() {
            error!("found no debug entry in the request message");
            return Err(AgentError::request_processing("no debug entry"));
        }

        let first_entry = &debug[0];
        match first_entry.get("hops") {
            Some(hops) if hops.is_array() => Ok(json!({ "request_hops": hops })),
            _ => {
                error!(entry = %first_entry, "failed to parse debug entry");
                Err(AgentError::request_processing(
                    "debug entry is not valid JSON",
                ))
            }
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for Ping {
    fn name(&self) -> &str {
        PING
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
        Ok(ActionOutcome::internal(self.ping(request)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::ParsedChunks;
    use crate::request::RequestType;

    fn ping_request(debug: Vec<Value>) -> ActionRequest {
        let chunks = ParsedChunks::new(
            json!({"id": "req-1", "sender": "s", "transaction_id": "t1"}),
            json!({
                "module": "ping",
                "action": "ping",
                "params": {"sender_timestamp": "0"},
                "transaction_id": "t1"
            }),
        )
        .with_debug(debug);

        ActionRequest::new(RequestType::Blocking, chunks).unwrap()
    }

    #[tokio::test]
    async fn test_ping_returns_request_hops() {
        let module = Ping::new();
        let request = ping_request(vec![json!({"hops": [{"server": "A"}]})]);

        let outcome = module.execute_action(&request).await.unwrap();

        assert_eq!(outcome.module_type, ModuleType::Internal);
        assert_eq!(
            outcome.results,
            json!({"request_hops": [{"server": "A"}]})
        );
    }

    #[tokio::test]
    async fn test_ping_without_debug_entry() {
        let module = Ping::new();
        let request = ping_request(vec![]);

        let err = module.execute_action(&request).await.unwrap_err();
        assert!(err.to_string().contains("no debug entry"));
    }

    #[tokio::test]
    async fn test_ping_with_malformed_debug_entry() {
        let module = Ping::new();
        let request = ping_request(vec![json!({"hops": "not-a-list"})]);

        let err = module.execute_action(&request).await.unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_ping_surface() {
        let module = Ping::new();
        assert_eq!(module.name(), "ping");
        assert!(module.has_action("ping"));
        assert!(!module.has_action("pong"));
        assert!(module.input_validator().has_schema("ping"));
    }
}
