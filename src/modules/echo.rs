//! Internal echo module, mostly useful to probe the agent end to end.

use crate::error::AgentResult;
use crate::modules::{ActionValidator, Module, ModuleType};
use crate::request::ActionRequest;
use crate::response::ActionOutcome;
use async_trait::async_trait;
use serde_json::json;

const ECHO: &str = "echo";

pub struct Echo {
    actions: Vec<String>,
    input_validator: ActionValidator,
    output_validator: ActionValidator,
}

impl Echo {
    pub fn new() -> Self {
        let mut input_validator = ActionValidator::new();
        input_validator
            .register(
                ECHO,
                &json!({
                    "type": "object",
                    "required": ["argument"]
                }),
            )
            .expect("echo input schema compiles");

        let mut output_validator = ActionValidator::new();
        output_validator
            .register(ECHO, &json!({"type": "object"}))
            .expect("echo output schema compiles");

        Self {
            actions: vec![ECHO.to_string()],
            input_validator,
            output_validator,
        }
    }
}

impl Default for Echo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for Echo {
    fn name(&self) -> &str {
        ECHO
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
        let argument = request.params()["argument"].clone();
        Ok(ActionOutcome::internal(json!({ "outcome": argument })))
    }
}
