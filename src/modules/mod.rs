//! Module abstraction and the compiled-in modules.
//!
//! A module is a named handler exposing one or more actions, each with an
//! input and an output schema. Internal modules are compiled in and accept
//! only blocking requests; external modules wrap an executable following the
//! stdin-JSON / stdout-JSON contract.

use crate::error::{AgentError, AgentResult};
use crate::request::ActionRequest;
use crate::response::ActionOutcome;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub mod echo;
pub mod external;
pub mod ping;
pub mod status;

pub use echo::Echo;
pub use external::ExternalModule;
pub use ping::Ping;
pub use status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Internal,
    External,
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::Internal => write!(f, "internal"),
            ModuleType::External => write!(f, "external"),
        }
    }
}

/// Compiled JSON schemas keyed by action name
#[derive(Default)]
pub struct ActionValidator {
    schemas: HashMap<String, jsonschema::Validator>,
}

impl ActionValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a schema under an action name
    pub fn register(&mut self, action: &str, schema: &Value) -> AgentResult<()> {
        let validator = jsonschema::validator_for(schema).map_err(|e| {
            AgentError::module_loading(format!("invalid schema for action '{action}': {e}"))
        })?;
        self.schemas.insert(action.to_string(), validator);
        Ok(())
    }

    pub fn has_schema(&self, action: &str) -> bool {
        self.schemas.contains_key(action)
    }

    pub fn validate(&self, action: &str, instance: &Value) -> AgentResult<()> {
        let validator = self.schemas.get(action).ok_or_else(|| {
            AgentError::validation(format!("no schema registered for action '{action}'"))
        })?;

        validator
            .validate(instance)
            .map_err(|e| AgentError::validation(format!("at '{}': {e}", e.instance_path)))
    }
}

impl fmt::Debug for ActionValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionValidator")
            .field("actions", &self.schemas.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A named handler exposing one or more actions
#[async_trait]
pub trait Module: Send + Sync {
    fn name(&self) -> &str;

    fn module_type(&self) -> ModuleType;

    /// Declared actions, in declaration order
    fn actions(&self) -> &[String];

    fn input_validator(&self) -> &ActionValidator;

    fn output_validator(&self) -> &ActionValidator;

    fn has_action(&self, action: &str) -> bool {
        self.actions().iter().any(|a| a == action)
    }

    async fn execute_action(&self, request: &ActionRequest) -> AgentResult<ActionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validator_register_and_validate() {
        let mut validator = ActionValidator::new();
        validator
            .register(
                "string",
                &json!({
                    "type": "object",
                    "required": ["argument"],
                    "properties": {"argument": {"type": "string"}}
                }),
            )
            .unwrap();

        assert!(validator.has_schema("string"));
        assert!(validator
            .validate("string", &json!({"argument": "maradona"}))
            .is_ok());

        let err = validator.validate("string", &json!({})).unwrap_err();
        assert!(matches!(err, AgentError::Validation { .. }));
    }

    #[test]
    fn test_validator_unknown_action() {
        let validator = ActionValidator::new();
        let err = validator.validate("missing", &json!({})).unwrap_err();
        assert!(err.to_string().contains("no schema registered"));
    }

    #[test]
    fn test_validator_rejects_invalid_schema() {
        let mut validator = ActionValidator::new();
        let result = validator.register("bad", &json!({"type": "no-such-type"}));
        assert!(matches!(result, Err(AgentError::ModuleLoading { .. })));
    }

    #[test]
    fn test_module_type_names() {
        assert_eq!(ModuleType::Internal.to_string(), "internal");
        assert_eq!(ModuleType::External.to_string(), "external");
    }
}
