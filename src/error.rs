//! Error types for the request processor core.
//!
//! Each variant corresponds to one design-level failure kind and determines
//! how the failure is routed: format errors become transport-level (PCP)
//! errors, everything else request-scoped becomes an application-level (PXP)
//! error addressed to the sender and transaction.

use thiserror::Error;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed envelope or binary data chunk; the transaction cannot be
    /// identified, so this is reported on the transport error channel.
    #[error("invalid request format: {message}")]
    RequestFormat { message: String },

    /// Action-level refusal inside a module (e.g. ping without a debug chunk)
    #[error("{message}")]
    RequestProcessing { message: String },

    /// Invalid external-module metadata; the module is skipped at startup
    #[error("failed to load module: {message}")]
    ModuleLoading { message: String },

    /// Subprocess failure, output schema violation, or timeout
    #[error("{message}")]
    ModuleProcessing { message: String },

    /// Filesystem failure creating a results directory or writing metadata
    #[error("storage failure: {message}")]
    Storage { message: String },

    /// Internal invariant violation in the results mutex table
    #[error("results mutex table: {message}")]
    MutexTable { message: String },

    /// Transport send failure, reported by the connector
    #[error("connector failure: {message}")]
    Connector { message: String },

    /// Unknown module or unknown action for a known module
    #[error("{message}")]
    RegistryMiss { message: String },

    /// Request params failed the action's input schema
    #[error("{message}")]
    Validation { message: String },

    /// Task container is at capacity
    #[error("task container at capacity: {message}")]
    Capacity { message: String },

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AgentError {
    pub fn request_format<S: Into<String>>(message: S) -> Self {
        Self::RequestFormat {
            message: message.into(),
        }
    }

    pub fn request_processing<S: Into<String>>(message: S) -> Self {
        Self::RequestProcessing {
            message: message.into(),
        }
    }

    pub fn module_loading<S: Into<String>>(message: S) -> Self {
        Self::ModuleLoading {
            message: message.into(),
        }
    }

    pub fn module_processing<S: Into<String>>(message: S) -> Self {
        Self::ModuleProcessing {
            message: message.into(),
        }
    }

    pub fn storage<S: Into<String>>(message: S) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn mutex_table<S: Into<String>>(message: S) -> Self {
        Self::MutexTable {
            message: message.into(),
        }
    }

    pub fn connector<S: Into<String>>(message: S) -> Self {
        Self::Connector {
            message: message.into(),
        }
    }

    pub fn registry_miss<S: Into<String>>(message: S) -> Self {
        Self::RegistryMiss {
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn capacity<S: Into<String>>(message: S) -> Self {
        Self::Capacity {
            message: message.into(),
        }
    }
}

/// Sanitize error descriptions before they leave the agent. Module stderr can
/// contain credentials passed through the environment or on command lines.
pub fn sanitize_error_description(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    // Truncate very long descriptions - ensure total length is <= 500
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        let mut end = max_content_len;
        while end > 0 && !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..end], truncate_suffix);
    }

    sanitized
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_format_constructor() {
        let error = AgentError::request_format("no data chunk");
        assert!(matches!(error, AgentError::RequestFormat { .. }));
        assert_eq!(error.to_string(), "invalid request format: no data chunk");
    }

    #[test]
    fn test_registry_miss_constructor() {
        let error = AgentError::registry_miss("unknown module: nope");
        assert!(matches!(error, AgentError::RegistryMiss { .. }));
        assert_eq!(error.to_string(), "unknown module: nope");
    }

    #[test]
    fn test_module_processing_message_is_bare() {
        // PXP error descriptions carry the module's own message untouched
        let error = AgentError::module_processing("timeout");
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_storage_constructor() {
        let error = AgentError::storage("failed to create results directory");
        assert_eq!(
            error.to_string(),
            "storage failure: failed to create results directory"
        );
    }

    #[test]
    fn test_sanitize_secrets() {
        let message = "exec failed: password=hunter2 api_token=abc123";
        let sanitized = sanitize_error_description(message);

        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc123"));
        assert!(sanitized.contains("password=***"));
    }

    #[test]
    fn test_sanitize_case_insensitive() {
        let sanitized = sanitize_error_description("PASSWORD=topsecret Token: xyz");
        assert!(!sanitized.contains("topsecret"));
        assert!(!sanitized.contains("xyz"));
    }

    #[test]
    fn test_long_description_truncation() {
        let long_message = "x".repeat(600);
        let sanitized = sanitize_error_description(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_description(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_sanitize_empty_message() {
        assert_eq!(sanitize_error_description(""), "");
    }
}
