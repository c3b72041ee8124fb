//! Domain-level error taxonomy for SpecForge.

use crate::extensions::HookError;

/// Errors produced while validating a blueprint.
///
/// A validation failure always happens before any generation side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("blueprint declares no entities")]
    NoEntities,

    #[error("no entity declares any fields (entities: {})", entities.join(", "))]
    NoFields { entities: Vec<String> },

    #[error("malformed blueprint: {0}")]
    Malformed(String),
}

/// SpecForge domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("no eligible provider for {task_type} task {task_id}")]
    ProviderUnavailable { task_id: String, task_type: String },

    #[error("{category} generation failed: {message}")]
    Generation { category: String, message: String },

    #[error("deployment to {target} failed: {message}")]
    Deployment { target: String, message: String },

    #[error("security scan reported {critical} critical finding(s)")]
    SecurityScanFailed { critical: usize },

    #[error("{action} timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    #[error("extension error: {0}")]
    Hook(#[from] HookError),

    #[error("storage error: {0}")]
    Storage(#[from] specforge_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ForgeError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ForgeError::Validation(_) => "VALIDATION_ERROR",
            ForgeError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            ForgeError::Generation { .. } => "GENERATION_ERROR",
            ForgeError::Deployment { .. } => "DEPLOYMENT_ERROR",
            ForgeError::SecurityScanFailed { .. } => "SECURITY_SCAN_FAILED",
            ForgeError::Timeout { .. } => "TIMEOUT",
            ForgeError::Hook(HookError::ExtensionPointNotFound { .. }) => {
                "EXTENSION_POINT_NOT_FOUND"
            }
            ForgeError::Hook(_) => "EXTENSION_ERROR",
            ForgeError::Storage(_) => "STORAGE_ERROR",
            ForgeError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Human-facing hint on how to recover.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ForgeError::Validation(ValidationError::NoEntities) => {
                "Declare at least one entity in the blueprint."
            }
            ForgeError::Validation(ValidationError::NoFields { .. }) => {
                "Give at least one entity one or more fields."
            }
            ForgeError::Validation(ValidationError::Malformed(_)) => {
                "Check the blueprint against the expected JSON structure."
            }
            ForgeError::ProviderUnavailable { .. } => {
                "Register a provider with the required capability or raise its concurrency limit."
            }
            ForgeError::Generation { .. } => {
                "Inspect the generator logs; earlier artifacts were kept and the job can be resubmitted."
            }
            ForgeError::Deployment { .. } => {
                "Generated artifacts are intact; fix the deploy target and resubmit."
            }
            ForgeError::SecurityScanFailed { .. } => {
                "Remove embedded secrets from the generated output or the hooks that add them."
            }
            ForgeError::Timeout { .. } => "Raise the configured timeout or check the collaborator.",
            ForgeError::Hook(_) => "Check the enabled extensions for this extension point.",
            ForgeError::Storage(_) => "Check the storage backend and retry.",
            ForgeError::Serialization(_) => "Report this as a bug.",
        }
    }
}

/// Result type for SpecForge domain operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::NoFields {
            entities: vec!["Invoice".into(), "Customer".into()],
        };
        assert!(err.to_string().contains("Invoice, Customer"));
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            ForgeError::from(ValidationError::NoEntities).code(),
            "VALIDATION_ERROR"
        );
        let err = ForgeError::Hook(HookError::ExtensionPointNotFound {
            point_id: "nope".into(),
        });
        assert_eq!(err.code(), "EXTENSION_POINT_NOT_FOUND");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_deployment_error_mentions_target() {
        let err = ForgeError::Deployment {
            target: "staging".into(),
            message: "refused".into(),
        };
        assert!(err.to_string().contains("staging"));
        assert_eq!(err.code(), "DEPLOYMENT_ERROR");
    }
}
