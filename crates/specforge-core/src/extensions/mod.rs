//! Extension registry: typed hook points the pipeline consults.

pub mod hook;
pub mod payload;
pub mod point;
pub mod registry;

pub use hook::{
    Extension, ExtensionInfo, ExtensionScope, FnInterceptor, FnTransform, Hook, HookKind,
    Interceptor, Next, ScopeContext, Transform, TransformKind,
};
pub use payload::{
    DeploymentPlan, DeploymentReceipt, Finding, HookPayload, PayloadKind, ScanReport, Severity,
};
pub use point::{ExtensionPoint, ExtensionPointInfo};
pub use registry::ExtensionRegistry;

/// Errors raised by the extension registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    #[error("extension point not found: {point_id}")]
    ExtensionPointNotFound { point_id: String },

    #[error("extension point already registered: {point_id}")]
    DuplicateExtensionPoint { point_id: String },

    #[error("extension already registered: {extension_id}")]
    DuplicateExtension { extension_id: String },

    #[error("extension not found: {extension_id}")]
    ExtensionNotFound { extension_id: String },

    #[error("payload mismatch at {point_id}: expected {expected}, got {actual}")]
    PayloadMismatch {
        point_id: String,
        expected: PayloadKind,
        actual: PayloadKind,
    },

    /// A hook or the default handler returned an error.
    #[error("{phase} handler failed at {point_id}: {message}")]
    Handler {
        point_id: String,
        phase: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_point() {
        let err = HookError::ExtensionPointNotFound {
            point_id: "pre-lint".into(),
        };
        assert_eq!(err.to_string(), "extension point not found: pre-lint");

        let err = HookError::PayloadMismatch {
            point_id: "security-scan".into(),
            expected: PayloadKind::ScanReport,
            actual: PayloadKind::Artifacts,
        };
        assert_eq!(
            err.to_string(),
            "payload mismatch at security-scan: expected scan_report, got artifacts"
        );
    }
}
