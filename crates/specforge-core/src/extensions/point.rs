//! Extension points.
//!
//! A point is a named place in the pipeline where extensions can observe or
//! reshape data. The built-in set covers the build lifecycle; extensions may
//! register additional points for their own use.

use serde::{Deserialize, Serialize};

use super::payload::PayloadKind;

pub const PRE_VALIDATION: &str = "pre-validation";
pub const POST_GENERATION: &str = "post-generation";
pub const SECURITY_SCAN: &str = "security-scan";
pub const PRE_DEPLOY: &str = "pre-deploy";
pub const POST_DEPLOY: &str = "post-deploy";

/// Declaration of an extension point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPoint {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Kind accepted by the default handler and produced by `before` hooks.
    pub input: PayloadKind,
    /// Kind produced by the default handler and transformed by `after` hooks.
    pub output: PayloadKind,
}

impl ExtensionPoint {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: PayloadKind,
        output: PayloadKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            input,
            output,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The points every registry starts with.
    pub fn builtin() -> Vec<ExtensionPoint> {
        vec![
            ExtensionPoint::new(
                PRE_VALIDATION,
                "Pre-validation",
                PayloadKind::Blueprint,
                PayloadKind::Blueprint,
            )
            .describe("Rewrite or enrich the blueprint before it is validated."),
            ExtensionPoint::new(
                POST_GENERATION,
                "Post-generation",
                PayloadKind::Artifacts,
                PayloadKind::Artifacts,
            )
            .describe("Inspect generated artifacts; returned new paths are appended."),
            ExtensionPoint::new(
                SECURITY_SCAN,
                "Security scan",
                PayloadKind::Artifacts,
                PayloadKind::ScanReport,
            )
            .describe("Scan generated artifacts; critical findings fail the build."),
            ExtensionPoint::new(
                PRE_DEPLOY,
                "Pre-deploy",
                PayloadKind::Deployment,
                PayloadKind::Deployment,
            )
            .describe("Adjust the deployment plan before it is handed to the deployer."),
            ExtensionPoint::new(
                POST_DEPLOY,
                "Post-deploy",
                PayloadKind::DeploymentReceipt,
                PayloadKind::DeploymentReceipt,
            )
            .describe("Observe or annotate the deployment receipt."),
        ]
    }
}

/// Read-only view of a registered point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPointInfo {
    #[serde(flatten)]
    pub point: ExtensionPoint,
    /// Hooks currently attached (enabled extensions only).
    pub hook_count: usize,
}
