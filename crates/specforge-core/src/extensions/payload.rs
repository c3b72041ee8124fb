//! Typed hook input/output.
//!
//! Each extension point declares the [`PayloadKind`] it accepts and the one
//! it produces. The registry checks every intermediate value against those
//! declarations, so a hook returning the wrong variant fails loudly instead
//! of corrupting the pipeline.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactBag, Blueprint};

/// Discriminant of a [`HookPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    Blueprint,
    Artifacts,
    ScanReport,
    Deployment,
    DeploymentReceipt,
    Json,
}

impl std::fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PayloadKind::Blueprint => "blueprint",
            PayloadKind::Artifacts => "artifacts",
            PayloadKind::ScanReport => "scan_report",
            PayloadKind::Deployment => "deployment",
            PayloadKind::DeploymentReceipt => "deployment_receipt",
            PayloadKind::Json => "json",
        };
        f.write_str(s)
    }
}

/// Value flowing through a hook chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HookPayload {
    Blueprint(Blueprint),
    Artifacts(ArtifactBag),
    ScanReport(ScanReport),
    Deployment(DeploymentPlan),
    DeploymentReceipt(DeploymentReceipt),
    /// Untyped payload for extension-defined points.
    Json(serde_json::Value),
}

impl HookPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            HookPayload::Blueprint(_) => PayloadKind::Blueprint,
            HookPayload::Artifacts(_) => PayloadKind::Artifacts,
            HookPayload::ScanReport(_) => PayloadKind::ScanReport,
            HookPayload::Deployment(_) => PayloadKind::Deployment,
            HookPayload::DeploymentReceipt(_) => PayloadKind::DeploymentReceipt,
            HookPayload::Json(_) => PayloadKind::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One issue reported by a security scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub path: String,
    pub rule: String,
    pub severity: Severity,
    pub message: String,
}

/// Output of the `security-scan` extension point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scanned: usize,
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn critical_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Critical)
            .count()
    }
}

/// What is about to be deployed; input of `pre-deploy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub job_id: String,
    pub target: String,
    pub artifact_count: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Result of a deployment; input of `post-deploy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    pub target: String,
    pub deployment_id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}
