//! Deployment port.

use std::collections::BTreeMap;

use async_trait::async_trait;
use specforge_core::domain::ArtifactBag;
use specforge_core::extensions::{DeploymentPlan, DeploymentReceipt};
use tracing::info;

/// Ships a job's artifacts to a target environment.
#[async_trait]
pub trait DeployPort: Send + Sync {
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        artifacts: &ArtifactBag,
    ) -> anyhow::Result<DeploymentReceipt>;
}

/// Deployer that only reports what it would have shipped.
#[derive(Debug, Clone, Default)]
pub struct DryRunDeployer;

#[async_trait]
impl DeployPort for DryRunDeployer {
    async fn deploy(
        &self,
        plan: &DeploymentPlan,
        artifacts: &ArtifactBag,
    ) -> anyhow::Result<DeploymentReceipt> {
        if plan.target.trim().is_empty() {
            anyhow::bail!("deploy target is empty");
        }
        info!(
            job_id = %plan.job_id,
            target = %plan.target,
            artifacts = artifacts.len(),
            "Dry-run deployment"
        );

        let mut metadata = BTreeMap::new();
        metadata.insert("mode".to_string(), "dry-run".to_string());
        metadata.insert("artifacts".to_string(), artifacts.len().to_string());
        Ok(DeploymentReceipt {
            target: plan.target.clone(),
            deployment_id: format!("dry-run-{}", plan.job_id),
            url: Some(format!("https://{}.dry-run.invalid/", plan.target)),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(target: &str) -> DeploymentPlan {
        DeploymentPlan {
            job_id: "job-9".into(),
            target: target.into(),
            artifact_count: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_dry_run_receipt() {
        let receipt = DryRunDeployer
            .deploy(&plan("staging"), &ArtifactBag::new())
            .await
            .unwrap();
        assert_eq!(receipt.target, "staging");
        assert_eq!(receipt.deployment_id, "dry-run-job-9");
        assert_eq!(receipt.metadata["mode"], "dry-run");
    }

    #[tokio::test]
    async fn test_blank_target_rejected() {
        let err = DryRunDeployer
            .deploy(&plan("  "), &ArtifactBag::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
