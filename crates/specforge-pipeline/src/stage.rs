//! Build stage definitions.

use serde::{Deserialize, Serialize};
use specforge_core::domain::ArtifactCategory;

/// Stages a build job moves through.
///
/// Order is fixed: `Idle → Validating → GeneratingSchema → GeneratingBackend →
/// GeneratingFrontend → GeneratingInfra → RunningTests → [Deploying] →
/// Completed`. `Failed` is reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStage {
    Idle,
    Validating,
    GeneratingSchema,
    GeneratingBackend,
    GeneratingFrontend,
    GeneratingInfra,
    RunningTests,
    Deploying,
    Completed,
    Failed,
}

impl BuildStage {
    /// Stages that call the generator, in execution order.
    pub const GENERATION: [BuildStage; 4] = [
        BuildStage::GeneratingSchema,
        BuildStage::GeneratingBackend,
        BuildStage::GeneratingFrontend,
        BuildStage::GeneratingInfra,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuildStage::Idle => "idle",
            BuildStage::Validating => "validating",
            BuildStage::GeneratingSchema => "generating-schema",
            BuildStage::GeneratingBackend => "generating-backend",
            BuildStage::GeneratingFrontend => "generating-frontend",
            BuildStage::GeneratingInfra => "generating-infra",
            BuildStage::RunningTests => "running-tests",
            BuildStage::Deploying => "deploying",
            BuildStage::Completed => "completed",
            BuildStage::Failed => "failed",
        }
    }

    /// Progress checkpoint reported on entering this stage.
    ///
    /// `Failed` has no checkpoint of its own; a failed job keeps the progress
    /// of the stage it failed in.
    pub fn progress(&self) -> Option<u8> {
        match self {
            BuildStage::Idle => Some(0),
            BuildStage::Validating => Some(5),
            BuildStage::GeneratingSchema => Some(20),
            BuildStage::GeneratingBackend => Some(40),
            BuildStage::GeneratingFrontend => Some(60),
            BuildStage::GeneratingInfra => Some(75),
            BuildStage::RunningTests => Some(85),
            BuildStage::Deploying => Some(95),
            BuildStage::Completed => Some(100),
            BuildStage::Failed => None,
        }
    }

    /// Artifact category a generation stage produces.
    pub fn category(&self) -> Option<ArtifactCategory> {
        match self {
            BuildStage::GeneratingSchema => Some(ArtifactCategory::Schema),
            BuildStage::GeneratingBackend => Some(ArtifactCategory::Backend),
            BuildStage::GeneratingFrontend => Some(ArtifactCategory::Frontend),
            BuildStage::GeneratingInfra => Some(ArtifactCategory::Infrastructure),
            BuildStage::RunningTests => Some(ArtifactCategory::Tests),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BuildStage::Completed | BuildStage::Failed)
    }

    /// Stages a job will pass through, in order, excluding `Idle`.
    pub fn plan(deploy: bool) -> Vec<BuildStage> {
        let mut stages = vec![BuildStage::Validating];
        stages.extend(Self::GENERATION);
        stages.push(BuildStage::RunningTests);
        if deploy {
            stages.push(BuildStage::Deploying);
        }
        stages.push(BuildStage::Completed);
        stages
    }
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
