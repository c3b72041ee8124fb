//! Build job state, logs and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use specforge_core::domain::{ArtifactBag, Blueprint, ForgeError};
use specforge_core::extensions::DeploymentReceipt;

use crate::stage::BuildStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One line of a job's build log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: BuildStage,
    pub message: String,
}

/// A stage failure as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildError {
    /// Stable code, e.g. `VALIDATION_ERROR`.
    pub code: String,
    pub message: String,
    pub suggestion: String,
    /// Stage the job was in when it failed.
    pub stage: BuildStage,
}

impl BuildError {
    pub fn from_forge(stage: BuildStage, err: &ForgeError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            suggestion: err.suggestion().to_string(),
            stage,
        }
    }
}

/// What a caller hands to [`crate::BuildPipeline::submit`].
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub blueprint: Blueprint,
    pub deploy_target: Option<String>,
    pub tenant: Option<String>,
    pub project: Option<String>,
}

impl BuildRequest {
    pub fn new(blueprint: Blueprint) -> Self {
        Self {
            blueprint,
            deploy_target: None,
            tenant: None,
            project: None,
        }
    }

    pub fn deploy_to(mut self, target: impl Into<String>) -> Self {
        self.deploy_target = Some(target.into());
        self
    }

    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }
}

/// Observable state of one build.
///
/// Created at submission in `Idle`, mutated only by its own driver and
/// frozen once `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: String,
    pub spec_digest: String,
    pub blueprint_name: String,
    pub stage: BuildStage,
    /// 0..=100, never decreases.
    pub progress: u8,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<BuildError>,
    pub deploy_target: Option<String>,
    pub tenant: Option<String>,
    pub deployment: Option<DeploymentReceipt>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildJob {
    pub fn new(id: String, spec_digest: String, request: &BuildRequest) -> Self {
        Self {
            id,
            spec_digest,
            blueprint_name: request.blueprint.name.clone(),
            stage: BuildStage::Idle,
            progress: 0,
            logs: Vec::new(),
            errors: Vec::new(),
            deploy_target: request.deploy_target.clone(),
            tenant: request.tenant.clone(),
            deployment: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            stage: self.stage,
            message: message.into(),
        });
    }

    /// Move to `stage`. Returns false (and changes nothing) once terminal.
    pub fn enter(&mut self, stage: BuildStage) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = stage;
        if let Some(checkpoint) = stage.progress() {
            self.progress = self.progress.max(checkpoint);
        }
        if stage.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.log(LogLevel::Info, format!("entered {stage}"));
        true
    }

    /// Record `err` against the current stage and move to `Failed`.
    pub fn fail(&mut self, err: &ForgeError) -> Option<BuildError> {
        if self.stage.is_terminal() {
            return None;
        }
        let error = BuildError::from_forge(self.stage, err);
        self.log(LogLevel::Error, format!("{}: {}", error.code, error.message));
        self.errors.push(error.clone());
        self.enter(BuildStage::Failed);
        Some(error)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn succeeded(&self) -> bool {
        self.stage == BuildStage::Completed
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}

/// What the job repository stores: a job plus its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job: BuildJob,
    pub artifacts: ArtifactBag,
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::domain::{Entity, Field, FieldType, ValidationError};

    fn job() -> BuildJob {
        let bp = Blueprint::new(
            "crm",
            vec![Entity::new("Contact", vec![Field::new("email", FieldType::Email)])],
        );
        BuildJob::new("job-1".into(), "digest".into(), &BuildRequest::new(bp))
    }

    #[test]
    fn test_new_job_is_idle() {
        let job = job();
        assert_eq!(job.stage, BuildStage::Idle);
        assert_eq!(job.progress, 0);
        assert_eq!(job.blueprint_name, "crm");
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_fail_keeps_progress_and_records_stage() {
        let mut job = job();
        job.enter(BuildStage::Validating);
        job.enter(BuildStage::GeneratingSchema);
        let err = job
            .fail(&ForgeError::Generation {
                category: "schema".into(),
                message: "template missing".into(),
            })
            .unwrap();

        assert_eq!(err.stage, BuildStage::GeneratingSchema);
        assert_eq!(err.code, "GENERATION_ERROR");
        assert_eq!(job.stage, BuildStage::Failed);
        assert_eq!(job.progress, 20);
        assert!(job.completed_at.is_some());
        assert_eq!(job.logs.last().unwrap().stage, BuildStage::Failed);
    }

    #[test]
    fn test_terminal_job_is_frozen() {
        let mut job = job();
        job.enter(BuildStage::Validating);
        job.fail(&ForgeError::Validation(ValidationError::NoEntities));
        let frozen = job.clone();

        assert!(!job.enter(BuildStage::Completed));
        assert!(job
            .fail(&ForgeError::Validation(ValidationError::NoEntities))
            .is_none());
        assert_eq!(job, frozen);
    }

    #[test]
    fn test_completed_reaches_full_progress() {
        let mut job = job();
        for stage in BuildStage::plan(false) {
            job.enter(stage);
        }
        assert!(job.succeeded());
        assert_eq!(job.progress, 100);
    }
}
