//! Structured observability for build jobs and scheduled tasks.
//!
//! This module provides:
//! - Job-scoped tracing spans via the `JobSpan` RAII guard
//! - Emission functions for lifecycle events: job start, stage entry, job
//!   finish, task dispatch and task finish
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::info;

/// RAII guard that enters a job-scoped span for as long as it lives.
///
/// # Example
///
/// ```ignore
/// let _span = JobSpan::enter("job-12345");
/// // tracing calls on this thread now carry job_id = "job-12345"
/// ```
pub struct JobSpan {
    _span: tracing::span::EnteredSpan,
}

impl JobSpan {
    pub fn enter(job_id: &str) -> Self {
        let span = tracing::info_span!("specforge.job", job_id = %job_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Build a job span for instrumenting async work with `.instrument(..)`.
pub fn job_span(job_id: &str) -> tracing::Span {
    tracing::info_span!("specforge.job", job_id = %job_id)
}

/// Emit event: job submitted.
pub fn emit_job_started(job_id: &str, spec_digest: &str, deploy_target: Option<&str>) {
    info!(
        event = "job.started",
        job_id = %job_id,
        spec_digest = %spec_digest,
        deploy_target = deploy_target.unwrap_or("-"),
    );
}

pub fn emit_stage_entered(job_id: &str, stage: &str, progress: u8) {
    info!(event = "job.stage_entered", job_id = %job_id, stage = %stage, progress = progress);
}

/// Emit event: job reached a terminal stage.
pub fn emit_job_finished(job_id: &str, duration_ms: u64, artifact_count: usize, success: bool) {
    info!(
        event = "job.finished",
        job_id = %job_id,
        duration_ms = duration_ms,
        artifact_count = artifact_count,
        success = success,
    );
}

pub fn emit_task_dispatched(task_id: &str, provider_id: &str, wait_ms: u64) {
    info!(
        event = "task.dispatched",
        task_id = %task_id,
        provider_id = %provider_id,
        wait_ms = wait_ms,
    );
}

pub fn emit_task_finished(task_id: &str, provider_id: &str, success: bool, execution_ms: u64) {
    info!(
        event = "task.finished",
        task_id = %task_id,
        provider_id = %provider_id,
        success = success,
        execution_ms = execution_ms,
    );
}

/// Emit event: stage failure converted into a job error (warning level).
pub fn emit_stage_failed(job_id: &str, stage: &str, code: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(
        event = "job.stage_failed",
        job_id = %job_id,
        stage = %stage,
        code = %code,
        error = %error,
    );
}
