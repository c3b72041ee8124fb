//! Build pipeline orchestration.
//!
//! Every submitted job gets its own driver task that walks the stage plan,
//! delegating one action per stage to the generator, the extension registry,
//! the scheduler or the deployer. Any stage failure is converted into a
//! [`BuildError`](crate::job::BuildError) on the job; nothing escapes the
//! status API.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{json, Value};
use specforge_core::bus::{panic_message, EventBus};
use specforge_core::config::PipelineConfig;
use specforge_core::domain::{
    Artifact, ArtifactBag, ArtifactCategory, Blueprint, DomainEvent, EventPayload, ForgeError,
    GeneratedFile, Result,
};
use specforge_core::extensions::point::{
    POST_DEPLOY, POST_GENERATION, PRE_DEPLOY, PRE_VALIDATION, SECURITY_SCAN,
};
use specforge_core::extensions::{
    DeploymentPlan, DeploymentReceipt, ExtensionRegistry, HookError, HookPayload, PayloadKind,
    ScanReport, ScopeContext, Severity,
};
use specforge_core::obs;
use specforge_core::scheduler::{TaskRequest, TaskScheduler, TaskStatus, TaskType};
use specforge_state::{MemoryRepository, Repository, StorageError};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::deploy::{DeployPort, DryRunDeployer};
use crate::generator::{BlueprintGenerator, GeneratorPort};
use crate::job::{BuildJob, BuildRequest, JobRecord, LogLevel};
use crate::scan::scan_artifacts;
use crate::stage::BuildStage;

const EVENT_SOURCE: &str = "pipeline";

/// Where documentation lands when a provider does not name a path.
pub const DOCS_PATH: &str = "docs/README.md";

struct PipelineInner {
    bus: EventBus,
    registry: Arc<ExtensionRegistry>,
    generator: Arc<dyn GeneratorPort>,
    deployer: Arc<dyn DeployPort>,
    scheduler: Option<Arc<TaskScheduler>>,
    jobs: Arc<dyn Repository<JobRecord>>,
    config: PipelineConfig,
    finished: Notify,
}

/// Assembles a [`BuildPipeline`] from its collaborators.
pub struct PipelineBuilder {
    bus: EventBus,
    registry: Arc<ExtensionRegistry>,
    generator: Arc<dyn GeneratorPort>,
    deployer: Arc<dyn DeployPort>,
    scheduler: Option<Arc<TaskScheduler>>,
    jobs: Arc<dyn Repository<JobRecord>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    pub fn generator(mut self, generator: Arc<dyn GeneratorPort>) -> Self {
        self.generator = generator;
        self
    }

    pub fn deployer(mut self, deployer: Arc<dyn DeployPort>) -> Self {
        self.deployer = deployer;
        self
    }

    /// Attach a scheduler; enables the AI documentation sub-step.
    pub fn scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn repository(mut self, jobs: Arc<dyn Repository<JobRecord>>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> BuildPipeline {
        BuildPipeline {
            inner: Arc::new(PipelineInner {
                bus: self.bus,
                registry: self.registry,
                generator: self.generator,
                deployer: self.deployer,
                scheduler: self.scheduler,
                jobs: self.jobs,
                config: self.config,
                finished: Notify::new(),
            }),
        }
    }
}

/// Submits build jobs and answers status queries about them.
///
/// Cheap to clone; clones share jobs and collaborators.
#[derive(Clone)]
pub struct BuildPipeline {
    inner: Arc<PipelineInner>,
}

impl BuildPipeline {
    /// Start a builder with the template generator, the dry-run deployer and
    /// an in-memory job repository.
    pub fn builder(bus: EventBus, registry: Arc<ExtensionRegistry>) -> PipelineBuilder {
        PipelineBuilder {
            bus,
            registry,
            generator: Arc::new(BlueprintGenerator),
            deployer: Arc::new(DryRunDeployer),
            scheduler: None,
            jobs: Arc::new(MemoryRepository::new()),
            config: PipelineConfig::default(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.inner.registry
    }

    /// Create a job in `idle` and start driving it in the background.
    ///
    /// Fails only if the blueprint cannot be digested or the initial job
    /// record cannot be stored.
    #[instrument(skip_all, fields(blueprint = %request.blueprint.name))]
    pub async fn submit(&self, request: BuildRequest) -> Result<String> {
        let spec_digest = request.blueprint.digest()?;
        let job_id = Uuid::new_v4().to_string();
        let job = BuildJob::new(job_id.clone(), spec_digest.clone(), &request);
        self.inner
            .jobs
            .put(
                &job_id,
                JobRecord {
                    job: job.clone(),
                    artifacts: ArtifactBag::new(),
                },
            )
            .await?;
        obs::emit_job_started(&job_id, &spec_digest, request.deploy_target.as_deref());

        let driver = JobDriver {
            inner: self.inner.clone(),
            job,
            bag: ArtifactBag::new(),
            scope: ScopeContext {
                tenant_id: request.tenant.clone(),
                project_id: request.project.clone(),
            },
            blueprint: request.blueprint,
        };
        driver
            .publish(EventPayload::JobSubmitted {
                job_id: job_id.clone(),
                spec_digest,
                deploy_target: request.deploy_target,
            })
            .await;
        tokio::spawn(driver.run().instrument(obs::job_span(&job_id)));
        Ok(job_id)
    }

    /// Resolve once the job is completed or failed. `None` for unknown ids.
    pub async fn wait(&self, job_id: &str) -> Option<BuildJob> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.build_state(job_id).await {
                None => return None,
                Some(job) if job.is_terminal() => return Some(job),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Submit and wait for the job to finish.
    pub async fn run(&self, request: BuildRequest) -> Result<BuildJob> {
        let job_id = self.submit(request).await?;
        self.wait(&job_id)
            .await
            .ok_or_else(|| ForgeError::Storage(StorageError::NotFound { key: job_id }))
    }

    /// Current job snapshot.
    pub async fn build_state(&self, job_id: &str) -> Option<BuildJob> {
        self.record(job_id).await.map(|r| r.job)
    }

    /// Artifacts generated so far. Empty for unknown jobs.
    pub async fn artifacts(&self, job_id: &str) -> ArtifactBag {
        self.record(job_id)
            .await
            .map(|r| r.artifacts)
            .unwrap_or_default()
    }

    pub async fn artifact_content(&self, job_id: &str, path: &str) -> Option<String> {
        let record = self.record(job_id).await?;
        record.artifacts.find(path).map(|a| a.content.clone())
    }

    /// All jobs in submission order.
    pub async fn list_jobs(&self) -> Vec<BuildJob> {
        match self.inner.jobs.list().await {
            Ok(records) => records.into_iter().map(|r| r.job).collect(),
            Err(e) => {
                warn!(error = %e, "failed to list jobs");
                Vec::new()
            }
        }
    }

    async fn record(&self, job_id: &str) -> Option<JobRecord> {
        match self.inner.jobs.get(job_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id, error = %e, "failed to load job");
                None
            }
        }
    }
}

/// Owns one job for the duration of its run.
struct JobDriver {
    inner: Arc<PipelineInner>,
    job: BuildJob,
    bag: ArtifactBag,
    blueprint: Blueprint,
    scope: ScopeContext,
}

async fn passthrough(payload: HookPayload) -> anyhow::Result<HookPayload> {
    Ok(payload)
}

async fn default_scanner(payload: HookPayload) -> anyhow::Result<HookPayload> {
    match payload {
        HookPayload::Artifacts(bag) => Ok(HookPayload::ScanReport(scan_artifacts(&bag))),
        other => anyhow::bail!("scanner expects artifacts, got {}", other.kind()),
    }
}

fn mismatch(point_id: &str, expected: PayloadKind, actual: &HookPayload) -> ForgeError {
    ForgeError::Hook(HookError::PayloadMismatch {
        point_id: point_id.to_string(),
        expected,
        actual: actual.kind(),
    })
}

/// Accepts `{"path", "content"}` or a bare markdown string.
fn documentation_file(output: Option<Value>) -> Option<GeneratedFile> {
    let (path, content) = match output? {
        Value::String(content) => (DOCS_PATH.to_string(), content),
        Value::Object(map) => {
            let content = map.get("content")?.as_str()?.to_string();
            let path = map
                .get("path")
                .and_then(Value::as_str)
                .unwrap_or(DOCS_PATH)
                .to_string();
            (path, content)
        }
        _ => return None,
    };
    if content.trim().is_empty() {
        return None;
    }
    Some(GeneratedFile::new(path, content, "markdown"))
}

impl JobDriver {
    async fn run(mut self) {
        let outcome = AssertUnwindSafe(self.drive()).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => Err(ForgeError::Generation {
                category: self.job.stage.name().to_string(),
                message: panic_message(panic.as_ref()),
            }),
        };
        match result {
            Ok(()) => self.complete().await,
            Err(err) => self.fail(err).await,
        }
        self.inner.finished.notify_waiters();
    }

    async fn drive(&mut self) -> Result<()> {
        self.enter(BuildStage::Validating).await;
        self.validate().await?;

        for stage in BuildStage::GENERATION {
            self.enter(stage).await;
            self.generate(stage).await?;
        }
        self.post_generation().await?;
        self.document().await;

        self.enter(BuildStage::RunningTests).await;
        self.generate(BuildStage::RunningTests).await?;
        self.security_scan().await?;

        if let Some(target) = self.job.deploy_target.clone() {
            self.enter(BuildStage::Deploying).await;
            self.deploy(target).await?;
        }
        Ok(())
    }

    fn stage_timeout(&self) -> Option<Duration> {
        self.inner.config.stage_timeout()
    }

    async fn within<T>(&self, action: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.stage_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| ForgeError::Timeout {
                    action: action.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => fut.await,
        }
    }

    async fn hooks<F, Fut>(&self, point_id: &str, input: HookPayload, default: F) -> Result<HookPayload>
    where
        F: FnOnce(HookPayload) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        Ok(self
            .inner
            .registry
            .execute_hooks(point_id, input, default, Some(&self.scope))
            .await?)
    }

    async fn validate(&mut self) -> Result<()> {
        let out = self
            .within(
                PRE_VALIDATION,
                self.hooks(
                    PRE_VALIDATION,
                    HookPayload::Blueprint(self.blueprint.clone()),
                    passthrough,
                ),
            )
            .await?;
        let blueprint = match out {
            HookPayload::Blueprint(bp) => bp,
            other => return Err(mismatch(PRE_VALIDATION, PayloadKind::Blueprint, &other)),
        };
        blueprint.validate()?;

        if blueprint != self.blueprint {
            self.job
                .log(LogLevel::Info, "blueprint rewritten by pre-validation hooks");
        }
        let entities = blueprint.generatable_entities().count();
        self.job.log(
            LogLevel::Info,
            format!("blueprint valid: {entities} generatable entities"),
        );
        self.blueprint = blueprint;
        Ok(())
    }

    async fn generate(&mut self, stage: BuildStage) -> Result<()> {
        let Some(category) = stage.category() else {
            return Ok(());
        };
        let files = self
            .within(stage.name(), async {
                self.inner
                    .generator
                    .generate(category, &self.blueprint)
                    .await
                    .map_err(|e| ForgeError::Generation {
                        category: category.to_string(),
                        message: format!("{e:#}"),
                    })
            })
            .await?;

        let added = self.bag.append(category, files);
        if added == 0 {
            self.job
                .log(LogLevel::Warn, format!("{category} generator produced no files"));
        } else {
            self.job
                .log(LogLevel::Info, format!("generated {added} {category} artifact(s)"));
        }
        self.record_artifacts(category, added).await;
        Ok(())
    }

    async fn post_generation(&mut self) -> Result<()> {
        let out = self
            .within(
                POST_GENERATION,
                self.hooks(
                    POST_GENERATION,
                    HookPayload::Artifacts(self.bag.clone()),
                    passthrough,
                ),
            )
            .await?;
        let returned = match out {
            HookPayload::Artifacts(bag) => bag,
            other => return Err(mismatch(POST_GENERATION, PayloadKind::Artifacts, &other)),
        };

        for category in ArtifactCategory::ALL {
            let added = self
                .bag
                .append_new(category, returned.category(category).to_vec());
            if added > 0 {
                self.job.log(
                    LogLevel::Info,
                    format!("post-generation hooks added {added} {category} artifact(s)"),
                );
                self.record_artifacts(category, added).await;
            }
        }
        Ok(())
    }

    /// Optional AI documentation sub-step. Never fails the job.
    async fn document(&mut self) {
        let Some(scheduler) = self.inner.scheduler.clone() else {
            return;
        };
        if !self.inner.config.ai_documentation {
            return;
        }

        let paths: Vec<&str> = self.bag.iter().map(|(_, a)| a.path.as_str()).collect();
        let input = json!({
            "job_id": self.job.id,
            "blueprint": self.blueprint,
            "artifacts": paths,
        });
        let task_id = scheduler
            .schedule(TaskRequest::new(TaskType::Documentation, input))
            .await;

        let waited = match self.stage_timeout() {
            Some(limit) => tokio::time::timeout(limit, scheduler.wait_for(&task_id))
                .await
                .ok(),
            None => Some(scheduler.wait_for(&task_id).await),
        };
        let outcome = match waited {
            None => {
                // Still queued tasks are withdrawn; running ones finish unobserved.
                if let Err(e) = scheduler.cancel(&task_id).await {
                    debug!(task_id = %task_id, error = %e, "documentation task left running");
                }
                Err("timed out waiting for a provider".to_string())
            }
            Some(Err(e)) => Err(e.to_string()),
            Some(Ok(task)) if task.status == TaskStatus::Completed => {
                documentation_file(task.output)
                    .ok_or_else(|| "provider returned no content".to_string())
            }
            Some(Ok(task)) => Err(task
                .error
                .unwrap_or_else(|| format!("task ended {}", task.status))),
        };

        match outcome {
            Ok(file) => {
                let added = self
                    .bag
                    .append_new(ArtifactCategory::Documentation, vec![Artifact::from(file)]);
                self.job.log(
                    LogLevel::Info,
                    format!("documentation task {task_id} produced {added} artifact(s)"),
                );
                self.record_artifacts(ArtifactCategory::Documentation, added)
                    .await;
            }
            Err(reason) => {
                warn!(job_id = %self.job.id, task_id = %task_id, reason = %reason, "documentation skipped");
                self.job
                    .log(LogLevel::Warn, format!("documentation skipped: {reason}"));
                self.persist().await;
            }
        }
    }

    async fn security_scan(&mut self) -> Result<()> {
        let out = self
            .within(
                SECURITY_SCAN,
                self.hooks(
                    SECURITY_SCAN,
                    HookPayload::Artifacts(self.bag.clone()),
                    default_scanner,
                ),
            )
            .await?;
        let report: ScanReport = match out {
            HookPayload::ScanReport(report) => report,
            other => return Err(mismatch(SECURITY_SCAN, PayloadKind::ScanReport, &other)),
        };

        for finding in &report.findings {
            let level = match finding.severity {
                Severity::Critical => LogLevel::Error,
                Severity::Warning => LogLevel::Warn,
                Severity::Info => LogLevel::Info,
            };
            self.job.log(
                level,
                format!("{} in {}: {}", finding.rule, finding.path, finding.message),
            );
        }
        let critical = report.critical_count();
        if critical > 0 {
            return Err(ForgeError::SecurityScanFailed { critical });
        }
        self.job.log(
            LogLevel::Info,
            format!(
                "security scan passed: {} artifact(s), {} finding(s)",
                report.scanned,
                report.findings.len()
            ),
        );
        self.persist().await;
        Ok(())
    }

    async fn deploy(&mut self, target: String) -> Result<()> {
        let mut metadata = BTreeMap::new();
        metadata.insert("spec_digest".to_string(), self.job.spec_digest.clone());
        if let Some(tenant) = &self.job.tenant {
            metadata.insert("tenant".to_string(), tenant.clone());
        }
        let plan = DeploymentPlan {
            job_id: self.job.id.clone(),
            target,
            artifact_count: self.bag.len(),
            metadata,
        };

        let receipt = self
            .within(BuildStage::Deploying.name(), async {
                let plan = match self
                    .hooks(PRE_DEPLOY, HookPayload::Deployment(plan), passthrough)
                    .await?
                {
                    HookPayload::Deployment(plan) => plan,
                    other => return Err(mismatch(PRE_DEPLOY, PayloadKind::Deployment, &other)),
                };
                let receipt: DeploymentReceipt = self
                    .inner
                    .deployer
                    .deploy(&plan, &self.bag)
                    .await
                    .map_err(|e| ForgeError::Deployment {
                        target: plan.target.clone(),
                        message: format!("{e:#}"),
                    })?;
                match self
                    .hooks(
                        POST_DEPLOY,
                        HookPayload::DeploymentReceipt(receipt),
                        passthrough,
                    )
                    .await?
                {
                    HookPayload::DeploymentReceipt(receipt) => Ok(receipt),
                    other => Err(mismatch(
                        POST_DEPLOY,
                        PayloadKind::DeploymentReceipt,
                        &other,
                    )),
                }
            })
            .await?;

        self.job.log(
            LogLevel::Info,
            format!(
                "deployed to {} as {}",
                receipt.target, receipt.deployment_id
            ),
        );
        self.job.deployment = Some(receipt);
        self.persist().await;
        Ok(())
    }

    async fn enter(&mut self, stage: BuildStage) {
        if !self.job.enter(stage) {
            return;
        }
        obs::emit_stage_entered(&self.job.id, stage.name(), self.job.progress);
        self.persist().await;
        self.publish(EventPayload::StageEntered {
            job_id: self.job.id.clone(),
            stage: stage.name().to_string(),
            progress: self.job.progress,
        })
        .await;
    }

    async fn record_artifacts(&self, category: ArtifactCategory, count: usize) {
        self.persist().await;
        if count > 0 {
            self.publish(EventPayload::ArtifactsGenerated {
                job_id: self.job.id.clone(),
                category,
                count,
            })
            .await;
        }
    }

    // Terminal snapshots are stored after their events so a waiter that
    // observes the terminal stage also observes the final event.
    async fn complete(&mut self) {
        self.job.enter(BuildStage::Completed);
        let duration_ms = self.job.duration_ms();
        info!(
            job_id = %self.job.id,
            artifacts = self.bag.len(),
            duration_ms,
            "build completed"
        );
        self.publish(EventPayload::JobCompleted {
            job_id: self.job.id.clone(),
            artifact_count: self.bag.len(),
            duration_ms,
        })
        .await;
        obs::emit_job_finished(&self.job.id, duration_ms, self.bag.len(), true);
        self.persist().await;
    }

    async fn fail(&mut self, err: ForgeError) {
        let Some(error) = self.job.fail(&err) else {
            return;
        };
        obs::emit_stage_failed(&self.job.id, error.stage.name(), &error.code, &err);
        self.publish(EventPayload::JobFailed {
            job_id: self.job.id.clone(),
            stage: error.stage.name().to_string(),
            code: error.code.clone(),
            message: error.message.clone(),
        })
        .await;
        obs::emit_job_finished(&self.job.id, self.job.duration_ms(), self.bag.len(), false);
        self.persist().await;
    }

    async fn persist(&self) {
        let record = JobRecord {
            job: self.job.clone(),
            artifacts: self.bag.clone(),
        };
        if let Err(e) = self.inner.jobs.put(&self.job.id, record).await {
            warn!(job_id = %self.job.id, error = %e, "failed to persist job snapshot");
        }
    }

    async fn publish(&self, payload: EventPayload) {
        let event = DomainEvent::new(EVENT_SOURCE, payload)
            .with_tenant(self.job.tenant.clone())
            .with_correlation(self.job.id.clone());
        if let Err(e) = self.inner.bus.publish(event).await {
            warn!(job_id = %self.job.id, error = %e, "failed to publish build event");
        }
    }
}
