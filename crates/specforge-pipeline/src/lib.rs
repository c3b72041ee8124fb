//! SpecForge Pipeline - staged builds from a blueprint
//!
//! Provides the build pipeline that:
//! - Validates a blueprint (after `pre-validation` hooks)
//! - Generates schema, backend, frontend, infrastructure and test artifacts
//! - Runs `post-generation`, `security-scan` and deploy hooks
//! - Schedules an optional AI documentation task
//! - Publishes `build.*` events and answers status queries

pub mod deploy;
pub mod export;
pub mod generator;
pub mod job;
pub mod pipeline;
pub mod projection;
pub mod provider;
pub mod scan;
pub mod stage;

// Re-export key types
pub use deploy::{DeployPort, DryRunDeployer};
pub use export::{write_artifacts, ExportError};
pub use generator::{BlueprintGenerator, GeneratorPort};
pub use job::{BuildError, BuildJob, BuildRequest, JobRecord, LogEntry, LogLevel};
pub use pipeline::{BuildPipeline, PipelineBuilder, DOCS_PATH};
pub use projection::{load_summary, BuildSummary, JobSummaryProjector, BUILD_SUMMARY};
pub use provider::TemplateDocsProvider;
pub use scan::scan_artifacts;
pub use stage::BuildStage;
