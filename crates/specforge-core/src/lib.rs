//! SpecForge Core Library
//!
//! Domain model plus the three shared services a build runs on: the event
//! bus, the extension registry and the task scheduler.

pub mod bus;
pub mod config;
pub mod domain;
pub mod extensions;
pub mod obs;
pub mod scheduler;
pub mod telemetry;

pub use bus::{BusStats, EventBus, EventHandler, FnHandler, Subscription, WILDCARD};
pub use config::{BusConfig, ConfigError, ForgeConfig, PipelineConfig, SchedulerConfig};
pub use domain::{
    Artifact, ArtifactBag, ArtifactCategory, Blueprint, DomainEvent, Entity, EventError,
    EventPayload, EventTypeRegistry, Field, FieldType, ForgeError, GeneratedFile, Result,
    ValidationError,
};
pub use extensions::{
    Extension, ExtensionPoint, ExtensionRegistry, ExtensionScope, Hook, HookError, HookKind,
    HookPayload, PayloadKind, ScopeContext,
};
pub use obs::{
    emit_job_finished, emit_job_started, emit_stage_entered, emit_stage_failed, job_span, JobSpan,
};
pub use scheduler::{
    AiProvider, ProviderConfig, SchedulerError, Task, TaskPriority, TaskRequest, TaskScheduler,
    TaskStatus, TaskType,
};
pub use telemetry::init_tracing;

/// SpecForge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
