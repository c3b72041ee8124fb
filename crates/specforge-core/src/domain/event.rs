//! Domain events carried by the event bus.
//!
//! Payloads are a tagged union keyed by the event-type string, so a handler
//! matching on `EventPayload` always sees a well-formed body. `Custom`
//! payloads are the escape hatch for extension-defined events; their type
//! must be registered in an [`EventTypeRegistry`] before they can be
//! published.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::artifact::ArtifactCategory;
use crate::scheduler::{TaskPriority, TaskType};

/// Current schema version of every built-in payload.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// Typed event body. The serde tag doubles as the event-type string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "build.job.submitted")]
    JobSubmitted {
        job_id: String,
        spec_digest: String,
        deploy_target: Option<String>,
    },

    #[serde(rename = "build.stage.entered")]
    StageEntered {
        job_id: String,
        stage: String,
        progress: u8,
    },

    #[serde(rename = "build.artifacts.generated")]
    ArtifactsGenerated {
        job_id: String,
        category: ArtifactCategory,
        count: usize,
    },

    #[serde(rename = "build.job.completed")]
    JobCompleted {
        job_id: String,
        artifact_count: usize,
        duration_ms: u64,
    },

    #[serde(rename = "build.job.failed")]
    JobFailed {
        job_id: String,
        stage: String,
        code: String,
        message: String,
    },

    #[serde(rename = "task.queued")]
    TaskQueued {
        task_id: String,
        task_type: TaskType,
        priority: TaskPriority,
    },

    #[serde(rename = "task.started")]
    TaskStarted {
        task_id: String,
        provider_id: String,
        wait_ms: u64,
    },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: String,
        provider_id: String,
        execution_ms: u64,
    },

    #[serde(rename = "task.failed")]
    TaskFailed {
        task_id: String,
        provider_id: Option<String>,
        reason: String,
        retry_count: u32,
    },

    #[serde(rename = "task.cancelled")]
    TaskCancelled { task_id: String },

    #[serde(rename = "scheduler.queue_depth_exceeded")]
    QueueDepthExceeded { depth: usize, threshold: usize },

    #[serde(rename = "extension.registered")]
    ExtensionRegistered {
        extension_id: String,
        points: Vec<String>,
    },

    #[serde(rename = "extension.enabled")]
    ExtensionEnabled { extension_id: String },

    #[serde(rename = "extension.disabled")]
    ExtensionDisabled { extension_id: String },

    /// Extension-defined event; `event_type` must be registered.
    #[serde(rename = "custom")]
    Custom {
        event_type: String,
        data: serde_json::Value,
    },
}

/// Every built-in event type string.
pub const BUILTIN_EVENT_TYPES: &[&str] = &[
    "build.job.submitted",
    "build.stage.entered",
    "build.artifacts.generated",
    "build.job.completed",
    "build.job.failed",
    "task.queued",
    "task.started",
    "task.completed",
    "task.failed",
    "task.cancelled",
    "scheduler.queue_depth_exceeded",
    "extension.registered",
    "extension.enabled",
    "extension.disabled",
];

impl EventPayload {
    /// The event-type string this payload is published under.
    pub fn event_type(&self) -> &str {
        match self {
            EventPayload::JobSubmitted { .. } => "build.job.submitted",
            EventPayload::StageEntered { .. } => "build.stage.entered",
            EventPayload::ArtifactsGenerated { .. } => "build.artifacts.generated",
            EventPayload::JobCompleted { .. } => "build.job.completed",
            EventPayload::JobFailed { .. } => "build.job.failed",
            EventPayload::TaskQueued { .. } => "task.queued",
            EventPayload::TaskStarted { .. } => "task.started",
            EventPayload::TaskCompleted { .. } => "task.completed",
            EventPayload::TaskFailed { .. } => "task.failed",
            EventPayload::TaskCancelled { .. } => "task.cancelled",
            EventPayload::QueueDepthExceeded { .. } => "scheduler.queue_depth_exceeded",
            EventPayload::ExtensionRegistered { .. } => "extension.registered",
            EventPayload::ExtensionEnabled { .. } => "extension.enabled",
            EventPayload::ExtensionDisabled { .. } => "extension.disabled",
            EventPayload::Custom { event_type, .. } => event_type,
        }
    }

    /// Build job this event belongs to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EventPayload::JobSubmitted { job_id, .. }
            | EventPayload::StageEntered { job_id, .. }
            | EventPayload::ArtifactsGenerated { job_id, .. }
            | EventPayload::JobCompleted { job_id, .. }
            | EventPayload::JobFailed { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

/// An immutable, published domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub tenant: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<Uuid>,
    /// Component that produced the event (e.g. "scheduler").
    pub source: String,
    pub payload: EventPayload,
}

impl DomainEvent {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: payload.event_type().to_string(),
            version: EVENT_SCHEMA_VERSION,
            timestamp: Utc::now(),
            tenant: None,
            correlation_id: None,
            causation_id: None,
            source: source.into(),
            payload,
        }
    }

    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Mark this event as caused by `cause`, inheriting its correlation id.
    pub fn caused_by(mut self, cause: &DomainEvent) -> Self {
        self.causation_id = Some(cause.id);
        if self.correlation_id.is_none() {
            self.correlation_id = cause.correlation_id.clone();
        }
        self
    }
}

/// Errors produced by publish-time event validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event type must not be empty")]
    EmptyType,

    #[error("declared type {declared} does not match payload type {payload}")]
    TypeMismatch { declared: String, payload: String },

    #[error("unknown event type: {event_type}")]
    UnknownType { event_type: String },

    #[error("event type {event_type} missing required payload field: {field}")]
    MissingPayloadField { event_type: String, field: String },

    #[error("event type {event_type} version {version} is newer than supported {supported}")]
    UnsupportedVersion {
        event_type: String,
        version: u32,
        supported: u32,
    },
}

#[derive(Debug, Clone)]
struct CustomType {
    version: u32,
    required_fields: Vec<String>,
}

/// Registry of publishable event types.
///
/// Built-in types are always known. Custom types must be registered with the
/// payload fields they require.
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    custom: HashMap<String, CustomType>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or redefine) a custom event type.
    pub fn register_custom(
        &mut self,
        event_type: impl Into<String>,
        version: u32,
        required_fields: &[&str],
    ) {
        self.custom.insert(
            event_type.into(),
            CustomType {
                version,
                required_fields: required_fields.iter().map(|f| f.to_string()).collect(),
            },
        );
    }

    pub fn is_known(&self, event_type: &str) -> bool {
        BUILTIN_EVENT_TYPES.contains(&event_type) || self.custom.contains_key(event_type)
    }

    /// Validate an event before it is published.
    ///
    /// Checks:
    /// 1. the type is non-empty and agrees with the payload tag;
    /// 2. built-in payloads do not claim a newer schema version;
    /// 3. custom payloads use a registered type and carry its required fields.
    pub fn validate(&self, event: &DomainEvent) -> Result<(), EventError> {
        if event.event_type.is_empty() {
            return Err(EventError::EmptyType);
        }
        let payload_type = event.payload.event_type();
        if event.event_type != payload_type {
            return Err(EventError::TypeMismatch {
                declared: event.event_type.clone(),
                payload: payload_type.to_string(),
            });
        }

        match &event.payload {
            EventPayload::Custom { event_type, data } => {
                if BUILTIN_EVENT_TYPES.contains(&event_type.as_str()) {
                    return Err(EventError::TypeMismatch {
                        declared: event_type.clone(),
                        payload: "custom".to_string(),
                    });
                }
                let spec = self
                    .custom
                    .get(event_type)
                    .ok_or_else(|| EventError::UnknownType {
                        event_type: event_type.clone(),
                    })?;
                if event.version > spec.version {
                    return Err(EventError::UnsupportedVersion {
                        event_type: event_type.clone(),
                        version: event.version,
                        supported: spec.version,
                    });
                }
                for field in &spec.required_fields {
                    if data.get(field).is_none() {
                        return Err(EventError::MissingPayloadField {
                            event_type: event_type.clone(),
                            field: field.clone(),
                        });
                    }
                }
                Ok(())
            }
            _ if event.version > EVENT_SCHEMA_VERSION => Err(EventError::UnsupportedVersion {
                event_type: event.event_type.clone(),
                version: event.version,
                supported: EVENT_SCHEMA_VERSION,
            }),
            _ => Ok(()),
        }
    }
}
