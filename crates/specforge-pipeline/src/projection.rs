//! `build-summary` read model fed from the event bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use specforge_core::bus::{EventBus, EventHandler, Subscription, WILDCARD};
use specforge_core::domain::{DomainEvent, EventPayload};
use specforge_state::{ProjectionKey, ProjectionStore, StorageResult};

pub const BUILD_SUMMARY: &str = "build-summary";

/// Compact per-job view, cheaper to query than the full job record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub job_id: String,
    pub spec_digest: Option<String>,
    pub stage: String,
    pub progress: u8,
    /// Artifact counts by category name.
    pub artifacts: BTreeMap<String, usize>,
    pub deploy_target: Option<String>,
    pub error_code: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BuildSummary {
    fn apply(&mut self, event: &DomainEvent) {
        match &event.payload {
            EventPayload::JobSubmitted {
                job_id,
                spec_digest,
                deploy_target,
            } => {
                self.job_id = job_id.clone();
                self.spec_digest = Some(spec_digest.clone());
                self.deploy_target = deploy_target.clone();
                self.stage = "idle".into();
            }
            EventPayload::StageEntered {
                stage, progress, ..
            } => {
                self.stage = stage.clone();
                self.progress = self.progress.max(*progress);
            }
            EventPayload::ArtifactsGenerated {
                category, count, ..
            } => {
                *self.artifacts.entry(category.to_string()).or_default() += count;
            }
            EventPayload::JobCompleted { .. } => {
                self.stage = "completed".into();
                self.progress = 100;
            }
            EventPayload::JobFailed { code, .. } => {
                self.stage = "failed".into();
                self.error_code = Some(code.clone());
            }
            _ => return,
        }
        self.updated_at = Some(event.timestamp);
    }
}

/// Folds build events into [`BuildSummary`] records.
pub struct JobSummaryProjector {
    store: Arc<dyn ProjectionStore>,
}

impl JobSummaryProjector {
    pub fn new(store: Arc<dyn ProjectionStore>) -> Self {
        Self { store }
    }

    /// Subscribe a projector to every event on `bus`.
    pub fn attach(bus: &EventBus, store: Arc<dyn ProjectionStore>) -> Subscription {
        bus.subscribe(WILDCARD, Arc::new(Self::new(store)))
    }
}

#[async_trait]
impl EventHandler for JobSummaryProjector {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let Some(job_id) = event.payload.job_id() else {
            return Ok(());
        };
        let key = ProjectionKey::new(BUILD_SUMMARY, job_id, event.tenant.clone());
        let mut summary: BuildSummary = match self.store.load(&key).await? {
            Some(state) => serde_json::from_value(state)?,
            None => BuildSummary {
                job_id: job_id.to_string(),
                ..Default::default()
            },
        };
        summary.apply(event);
        self.store.save(&key, serde_json::to_value(&summary)?).await?;
        Ok(())
    }
}

/// Read one job's summary.
pub async fn load_summary(
    store: &dyn ProjectionStore,
    job_id: &str,
    tenant: Option<&str>,
) -> StorageResult<Option<BuildSummary>> {
    let key = ProjectionKey::new(BUILD_SUMMARY, job_id, tenant.map(str::to_string));
    match store.load(&key).await? {
        Some(state) => Ok(Some(serde_json::from_value(state)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_core::domain::ArtifactCategory;
    use specforge_state::MemoryProjectionStore;

    fn event(payload: EventPayload) -> DomainEvent {
        DomainEvent::new("pipeline", payload).with_tenant(Some("acme".into()))
    }

    #[tokio::test]
    async fn folds_job_lifecycle() {
        let store = Arc::new(MemoryProjectionStore::new());
        let bus = EventBus::new(16);
        let _sub = JobSummaryProjector::attach(&bus, store.clone());

        for payload in [
            EventPayload::JobSubmitted {
                job_id: "j1".into(),
                spec_digest: "abc".into(),
                deploy_target: None,
            },
            EventPayload::StageEntered {
                job_id: "j1".into(),
                stage: "generating-schema".into(),
                progress: 20,
            },
            EventPayload::ArtifactsGenerated {
                job_id: "j1".into(),
                category: ArtifactCategory::Schema,
                count: 1,
            },
            EventPayload::JobFailed {
                job_id: "j1".into(),
                stage: "generating-backend".into(),
                code: "GENERATION_ERROR".into(),
                message: "boom".into(),
            },
            EventPayload::TaskCancelled {
                task_id: "t1".into(),
            },
        ] {
            bus.publish(event(payload)).await.unwrap();
        }

        let summary = load_summary(store.as_ref(), "j1", Some("acme"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.stage, "failed");
        assert_eq!(summary.progress, 20);
        assert_eq!(summary.artifacts.get("schema"), Some(&1));
        assert_eq!(summary.error_code.as_deref(), Some("GENERATION_ERROR"));
        assert_eq!(summary.spec_digest.as_deref(), Some("abc"));

        assert!(load_summary(store.as_ref(), "j1", None).await.unwrap().is_none());
        assert_eq!(store.keys(BUILD_SUMMARY, None).await.unwrap().len(), 1);
    }
}
