//! Extension registry.
//!
//! Holds the declared extension points and, per point, the hooks of every
//! enabled extension sorted by ascending priority (stable: equal priorities
//! keep splice order). `execute_hooks` snapshots the applicable hooks under
//! a read lock and runs them without holding it.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::RwLock;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use super::hook::{Extension, ExtensionInfo, ExtensionScope, Hook, HookAction, HookKind, Next};
use super::payload::{HookPayload, PayloadKind};
use super::point::{ExtensionPoint, ExtensionPointInfo};
use super::HookError;
use crate::bus::EventBus;
use crate::domain::event::{DomainEvent, EventPayload};

const EVENT_SOURCE: &str = "extension-registry";

#[derive(Clone)]
struct AttachedHook {
    extension_id: String,
    scope: ExtensionScope,
    hook: Hook,
}

struct PointEntry {
    point: ExtensionPoint,
    hooks: Vec<AttachedHook>,
}

#[derive(Default)]
struct RegistryState {
    points: HashMap<String, PointEntry>,
    /// Point ids in registration order.
    order: Vec<String>,
    extensions: BTreeMap<String, Extension>,
}

impl RegistryState {
    fn splice(&mut self, ext: &Extension) {
        for (point_id, hooks) in &ext.hooks {
            let Some(entry) = self.points.get_mut(point_id) else {
                continue;
            };
            for hook in hooks {
                let pos = entry
                    .hooks
                    .iter()
                    .position(|h| h.hook.priority() > hook.priority())
                    .unwrap_or(entry.hooks.len());
                entry.hooks.insert(
                    pos,
                    AttachedHook {
                        extension_id: ext.id.clone(),
                        scope: ext.scope.clone(),
                        hook: hook.clone(),
                    },
                );
            }
        }
    }

    fn unsplice(&mut self, ext: &Extension) {
        for point_id in ext.hooks.keys() {
            if let Some(entry) = self.points.get_mut(point_id) {
                entry.hooks.retain(|h| h.extension_id != ext.id);
            }
        }
    }
}

/// Registry of extension points and the extensions hooked into them.
pub struct ExtensionRegistry {
    state: RwLock<RegistryState>,
    bus: Option<EventBus>,
}

impl ExtensionRegistry {
    /// Create a registry with the built-in points. Lifecycle events go to
    /// `bus` when one is given.
    pub fn new(bus: Option<EventBus>) -> Self {
        let mut state = RegistryState::default();
        for point in ExtensionPoint::builtin() {
            state.order.push(point.id.clone());
            state.points.insert(
                point.id.clone(),
                PointEntry {
                    point,
                    hooks: Vec::new(),
                },
            );
        }
        Self {
            state: RwLock::new(state),
            bus,
        }
    }

    pub fn register_extension_point(&self, point: ExtensionPoint) -> Result<(), HookError> {
        let mut state = self.state.write().unwrap();
        if state.points.contains_key(&point.id) {
            return Err(HookError::DuplicateExtensionPoint { point_id: point.id });
        }
        debug!(point_id = %point.id, "extension point registered");
        state.order.push(point.id.clone());
        state.points.insert(
            point.id.clone(),
            PointEntry {
                point,
                hooks: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn extension_points(&self) -> Vec<ExtensionPointInfo> {
        let state = self.state.read().unwrap();
        state
            .order
            .iter()
            .filter_map(|id| state.points.get(id))
            .map(|entry| ExtensionPointInfo {
                point: entry.point.clone(),
                hook_count: entry.hooks.len(),
            })
            .collect()
    }

    pub fn extension_point(&self, point_id: &str) -> Option<ExtensionPoint> {
        let state = self.state.read().unwrap();
        state.points.get(point_id).map(|e| e.point.clone())
    }

    /// Register an extension. Every point it references must exist; on
    /// failure nothing is registered.
    pub async fn register_extension(&self, ext: Extension) -> Result<(), HookError> {
        let points = ext.point_ids();
        {
            let mut state = self.state.write().unwrap();
            if let Some(missing) = points.iter().find(|p| !state.points.contains_key(*p)) {
                return Err(HookError::ExtensionPointNotFound {
                    point_id: missing.clone(),
                });
            }
            if state.extensions.contains_key(&ext.id) {
                return Err(HookError::DuplicateExtension {
                    extension_id: ext.id,
                });
            }
            if ext.enabled {
                state.splice(&ext);
            }
            state.extensions.insert(ext.id.clone(), ext.clone());
        }

        info!(
            extension_id = %ext.id,
            version = %ext.version,
            enabled = ext.enabled,
            points = ?points,
            "extension registered"
        );
        self.notify(EventPayload::ExtensionRegistered {
            extension_id: ext.id,
            points,
        })
        .await;
        Ok(())
    }

    /// Attach the extension's hooks. No-op if already enabled.
    pub async fn enable(&self, extension_id: &str) -> Result<(), HookError> {
        let changed = self.set_enabled(extension_id, true)?;
        if changed {
            info!(extension_id, "extension enabled");
            self.notify(EventPayload::ExtensionEnabled {
                extension_id: extension_id.to_string(),
            })
            .await;
        }
        Ok(())
    }

    /// Detach the extension's hooks. No-op if already disabled.
    pub async fn disable(&self, extension_id: &str) -> Result<(), HookError> {
        let changed = self.set_enabled(extension_id, false)?;
        if changed {
            info!(extension_id, "extension disabled");
            self.notify(EventPayload::ExtensionDisabled {
                extension_id: extension_id.to_string(),
            })
            .await;
        }
        Ok(())
    }

    fn set_enabled(&self, extension_id: &str, enabled: bool) -> Result<bool, HookError> {
        let mut state = self.state.write().unwrap();
        let ext = state
            .extensions
            .get(extension_id)
            .cloned()
            .ok_or_else(|| HookError::ExtensionNotFound {
                extension_id: extension_id.to_string(),
            })?;
        if ext.enabled == enabled {
            return Ok(false);
        }
        if enabled {
            state.splice(&ext);
        } else {
            state.unsplice(&ext);
        }
        if let Some(stored) = state.extensions.get_mut(extension_id) {
            stored.enabled = enabled;
        }
        Ok(true)
    }

    /// Disable and forget an extension.
    pub async fn unregister_extension(&self, extension_id: &str) -> Result<(), HookError> {
        self.disable(extension_id).await?;
        self.state.write().unwrap().extensions.remove(extension_id);
        debug!(extension_id, "extension unregistered");
        Ok(())
    }

    pub fn extension(&self, extension_id: &str) -> Option<ExtensionInfo> {
        let state = self.state.read().unwrap();
        state.extensions.get(extension_id).map(ExtensionInfo::from)
    }

    pub fn list(&self) -> Vec<ExtensionInfo> {
        let state = self.state.read().unwrap();
        state.extensions.values().map(ExtensionInfo::from).collect()
    }

    /// Run the hook chain of `point_id` around `default`.
    ///
    /// Order: every `before` hook, then the last `replace` hook if any
    /// (otherwise the `around` chain wrapping `default`, otherwise `default`
    /// alone), then every `after` hook. Tenant and project scoped hooks join
    /// the chain only when `scope` names the matching tenant or project.
    #[instrument(skip_all, fields(point_id = %point_id))]
    pub async fn execute_hooks<F, Fut>(
        &self,
        point_id: &str,
        input: HookPayload,
        default: F,
        scope: Option<&super::ScopeContext>,
    ) -> Result<HookPayload, HookError>
    where
        F: FnOnce(HookPayload) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        let (point, hooks) = {
            let state = self.state.read().unwrap();
            let entry =
                state
                    .points
                    .get(point_id)
                    .ok_or_else(|| HookError::ExtensionPointNotFound {
                        point_id: point_id.to_string(),
                    })?;
            let hooks: Vec<Hook> = entry
                .hooks
                .iter()
                .filter(|h| h.scope.applies_to(scope))
                .map(|h| h.hook.clone())
                .collect();
            (entry.point.clone(), hooks)
        };
        debug!(hooks = hooks.len(), "executing hook chain");

        check_kind(&point, point.input, &input)?;

        let mut value = input;
        for hook in hooks.iter().filter(|h| h.kind() == HookKind::Before) {
            value = run_transform(&point, hook, value).await?;
            check_kind(&point, point.input, &value)?;
        }

        let replacement = hooks.iter().filter(|h| h.kind() == HookKind::Replace).last();
        let arounds: Vec<_> = hooks
            .iter()
            .filter_map(|h| match &h.action {
                HookAction::Around(i) if h.kind() == HookKind::Around => Some(i.clone()),
                _ => None,
            })
            .collect();

        value = if let Some(hook) = replacement {
            run_transform(&point, hook, value).await?
        } else if !arounds.is_empty() {
            let terminal = Box::new(move |p: HookPayload| default(p).boxed());
            Next::new(arounds, terminal)
                .run(value)
                .await
                .map_err(|e| handler_error(&point, "around", e))?
        } else {
            default(value)
                .await
                .map_err(|e| handler_error(&point, "default", e))?
        };
        check_kind(&point, point.output, &value)?;

        for hook in hooks.iter().filter(|h| h.kind() == HookKind::After) {
            value = run_transform(&point, hook, value).await?;
            check_kind(&point, point.output, &value)?;
        }
        Ok(value)
    }

    async fn notify(&self, payload: EventPayload) {
        let Some(bus) = &self.bus else { return };
        if let Err(e) = bus.publish(DomainEvent::new(EVENT_SOURCE, payload)).await {
            warn!(error = %e, "failed to publish extension lifecycle event");
        }
    }
}

async fn run_transform(
    point: &ExtensionPoint,
    hook: &Hook,
    input: HookPayload,
) -> Result<HookPayload, HookError> {
    let phase = match hook.kind() {
        HookKind::Before => "before",
        HookKind::After => "after",
        HookKind::Replace => "replace",
        HookKind::Around => "around",
    };
    match &hook.action {
        HookAction::Transform(t) => t
            .apply(input)
            .await
            .map_err(|e| handler_error(point, phase, e)),
        HookAction::Around(_) => Err(HookError::Handler {
            point_id: point.id.clone(),
            phase: phase.to_string(),
            message: "around handler attached as a transform".to_string(),
        }),
    }
}

fn check_kind(
    point: &ExtensionPoint,
    expected: PayloadKind,
    value: &HookPayload,
) -> Result<(), HookError> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(HookError::PayloadMismatch {
            point_id: point.id.clone(),
            expected,
            actual: value.kind(),
        })
    }
}

fn handler_error(point: &ExtensionPoint, phase: &str, e: anyhow::Error) -> HookError {
    HookError::Handler {
        point_id: point.id.clone(),
        phase: phase.to_string(),
        message: format!("{e:#}"),
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::point::PRE_DEPLOY;
    use crate::extensions::ScopeContext;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn json_point(id: &str) -> ExtensionPoint {
        ExtensionPoint::new(id, id, PayloadKind::Json, PayloadKind::Json)
    }

    fn push(tag: &'static str) -> impl Fn(HookPayload) -> futures::future::Ready<anyhow::Result<HookPayload>> {
        move |p| {
            let HookPayload::Json(mut v) = p else {
                return futures::future::ready(Err(anyhow::anyhow!("not json")));
            };
            v.as_array_mut().unwrap().push(json!(tag));
            futures::future::ready(Ok(HookPayload::Json(v)))
        }
    }

    async fn identity(p: HookPayload) -> anyhow::Result<HookPayload> {
        Ok(p)
    }

    #[tokio::test]
    async fn builtin_points_are_preregistered() {
        let registry = ExtensionRegistry::default();
        let ids: Vec<String> = registry
            .extension_points()
            .into_iter()
            .map(|p| p.point.id)
            .collect();
        assert_eq!(
            ids,
            vec![
                "pre-validation",
                "post-generation",
                "security-scan",
                "pre-deploy",
                "post-deploy"
            ]
        );
        assert!(matches!(
            registry.register_extension_point(json_point(PRE_DEPLOY)),
            Err(HookError::DuplicateExtensionPoint { .. })
        ));
    }

    #[tokio::test]
    async fn equal_priorities_keep_registration_order() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        registry
            .register_extension(Extension::new("x", "X", "1").hook("p", Hook::before(5, push("x"))))
            .await
            .unwrap();
        registry
            .register_extension(Extension::new("y", "Y", "1").hook("p", Hook::before(5, push("y"))))
            .await
            .unwrap();
        registry
            .register_extension(Extension::new("z", "Z", "1").hook("p", Hook::before(1, push("z"))))
            .await
            .unwrap();

        let out = registry
            .execute_hooks("p", HookPayload::Json(json!([])), identity, None)
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!(["z", "x", "y"])));
    }

    #[tokio::test]
    async fn unknown_point_rejects_whole_extension() {
        let registry = ExtensionRegistry::default();
        let ext = Extension::new("bad", "Bad", "1")
            .hook(PRE_DEPLOY, Hook::before(1, identity))
            .hook("no-such-point", Hook::before(1, identity));
        let err = registry.register_extension(ext).await.unwrap_err();
        assert_eq!(
            err,
            HookError::ExtensionPointNotFound {
                point_id: "no-such-point".into()
            }
        );
        assert!(registry.extension("bad").is_none());
        assert_eq!(registry.extension_points()[3].hook_count, 0);
    }

    #[tokio::test]
    async fn disable_detaches_and_enable_reattaches() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        registry
            .register_extension(Extension::new("x", "X", "1").hook("p", Hook::after(1, push("x"))))
            .await
            .unwrap();

        registry.disable("x").await.unwrap();
        let out = registry
            .execute_hooks("p", HookPayload::Json(json!([])), identity, None)
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!([])));

        registry.enable("x").await.unwrap();
        let out = registry
            .execute_hooks("p", HookPayload::Json(json!([])), identity, None)
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!(["x"])));
    }

    #[tokio::test]
    async fn around_chain_can_short_circuit() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        let default_ran = Arc::new(AtomicBool::new(false));
        let flag = default_ran.clone();
        registry
            .register_extension(Extension::new("cache", "Cache", "1").hook(
                "p",
                Hook::around(1, |_p, _next| async move { Ok(HookPayload::Json(json!("cached"))) }),
            ))
            .await
            .unwrap();

        let out = registry
            .execute_hooks(
                "p",
                HookPayload::Json(json!(null)),
                move |p| async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(p)
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!("cached")));
        assert!(!default_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn around_hooks_nest_in_priority_order() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        let wrap = |tag: &'static str| {
            Hook::around(0, move |p, next: Next| async move {
                let HookPayload::Json(v) = next.run(p).await? else {
                    anyhow::bail!("not json");
                };
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(tag.to_string(), v);
                Ok(HookPayload::Json(serde_json::Value::Object(wrapped)))
            })
        };
        registry
            .register_extension(
                Extension::new("w", "W", "1")
                    .hook("p", wrap("outer"))
                    .hook("p", wrap("inner")),
            )
            .await
            .unwrap();

        let out = registry
            .execute_hooks("p", HookPayload::Json(json!(1)), identity, None)
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!({ "outer": { "inner": 1 } })));
    }

    #[tokio::test]
    async fn wrong_payload_kind_is_reported() {
        let registry = ExtensionRegistry::default();
        let err = registry
            .execute_hooks(PRE_DEPLOY, HookPayload::Json(json!({})), identity, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::PayloadMismatch { .. }));
    }

    #[tokio::test]
    async fn tenant_hooks_apply_only_to_their_tenant() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        registry
            .register_extension(
                Extension::new("acme-only", "Acme", "1")
                    .scoped(ExtensionScope::Tenant("acme".into()))
                    .hook("p", Hook::before(1, push("acme"))),
            )
            .await
            .unwrap();

        let acme = ScopeContext::tenant("acme");
        let out = registry
            .execute_hooks("p", HookPayload::Json(json!([])), identity, Some(&acme))
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!(["acme"])));

        let out = registry
            .execute_hooks("p", HookPayload::Json(json!([])), identity, None)
            .await
            .unwrap();
        assert_eq!(out, HookPayload::Json(json!([])));
    }

    #[tokio::test]
    async fn handler_error_names_phase() {
        let registry = ExtensionRegistry::default();
        registry.register_extension_point(json_point("p")).unwrap();
        let err = registry
            .execute_hooks(
                "p",
                HookPayload::Json(json!(null)),
                |_| async { Err(anyhow::anyhow!("boom")) },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HookError::Handler {
                point_id: "p".into(),
                phase: "default".into(),
                message: "boom".into(),
            }
        );
    }
}
