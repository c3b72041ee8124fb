//! Hooks and the extensions that bundle them.
//!
//! A hook's composition type is fixed by its handler shape:
//! `before`, `after` and `replace` hooks are [`Transform`]s
//! (payload in, payload out), `around` hooks are [`Interceptor`]s that
//! receive a [`Next`] and decide whether to call it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::payload::HookPayload;

/// Composition type of a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Before,
    After,
    Around,
    Replace,
}

/// The hook kinds a [`Transform`] can fill. `Around` needs an [`Interceptor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Before,
    After,
    Replace,
}

impl From<TransformKind> for HookKind {
    fn from(kind: TransformKind) -> Self {
        match kind {
            TransformKind::Before => HookKind::Before,
            TransformKind::After => HookKind::After,
            TransformKind::Replace => HookKind::Replace,
        }
    }
}

/// Payload-to-payload hook body.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(&self, input: HookPayload) -> anyhow::Result<HookPayload>;
}

/// Wrapping hook body; may short-circuit by not calling `next`.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, input: HookPayload, next: Next) -> anyhow::Result<HookPayload>;
}

/// Adapts an async closure into a [`Transform`].
pub struct FnTransform<F>(pub F);

#[async_trait]
impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(HookPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HookPayload>> + Send,
{
    async fn apply(&self, input: HookPayload) -> anyhow::Result<HookPayload> {
        (self.0)(input).await
    }
}

/// Adapts an async closure into an [`Interceptor`].
pub struct FnInterceptor<F>(pub F);

#[async_trait]
impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(HookPayload, Next) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<HookPayload>> + Send,
{
    async fn intercept(&self, input: HookPayload, next: Next) -> anyhow::Result<HookPayload> {
        (self.0)(input, next).await
    }
}

pub(crate) type Terminal =
    Box<dyn FnOnce(HookPayload) -> BoxFuture<'static, anyhow::Result<HookPayload>> + Send>;

/// The rest of an `around` chain. The innermost link is the default handler.
///
/// Consumed on use, so a hook can call it at most once.
pub struct Next {
    chain: Arc<Vec<Arc<dyn Interceptor>>>,
    index: usize,
    terminal: Terminal,
}

impl Next {
    pub(crate) fn new(chain: Vec<Arc<dyn Interceptor>>, terminal: Terminal) -> Self {
        Self {
            chain: Arc::new(chain),
            index: 0,
            terminal,
        }
    }

    /// Invoke the next hook in the chain, or the default handler.
    pub async fn run(self, input: HookPayload) -> anyhow::Result<HookPayload> {
        match self.chain.get(self.index).cloned() {
            Some(interceptor) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                interceptor.intercept(input, next).await
            }
            None => (self.terminal)(input).await,
        }
    }
}

#[derive(Clone)]
pub(crate) enum HookAction {
    Transform(Arc<dyn Transform>),
    Around(Arc<dyn Interceptor>),
}

/// A prioritized piece of extension logic. Lower priority runs first.
#[derive(Clone)]
pub struct Hook {
    kind: HookKind,
    priority: i32,
    pub(crate) action: HookAction,
}

impl Hook {
    fn transform(kind: HookKind, priority: i32, t: Arc<dyn Transform>) -> Self {
        Self {
            kind,
            priority,
            action: HookAction::Transform(t),
        }
    }

    pub fn before<F, Fut>(priority: i32, f: F) -> Self
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        Self::transform(HookKind::Before, priority, Arc::new(FnTransform(f)))
    }

    pub fn after<F, Fut>(priority: i32, f: F) -> Self
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        Self::transform(HookKind::After, priority, Arc::new(FnTransform(f)))
    }

    pub fn replace<F, Fut>(priority: i32, f: F) -> Self
    where
        F: Fn(HookPayload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        Self::transform(HookKind::Replace, priority, Arc::new(FnTransform(f)))
    }

    pub fn around<F, Fut>(priority: i32, f: F) -> Self
    where
        F: Fn(HookPayload, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<HookPayload>> + Send + 'static,
    {
        Self {
            kind: HookKind::Around,
            priority,
            action: HookAction::Around(Arc::new(FnInterceptor(f))),
        }
    }

    /// Build a hook from a trait object, for handlers with their own state.
    pub fn with_transform(
        kind: TransformKind,
        priority: i32,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self::transform(kind.into(), priority, transform)
    }

    pub fn with_interceptor(priority: i32, interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            kind: HookKind::Around,
            priority,
            action: HookAction::Around(interceptor),
        }
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Where an extension's hooks apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum ExtensionScope {
    Global,
    Tenant(String),
    Project(String),
}

/// Caller context used to pick scoped hooks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeContext {
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
}

impl ScopeContext {
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            project_id: None,
        }
    }
}

impl ExtensionScope {
    /// Whether hooks in this scope apply to `ctx`. Global always applies.
    pub fn applies_to(&self, ctx: Option<&ScopeContext>) -> bool {
        match self {
            ExtensionScope::Global => true,
            ExtensionScope::Tenant(t) => {
                ctx.and_then(|c| c.tenant_id.as_deref()) == Some(t.as_str())
            }
            ExtensionScope::Project(p) => {
                ctx.and_then(|c| c.project_id.as_deref()) == Some(p.as_str())
            }
        }
    }
}

/// A named bundle of hooks, keyed by extension point id.
#[derive(Debug, Clone)]
pub struct Extension {
    pub id: String,
    pub name: String,
    pub version: String,
    pub scope: ExtensionScope,
    pub enabled: bool,
    pub hooks: BTreeMap<String, Vec<Hook>>,
}

impl Extension {
    /// A new, enabled, globally scoped extension with no hooks.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            scope: ExtensionScope::Global,
            enabled: true,
            hooks: BTreeMap::new(),
        }
    }

    pub fn scoped(mut self, scope: ExtensionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn hook(mut self, point_id: impl Into<String>, hook: Hook) -> Self {
        self.hooks.entry(point_id.into()).or_default().push(hook);
        self
    }

    /// Register in the disabled state.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn point_ids(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }
}

/// Read-only view of a registered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub scope: ExtensionScope,
    pub enabled: bool,
    pub points: Vec<String>,
}

impl From<&Extension> for ExtensionInfo {
    fn from(ext: &Extension) -> Self {
        Self {
            id: ext.id.clone(),
            name: ext.name.clone(),
            version: ext.version.clone(),
            scope: ext.scope.clone(),
            enabled: ext.enabled,
            points: ext.point_ids(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_scope_requires_matching_context() {
        let scope = ExtensionScope::Tenant("acme".into());
        assert!(!scope.applies_to(None));
        assert!(!scope.applies_to(Some(&ScopeContext::tenant("globex"))));
        assert!(scope.applies_to(Some(&ScopeContext::tenant("acme"))));
        assert!(ExtensionScope::Global.applies_to(None));
    }

    #[test]
    fn extension_builder_groups_hooks_by_point() {
        let ext = Extension::new("audit", "Audit", "1.0.0")
            .hook("pre-deploy", Hook::before(1, |p| async move { Ok(p) }))
            .hook("pre-deploy", Hook::after(2, |p| async move { Ok(p) }))
            .hook("post-deploy", Hook::after(1, |p| async move { Ok(p) }));
        assert_eq!(ext.point_ids(), vec!["post-deploy", "pre-deploy"]);
        assert_eq!(ext.hooks["pre-deploy"][1].kind(), HookKind::After);
    }

    struct Stamp;

    #[async_trait]
    impl Transform for Stamp {
        async fn apply(&self, input: HookPayload) -> anyhow::Result<HookPayload> {
            Ok(input)
        }
    }

    #[test]
    fn stateful_transforms_keep_their_kind() {
        for (kind, expected) in [
            (TransformKind::Before, HookKind::Before),
            (TransformKind::After, HookKind::After),
            (TransformKind::Replace, HookKind::Replace),
        ] {
            let hook = Hook::with_transform(kind, 3, Arc::new(Stamp));
            assert_eq!(hook.kind(), expected);
            assert!(matches!(hook.action, HookAction::Transform(_)));
        }
        let around = Hook::with_interceptor(
            1,
            Arc::new(FnInterceptor(|p: HookPayload, next: Next| async move {
                next.run(p).await
            })),
        );
        assert_eq!(around.kind(), HookKind::Around);
        assert!(matches!(around.action, HookAction::Around(_)));
    }
}
