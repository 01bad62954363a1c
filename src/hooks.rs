//! Named extension points for user plugins.
//!
//! The built-in resolution steps are compiled into a fixed sequence inside
//! [`crate::ResolverGeneric`]; this registry carries *user* plugins, invoked
//! at the canonical stage boundaries of that sequence. Handlers run in
//! registration order and the first one to produce a result ends its hook.

use std::{fmt, path::PathBuf, sync::Arc};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{Request, ResolveError};

/// Canonical pipeline stages, in execution order. Sub-hooks between
/// neighboring stages are created on demand with [HookRegistry::ensure_hook].
pub const CANONICAL_HOOKS: &[&str] = &[
    "resolve",
    "parsed-resolve",
    "described-resolve",
    "raw-resolve",
    "normal-resolve",
    "internal",
    "module",
    "resolve-as-module",
    "undescribed-raw-file",
    "raw-file",
    "file",
    "final-file",
    "existing-file",
    "resolved",
];

/// What a plugin did with the request it was handed.
#[derive(Debug, Clone)]
pub enum PluginAction {
    /// Not my request; pass it to the next handler.
    Decline,
    /// Re-enter the pipeline with a rewritten request.
    Rewrite(Request),
    /// Terminal success with this path.
    Finish(PathBuf),
    /// The module is deliberately absent.
    Ignore,
}

/// A user-supplied resolution step.
///
/// `source` names the hook the plugin taps; unknown names create the hook on
/// demand, so plugins can coordinate through custom sub-hooks. Returning an
/// error aborts the entire pipeline.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn source(&self) -> &str;

    /// Hook this plugin forwards to, if any. Purely declarative: rewrites
    /// re-enter the pipeline from the top, but the declaration keeps plugin
    /// graphs inspectable.
    fn target(&self) -> Option<&str> {
        None
    }

    fn run(&self, request: &Request) -> Result<PluginAction, ResolveError>;
}

/// Identifier of a hook inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(usize);

struct Hook {
    name: String,
    taps: Vec<Arc<dyn Plugin>>,
}

#[derive(Default)]
struct RegistryInner {
    hooks: Vec<Hook>,
    index: FxHashMap<String, HookId>,
}

/// Ordered collection of named hooks.
pub struct HookRegistry {
    inner: RwLock<RegistryInner>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        let mut map = f.debug_map();
        for hook in &inner.hooks {
            map.entry(&hook.name, &hook.taps.iter().map(|t| t.name().to_string()).collect::<Vec<_>>());
        }
        map.finish()
    }
}

impl HookRegistry {
    /// A registry pre-seeded with the canonical stages.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self { inner: RwLock::new(RegistryInner::default()) };
        for name in CANONICAL_HOOKS {
            registry.ensure_hook(name);
        }
        registry
    }

    /// Get or create the hook with this name. Idempotent.
    pub fn ensure_hook(&self, name: &str) -> HookId {
        if let Some(id) = self.inner.read().index.get(name) {
            return *id;
        }
        let mut inner = self.inner.write();
        if let Some(id) = inner.index.get(name) {
            return *id;
        }
        let id = HookId(inner.hooks.len());
        inner.hooks.push(Hook { name: name.to_string(), taps: Vec::new() });
        inner.index.insert(name.to_string(), id);
        id
    }

    /// Look up an existing hook.
    ///
    /// # Errors
    ///
    /// * [ResolveError::UnknownHook] when no hook has this name.
    pub fn get_hook(&self, name: &str) -> Result<HookId, ResolveError> {
        self.inner
            .read()
            .index
            .get(name)
            .copied()
            .ok_or_else(|| ResolveError::UnknownHook(name.to_string()))
    }

    /// Append a handler to a hook; handlers run in registration order.
    pub fn tap(&self, hook: HookId, plugin: Arc<dyn Plugin>) {
        self.inner.write().hooks[hook.0].taps.push(plugin);
    }

    /// Attach a plugin to its declared source hook, creating the hook on
    /// demand. The declared target hook (if any) is created too.
    pub fn attach(&self, plugin: Arc<dyn Plugin>) {
        if let Some(target) = plugin.target() {
            self.ensure_hook(target);
        }
        let id = self.ensure_hook(plugin.source());
        self.tap(id, plugin);
    }

    pub(crate) fn has_taps(&self, name: &str) -> bool {
        let inner = self.inner.read();
        inner.index.get(name).is_some_and(|id| !inner.hooks[id.0].taps.is_empty())
    }

    /// Run a hook's handlers in order. The first defined result ends the
    /// hook; `Ok(None)` means every handler declined.
    ///
    /// The resolver drives the canonical stages itself; plugins coordinating
    /// through custom sub-hooks invoke those here.
    pub fn run(
        &self,
        name: &str,
        request: &Request,
    ) -> Result<Option<PluginAction>, ResolveError> {
        let taps: Vec<Arc<dyn Plugin>> = {
            let inner = self.inner.read();
            let Some(id) = inner.index.get(name) else { return Ok(None) };
            if inner.hooks[id.0].taps.is_empty() {
                return Ok(None);
            }
            inner.hooks[id.0].taps.clone()
        };
        for plugin in taps {
            match plugin.run(request)? {
                PluginAction::Decline => {}
                action => {
                    tracing::debug!(plugin = plugin.name(), hook = name, "plugin produced result");
                    return Ok(Some(action));
                }
            }
        }
        Ok(None)
    }
}
