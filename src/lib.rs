//! # Wayfinder
//!
//! Node.js-compatible module resolution for build tools.
//!
//! Given a starting directory and a request string (`"./a"`, `"pkg/sub"`,
//! `"/abs"`), the resolver determines the absolute filesystem path of the
//! target file or directory, following a configurable superset of the
//! Node.js resolution algorithm: aliases, extensions, main fields,
//! conditional `exports`/`imports`, self-references, roots and symlink
//! canonicalization.
//!
//! The built-in resolution steps are compiled into a fixed pipeline; user
//! plugins attach to named hooks at the stage boundaries (see
//! [CANONICAL_HOOKS]). Filesystem probes go through a TTL-bounded cache
//! ([CachedFs]) shared by concurrent calls.
//!
//! ## References:
//!
//! * [CommonJS Module Resolution Algorithm](https://nodejs.org/api/modules.html#all-together)
//! * [ECMAScript Module Resolution Algorithm](https://nodejs.org/api/esm.html#resolution-algorithm-specification)
//!
//! ## Example
//!
//! ```rust,ignore
//! use wayfinder::{ResolveOptions, Resolver};
//!
//! let resolver = Resolver::new(ResolveOptions::default());
//! match resolver.resolve("/path/to/project", "./lib/util") {
//!     Ok(resolution) => println!("{}", resolution.path().display()),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

mod builtins;
mod cache;
mod cached_fs;
mod context;
mod error;
mod file_system;
mod hooks;
mod imports_exports;
mod options;
mod package_json;
mod path;
mod request;
mod resolution;

#[cfg(test)]
mod tests;

use std::{
    borrow::Cow,
    fmt,
    hash::BuildHasherDefault,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use rustc_hash::FxHasher;

pub use crate::{
    builtins::NODEJS_BUILTINS,
    cached_fs::CachedFs,
    context::{Attempt, ResolveContext},
    error::{IOError, JSONError, ResolveError, SpecifierError},
    file_system::{FileMetadata, FileSystem, FileSystemOs},
    hooks::{HookId, HookRegistry, Plugin, PluginAction, CANONICAL_HOOKS},
    options::{Alias, AliasValue, CachePredicate, EnforceExtension, ResolveOptions, Restriction},
    package_json::{ImportsExportsEntry, ImportsExportsMap, PackageJson},
    request::{Request, RequestContext, Specifier},
    resolution::Resolution,
};
use crate::{
    builtins::is_builtin_module,
    cache::{Cache, CachedPath},
    context::Ctx,
    path::{PathExt, SLASH_START},
};

pub(crate) type ResolveResult = Result<Option<CachedPath>, ResolveError>;

type ResultCacheKey = (PathBuf, String, Option<String>);

/// Resolver over the operating system's filesystem.
pub type Resolver = ResolverGeneric<FileSystemOs>;

/// Generic resolver, configurable through the [FileSystem] trait.
///
/// Construction is cheap; one resolver may serve concurrent calls. Resolvers
/// cloned with [ResolverGeneric::clone_with_options] share the underlying
/// caches.
pub struct ResolverGeneric<Fs> {
    pub(crate) options: ResolveOptions,
    pub(crate) cache: Arc<Cache<Fs>>,
    registry: HookRegistry,
    result_cache: DashMap<ResultCacheKey, Result<Resolution, ResolveError>, BuildHasherDefault<FxHasher>>,
}

impl<Fs> fmt::Debug for ResolverGeneric<Fs> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.options.fmt(f)
    }
}

impl<Fs: FileSystem + Default> Default for ResolverGeneric<Fs> {
    fn default() -> Self {
        Self::new(ResolveOptions::default())
    }
}

impl<Fs: FileSystem + Default> ResolverGeneric<Fs> {
    #[must_use]
    pub fn new(options: ResolveOptions) -> Self {
        Self::new_with_file_system(Fs::default(), options)
    }
}

impl<Fs: FileSystem> ResolverGeneric<Fs> {
    #[must_use]
    pub fn new_with_file_system(file_system: Fs, options: ResolveOptions) -> Self {
        let options = options.sanitize();
        let registry = HookRegistry::new();
        for plugin in &options.plugins {
            registry.attach(Arc::clone(plugin));
        }
        let cache = Arc::new(Cache::new(file_system, options.fs_cache_ttl));
        Self { options, cache, registry, result_cache: DashMap::default() }
    }

    /// Clone the resolver with different options, sharing the underlying
    /// caches.
    #[must_use]
    pub fn clone_with_options(&self, options: ResolveOptions) -> Self {
        let options = options.sanitize();
        let registry = HookRegistry::new();
        for plugin in &options.plugins {
            registry.attach(Arc::clone(plugin));
        }
        Self {
            options,
            cache: Arc::clone(&self.cache),
            registry,
            result_cache: DashMap::default(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// The hook registry carrying this resolver's user plugins.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.registry
    }

    /// The TTL-bounded probe cache, for explicit [CachedFs::purge] /
    /// [CachedFs::purge_paths] invalidation.
    #[must_use]
    pub fn file_system(&self) -> &CachedFs<Fs> {
        &self.cache.fs
    }

    /// Drop all memoized state: interned paths, descriptors, probe results
    /// and whole-result cache entries.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.result_cache.clear();
    }

    /// Resolve `specifier` at an absolute directory `path`.
    ///
    /// A specifier is the string passed to `require` or `import`.
    ///
    /// # Errors
    ///
    /// * See [ResolveError]
    pub fn resolve<P: AsRef<Path>>(
        &self,
        path: P,
        specifier: &str,
    ) -> Result<Resolution, ResolveError> {
        let mut ctx = Ctx::default();
        self.resolve_tracing(&RequestContext::default(), path.as_ref(), specifier, &mut ctx)
    }

    /// Resolve `specifier` at `path`, collecting dependency sets and the
    /// attempt log into `resolve_context`.
    ///
    /// # Errors
    ///
    /// * See [ResolveError]
    pub fn resolve_with_context<P: AsRef<Path>>(
        &self,
        path: P,
        specifier: &str,
        resolve_context: &mut ResolveContext,
    ) -> Result<Resolution, ResolveError> {
        let mut ctx = Ctx::default();
        ctx.init_dependencies();
        ctx.init_trace();
        let result =
            self.resolve_tracing(&RequestContext::default(), path.as_ref(), specifier, &mut ctx);
        if let Some(deps) = &mut ctx.file_dependencies {
            resolve_context.file_dependencies.extend(deps.drain(..));
        }
        if let Some(deps) = &mut ctx.context_dependencies {
            resolve_context.context_dependencies.extend(deps.drain(..));
        }
        if let Some(deps) = &mut ctx.missing_dependencies {
            resolve_context.missing_dependencies.extend(deps.drain(..));
        }
        resolve_context.trace.extend(ctx.take_attempts());
        result
    }

    /// Resolve with an opaque caller context (e.g. the issuer path), carried
    /// on the [Request] record and part of the result cache key when
    /// [ResolveOptions::cache_with_context] is set.
    ///
    /// # Errors
    ///
    /// * See [ResolveError]
    pub fn resolve_with_request_context<P: AsRef<Path>>(
        &self,
        request_context: &RequestContext,
        path: P,
        specifier: &str,
    ) -> Result<Resolution, ResolveError> {
        let mut ctx = Ctx::default();
        self.resolve_tracing(request_context, path.as_ref(), specifier, &mut ctx)
    }

    fn resolve_tracing(
        &self,
        request_context: &RequestContext,
        path: &Path,
        specifier: &str,
        ctx: &mut Ctx,
    ) -> Result<Resolution, ResolveError> {
        let span = tracing::debug_span!("resolve", path = ?path, specifier = specifier);
        let _enter = span.enter();
        tracing::trace!(options = ?self.options, "resolve_options");
        let result = self.resolve_impl(request_context, path, specifier, ctx);
        match &result {
            Ok(resolution) => {
                tracing::debug!(path = ?path, specifier = specifier, ret = ?resolution.path);
            }
            Err(err) => tracing::debug!(path = ?path, specifier = specifier, err = ?err),
        }
        result
    }

    fn resolve_impl(
        &self,
        request_context: &RequestContext,
        path: &Path,
        specifier: &str,
        ctx: &mut Ctx,
    ) -> Result<Resolution, ResolveError> {
        if !self.options.unsafe_cache {
            return self.resolve_uncached(request_context, path, specifier, ctx);
        }
        let key = (
            path.to_path_buf(),
            specifier.to_string(),
            self.options.cache_with_context.then(|| request_context.cache_key()),
        );
        if let Some(cached) = self.result_cache.get(&key) {
            tracing::trace!(path = ?path, specifier = specifier, "result cache hit");
            return cached.clone();
        }
        let result = self.resolve_uncached(request_context, path, specifier, ctx);
        let admit = match &result {
            Ok(resolution) => {
                self.options.cache_predicate.as_ref().map_or(true, |predicate| predicate(resolution))
            }
            Err(_) => false,
        };
        if admit {
            self.result_cache.insert(key, result.clone());
        }
        result
    }

    fn resolve_uncached(
        &self,
        request_context: &RequestContext,
        path: &Path,
        specifier: &str,
        ctx: &mut Ctx,
    ) -> Result<Resolution, ResolveError> {
        ctx.with_fully_specified(self.options.fully_specified);
        let parsed = Specifier::parse(specifier).map_err(ResolveError::Specifier)?;
        ctx.with_query_fragment(parsed.query, parsed.fragment);
        let mut request = Request::new(path, &parsed, request_context.clone());
        ctx.log("resolve", &request.display(), "start resolving");

        for stage in ["resolve", "parsed-resolve"] {
            match self.registry.run(stage, &request)? {
                None | Some(PluginAction::Decline) => {}
                Some(PluginAction::Finish(finished)) => {
                    let cached_path = self.cache.value(&finished);
                    return self.finalize(&cached_path, &request, ctx);
                }
                Some(PluginAction::Ignore) => {
                    return Err(ResolveError::Ignored(path.normalize_with(parsed.path())));
                }
                Some(PluginAction::Rewrite(rewritten)) => {
                    ctx.with_query_fragment(
                        rewritten.query.as_deref(),
                        rewritten.fragment.as_deref(),
                    );
                    request = rewritten;
                }
            }
        }

        let lookup_dir = request.path.clone().unwrap_or_else(|| path.to_path_buf());
        let specifier_path = request.request.clone();
        let cached_path = self.cache.value(&lookup_dir);
        let cached_path = self
            .require(&cached_path, &specifier_path, &request, ctx)
            .or_else(|err| {
                if err.is_ignore() {
                    return Err(err);
                }
                // redirect through the fallback aliases before giving up
                self.load_alias(&cached_path, &specifier_path, &self.options.fallback, &request, ctx)
                    .and_then(|fallback| fallback.ok_or(err))
            })?;
        self.finalize(&cached_path, &request, ctx)
    }

    fn finalize(
        &self,
        cached_path: &CachedPath,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<Resolution, ResolveError> {
        let mut final_path = self.load_realpath(cached_path)?;
        self.check_restrictions(&final_path)?;
        if self.registry.has_taps("resolved") {
            let snapshot = request.with_path(Some(final_path.clone())).with_request("");
            match self.registry.run("resolved", &snapshot)? {
                None | Some(PluginAction::Decline) => {}
                Some(PluginAction::Finish(finished)) => final_path = finished,
                Some(PluginAction::Ignore) => return Err(ResolveError::Ignored(final_path)),
                Some(PluginAction::Rewrite(rewritten)) => {
                    ctx.with_query_fragment(
                        rewritten.query.as_deref(),
                        rewritten.fragment.as_deref(),
                    );
                    let base = rewritten
                        .path
                        .clone()
                        .map_or_else(|| cached_path.clone(), |p| self.cache.value(&p));
                    let specifier = rewritten.request.clone();
                    let reresolved = self.require(&base, &specifier, &rewritten, ctx)?;
                    return self.finalize(&reresolved, &rewritten, ctx);
                }
            }
        }
        let final_cached = self.cache.value(&final_path);
        let package_json = final_cached.find_package_json(&self.cache, &self.options, ctx)?;
        Ok(Resolution {
            path: final_path,
            query: ctx.query.take(),
            fragment: ctx.fragment.take(),
            package_json,
        })
    }

    /// require(X) from module at path Y.
    ///
    /// <https://nodejs.org/api/modules.html#all-together>
    pub(crate) fn require(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        ctx.test_for_infinite_recursion()?;
        // The visited set bounds the pipeline: the same (stage, path,
        // request) hop is never taken twice within one call.
        let Some(visit) = ctx.enter("resolve", cached_path.path(), specifier) else {
            ctx.log("resolve", &request.display(), "request already in flight, skipping");
            return Err(ResolveError::NotFound(specifier.to_string()));
        };
        let result = self.require_inner(cached_path, specifier, request, ctx);
        ctx.leave(visit);
        result
    }

    fn require_inner(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        // A `#` can be a fragment or part of the path; try it as path first.
        if let Some(path) = self.try_fragment_as_path(cached_path, specifier, request, ctx) {
            return Ok(path);
        }

        let request = &self.describe_request(cached_path, request, ctx)?;
        if let Some(path) = self.run_stage("described-resolve", cached_path, request, ctx)? {
            return Ok(path);
        }
        if let Some(path) = self.run_stage("raw-resolve", cached_path, request, ctx)? {
            return Ok(path);
        }

        if let Some(path) = self.load_alias(cached_path, specifier, &self.options.alias, request, ctx)? {
            return Ok(path);
        }

        if let Some(path) = self.run_stage("normal-resolve", cached_path, request, ctx)? {
            return Ok(path);
        }

        match Path::new(specifier).components().next() {
            Some(Component::RootDir | Component::Prefix(_)) => {
                self.require_absolute(cached_path, specifier, request, ctx)
            }
            Some(Component::CurDir | Component::ParentDir) => {
                self.require_relative(cached_path, specifier, request, ctx)
            }
            Some(Component::Normal(_)) if specifier.as_bytes()[0] == b'#' => {
                self.require_internal(cached_path, specifier, request, ctx)
            }
            _ => {
                self.require_core(specifier)?;
                self.require_bare(cached_path, specifier, request, ctx)
            }
        }
    }

    /// Populate the descriptor fields of the request record from the nearest
    /// description file.
    fn describe_request(
        &self,
        cached_path: &CachedPath,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<Request, ResolveError> {
        let Some(package_json) = cached_path.find_package_json(&self.cache, &self.options, ctx)?
        else {
            return Ok(request.clone());
        };
        let described = request.with_description_file(
            package_json.path.clone(),
            package_json.directory().to_path_buf(),
            Arc::clone(&package_json),
        );
        ctx.log(
            "described-resolve",
            &described.display(),
            format!("using description file: {}", package_json.path.display()),
        );
        Ok(described)
    }

    fn require_core(&self, specifier: &str) -> Result<(), ResolveError> {
        if self.options.builtin_modules && is_builtin_module(specifier) {
            return Err(ResolveError::Builtin(specifier.to_string()));
        }
        Ok(())
    }

    fn require_absolute(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        debug_assert!(Path::new(specifier)
            .components()
            .next()
            .is_some_and(|c| matches!(c, Component::RootDir | Component::Prefix(_))));
        if !self.options.prefer_relative && self.options.prefer_absolute {
            if let Ok(path) = self.load_package_self_or_node_modules(cached_path, specifier, request, ctx)
            {
                return Ok(path);
            }
        }
        if self.options.roots.is_empty() {
            let path = self.cache.value(Path::new(specifier));
            if let Some(path) = self.load_as_file_or_directory(&path, specifier, request, ctx)? {
                return Ok(path);
            }
            Err(ResolveError::NotFound(specifier.to_string()))
        } else {
            for root in &self.options.roots {
                let root_cached = self.cache.value(root);
                if let Ok(path) = self.require_relative(
                    &root_cached,
                    specifier.trim_start_matches(SLASH_START),
                    request,
                    ctx,
                ) {
                    return Ok(path);
                }
            }
            Err(ResolveError::NotFound(specifier.to_string()))
        }
    }

    fn require_relative(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        debug_assert!(Path::new(specifier).components().next().map_or(true, |c| matches!(
            c,
            Component::CurDir | Component::ParentDir | Component::Normal(_)
        )));
        let path = cached_path.path().normalize_with(specifier);
        let candidate = self.cache.value(&path);
        if let Some(path) = self.load_as_file_or_directory(&candidate, specifier, request, ctx)? {
            return Ok(path);
        }
        Err(ResolveError::NotFound(specifier.to_string()))
    }

    fn require_internal(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        debug_assert_eq!(specifier.chars().next(), Some('#'));
        if let Some(path) = self.run_stage("internal", cached_path, request, ctx)? {
            return Ok(path);
        }
        if let Some(path) = self.load_package_imports(cached_path, specifier, request, ctx)? {
            return Ok(path);
        }
        self.load_package_self_or_node_modules(cached_path, specifier, request, ctx)
    }

    fn require_bare(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        debug_assert!(Path::new(specifier)
            .components()
            .next()
            .is_some_and(|c| matches!(c, Component::Normal(_))));
        if let Some(path) = self.run_stage("module", cached_path, request, ctx)? {
            return Ok(path);
        }
        if self.options.prefer_relative {
            if let Ok(path) = self.require_relative(cached_path, specifier, request, ctx) {
                return Ok(path);
            }
        }
        self.load_package_self_or_node_modules(cached_path, specifier, request, ctx)
    }

    /// Try the fragment as part of the path, so `./some#thing` can mean
    /// `.../some#thing.js` before it means fragment `#thing` of `./some`.
    /// A resolved `#` stays escaped in the result.
    fn try_fragment_as_path(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Option<CachedPath> {
        if ctx.fragment.is_some() && ctx.query.is_none() {
            let fragment = ctx.fragment.take().unwrap();
            let joined = format!("{specifier}{fragment}");
            let rewritten = request.with_request(joined.as_str());
            if let Ok(path) = self.require(cached_path, &joined, &rewritten, ctx) {
                return Some(path);
            }
            ctx.fragment.replace(fragment);
        }
        None
    }

    /// Run a hook's user plugins and fold the outcome back into the
    /// pipeline: `Ok(None)` continues, `Ok(Some)` is terminal.
    fn run_stage(
        &self,
        stage: &'static str,
        cached_path: &CachedPath,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        if !self.registry.has_taps(stage) {
            return Ok(None);
        }
        match self.registry.run(stage, request)? {
            None | Some(PluginAction::Decline) => Ok(None),
            Some(PluginAction::Finish(path)) => {
                ctx.log(stage, &request.display(), "finished by plugin");
                Ok(Some(self.cache.value(&path)))
            }
            Some(PluginAction::Ignore) => {
                Err(ResolveError::Ignored(cached_path.path().normalize_with(&request.request)))
            }
            Some(PluginAction::Rewrite(rewritten)) => {
                ctx.log(stage, &rewritten.display(), "rewritten by plugin");
                ctx.with_query_fragment(rewritten.query.as_deref(), rewritten.fragment.as_deref());
                ctx.with_fully_specified(false);
                let base = rewritten
                    .path
                    .clone()
                    .map_or_else(|| cached_path.clone(), |p| self.cache.value(&p));
                let specifier = rewritten.request.clone();
                self.require(&base, &specifier, &rewritten, ctx).map(Some)
            }
        }
    }

    /// Like [ResolverGeneric::run_stage], for the file-candidate hooks where
    /// the candidate is a concrete path rather than a request suffix.
    fn run_file_stage(
        &self,
        stage: &'static str,
        cached_path: &CachedPath,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        if !self.registry.has_taps(stage) {
            return Ok(None);
        }
        let snapshot = request.with_path(Some(cached_path.to_path_buf())).with_request("");
        self.run_stage(stage, cached_path, &snapshot, ctx)
    }

    fn load_package_self_or_node_modules(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        let (_, subpath) = parse_package_specifier(specifier);
        if subpath.is_empty() {
            ctx.with_fully_specified(false);
        }
        if let Some(path) = self.run_stage("resolve-as-module", cached_path, request, ctx)? {
            return Ok(path);
        }
        // 5. LOAD_PACKAGE_SELF(X, dirname(Y))
        if let Some(path) = self.load_package_self(cached_path, specifier, request, ctx)? {
            return Ok(path);
        }
        // 6. LOAD_NODE_MODULES(X, dirname(Y))
        if let Some(path) = self.load_node_modules(cached_path, specifier, request, ctx)? {
            return Ok(path);
        }
        Err(ResolveError::NotFound(specifier.to_string()))
    }

    /// LOAD_PACKAGE_IMPORTS(X, DIR)
    fn load_package_imports(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let Some(package_json) = cached_path.find_package_json(&self.cache, &self.options, ctx)?
        else {
            return Ok(None);
        };
        if package_json.imports_fields(&self.options.imports_fields).next().is_none() {
            return Ok(None);
        }
        let path = self.package_imports_resolve(specifier, &package_json, request, ctx)?;
        self.resolve_esm_match(specifier, &path, &package_json, request, ctx)
    }

    /// LOAD_PACKAGE_SELF(X, DIR): a request starting with the enclosing
    /// package's own name resolves through its exports tree.
    fn load_package_self(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let Some(package_json) = cached_path.find_package_json(&self.cache, &self.options, ctx)?
        else {
            return Ok(None);
        };
        let exports: Vec<_> = package_json
            .exports_fields(&self.options.exports_fields)
            .filter(|entry| !matches!(entry, ImportsExportsEntry::Null))
            .collect();
        if !exports.is_empty() {
            if let Some(subpath) = package_json
                .name
                .as_ref()
                .and_then(|name| strip_package_name(specifier, name))
            {
                let package_url = package_json.directory();
                let match_key = format!(".{subpath}");
                for entry in &exports {
                    if let Some(path) = self.package_exports_resolve(
                        package_url,
                        &match_key,
                        *entry,
                        &self.options.condition_names,
                        request,
                        ctx,
                    )? {
                        return self.resolve_esm_match(specifier, &path, &package_json, request, ctx);
                    }
                }
            }
        }
        self.load_alias_field(cached_path, Some(specifier), &package_json, request, ctx)
    }

    /// RESOLVE_ESM_MATCH(MATCH)
    fn resolve_esm_match(
        &self,
        specifier: &str,
        cached_path: &CachedPath,
        package_json: &PackageJson,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        if let Some(path) = self.load_alias_field(cached_path, None, package_json, request, ctx)? {
            return Ok(Some(path));
        }
        // Non-compliant packages point exports at directories, so the
        // directory fallback is tried as well.
        if let Some(path) = self.load_as_file_or_directory(cached_path, "", request, ctx)? {
            return Ok(Some(path));
        }
        Err(ResolveError::NotFound(specifier.to_string()))
    }

    /// Apply a descriptor alias field (e.g. `browser`) to a path or module
    /// request.
    fn load_alias_field(
        &self,
        cached_path: &CachedPath,
        module_specifier: Option<&str>,
        package_json: &PackageJson,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let path = cached_path.path();
        let Some(new_specifier) = package_json.resolve_alias_field(path, module_specifier)? else {
            return Ok(None);
        };
        // A mapping onto itself would never terminate.
        if module_specifier.is_some_and(|s| s == new_specifier) {
            return Ok(None);
        }
        if ctx.resolving_alias.as_ref().is_some_and(|s| s == new_specifier) {
            // `{"./a.js": "./a.js"}` style self-mappings complete here.
            if new_specifier.strip_prefix("./").filter(|s| path.ends_with(Path::new(s))).is_some() {
                return if cached_path.is_file(&self.cache.fs, ctx) {
                    Ok(Some(cached_path.clone()))
                } else {
                    Err(ResolveError::NotFound(new_specifier.to_string()))
                };
            }
            return Err(ResolveError::Recursion);
        }
        ctx.log(
            "described-resolve",
            &request.display(),
            format!("aliased by description file field to '{new_specifier}'"),
        );
        let parsed = Specifier::parse(new_specifier).map_err(ResolveError::Specifier)?;
        ctx.with_query_fragment(parsed.query, parsed.fragment);
        ctx.with_resolving_alias(parsed.path().to_string());
        ctx.with_fully_specified(false);
        let dir = self.cache.value(package_json.directory());
        let rewritten = request
            .with_path(Some(package_json.directory().to_path_buf()))
            .with_request(parsed.path());
        self.require(&dir, parsed.path(), &rewritten, ctx).map(Some)
    }

    /// Apply the configured alias (or fallback) table.
    fn load_alias(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        aliases: &Alias,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        for (alias_key_raw, values) in aliases {
            let alias_key = if let Some(exact_key) = alias_key_raw.strip_suffix('$') {
                if exact_key != specifier {
                    continue;
                }
                exact_key
            } else {
                if strip_package_name(specifier, alias_key_raw).is_none() {
                    continue;
                }
                alias_key_raw.as_str()
            };
            ctx.log(
                "raw-resolve",
                &request.display(),
                format!("aliased with mapping '{alias_key}'"),
            );
            for value in values {
                match value {
                    AliasValue::Path(alias_value) => {
                        let parsed =
                            Specifier::parse(alias_value).map_err(ResolveError::Specifier)?;

                        // `#` in the alias value may be a path character;
                        // try the raw value as a path first.
                        if parsed.query.is_none() && parsed.fragment.is_some() {
                            if let Some(path) = self.load_alias_value(
                                cached_path,
                                alias_key,
                                alias_value,
                                specifier,
                                request,
                                ctx,
                            )? {
                                return Ok(Some(path));
                            }
                        }

                        let old_query = ctx.query.clone();
                        let old_fragment = ctx.fragment.clone();
                        ctx.with_query_fragment(parsed.query, parsed.fragment);
                        if let Some(path) = self.load_alias_value(
                            cached_path,
                            alias_key,
                            parsed.path(),
                            specifier,
                            request,
                            ctx,
                        )? {
                            return Ok(Some(path));
                        }
                        ctx.query = old_query;
                        ctx.fragment = old_fragment;
                    }
                    AliasValue::Ignore => {
                        return Err(ResolveError::Ignored(
                            cached_path.path().normalize_with(alias_key),
                        ));
                    }
                }
            }
        }
        Ok(None)
    }

    fn load_alias_value(
        &self,
        cached_path: &CachedPath,
        alias_key: &str,
        alias_value: &str,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        // Re-entry guard: never apply an alias to its own value.
        if specifier == alias_value
            || specifier.strip_prefix(alias_value).is_some_and(|tail| tail.starts_with('/'))
        {
            return Ok(None);
        }
        let tail = &specifier[alias_key.len()..];
        let new_specifier = if tail.is_empty() {
            Cow::Borrowed(alias_value)
        } else {
            let alias_path = Path::new(alias_value).normalize();
            // Nothing may be appended to an alias value that is a file.
            let alias_cached = self.cache.value(&alias_path);
            if alias_cached.is_file(&self.cache.fs, ctx) {
                return Ok(None);
            }
            let tail = tail.trim_start_matches(SLASH_START);
            Cow::Owned(alias_path.normalize_with(tail).to_string_lossy().into_owned())
        };
        ctx.with_fully_specified(false);
        let rewritten = request.with_request(new_specifier.as_ref());
        match self.require(cached_path, new_specifier.as_ref(), &rewritten, ctx) {
            Ok(path) => Ok(Some(path)),
            Err(ResolveError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn load_as_file_or_directory(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        if self.options.resolve_to_context {
            return Ok(cached_path.is_dir(&self.cache.fs, ctx).then(|| {
                ctx.add_context_dependency(cached_path.path());
                cached_path.clone()
            }));
        }
        if !specifier.ends_with('/') {
            if let Some(path) = self.load_as_file(cached_path, request, ctx)? {
                return Ok(Some(path));
            }
        }
        if cached_path.is_dir(&self.cache.fs, ctx) {
            if let Some(path) = self.load_as_directory(cached_path, request, ctx)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn load_as_file(&self, cached_path: &CachedPath, request: &Request, ctx: &mut Ctx) -> ResolveResult {
        if let Some(path) = self.run_file_stage("undescribed-raw-file", cached_path, request, ctx)? {
            return Ok(Some(path));
        }
        if let Some(path) = self.load_extension_alias(cached_path, request, ctx)? {
            return Ok(Some(path));
        }
        if let Some(path) = self.run_file_stage("raw-file", cached_path, request, ctx)? {
            return Ok(Some(path));
        }
        if self.options.enforce_extension.is_disabled() {
            // 1. If X is a file, load X. STOP
            if let Some(path) = self.load_alias_or_file(cached_path, request, ctx)? {
                return Ok(Some(path));
            }
        }
        // 2. Try X with each configured extension. STOP at the first file.
        if let Some(path) =
            self.load_extensions(cached_path.path(), &self.options.extensions, request, ctx)?
        {
            return Ok(Some(path));
        }
        Ok(None)
    }

    fn load_as_directory(&self, cached_path: &CachedPath, request: &Request, ctx: &mut Ctx) -> ResolveResult {
        if !self.options.description_files.is_empty() {
            if let Some(package_json) = cached_path.package_json(&self.cache, &self.options, ctx)? {
                for main_field in package_json.main_fields(&self.options.main_fields) {
                    ctx.log(
                        "described-resolve",
                        &request.display(),
                        format!("using main field '{main_field}'"),
                    );
                    let main_path = cached_path.path().normalize_with(main_field);
                    let main_cached = self.cache.value(&main_path);
                    if let Some(path) = self.load_as_file(&main_cached, request, ctx)? {
                        return Ok(Some(path));
                    }
                    if let Some(path) = self.load_index(&main_cached, request, ctx)? {
                        return Ok(Some(path));
                    }
                }
            }
        }
        self.load_index(cached_path, request, ctx)
    }

    fn load_index(&self, cached_path: &CachedPath, request: &Request, ctx: &mut Ctx) -> ResolveResult {
        for main_file in &self.options.main_files {
            let main_path = cached_path.path().normalize_with(main_file);
            let main_cached = self.cache.value(&main_path);
            if self.options.enforce_extension.is_disabled() {
                if let Some(path) = self.load_alias_or_file(&main_cached, request, ctx)? {
                    return Ok(Some(path));
                }
            }
            if let Some(path) =
                self.load_extensions(main_cached.path(), &self.options.extensions, request, ctx)?
            {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn load_extensions(
        &self,
        path: &Path,
        extensions: &[String],
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        if ctx.fully_specified {
            return Ok(None);
        }
        for extension in extensions {
            let mut candidate = path.to_path_buf().into_os_string();
            candidate.reserve_exact(extension.len());
            candidate.push(extension);
            let candidate = self.cache.value(Path::new(&candidate));
            if let Some(path) = self.load_alias_or_file(&candidate, request, ctx)? {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    fn load_alias_or_file(&self, cached_path: &CachedPath, request: &Request, ctx: &mut Ctx) -> ResolveResult {
        if let Some(path) = self.run_file_stage("file", cached_path, request, ctx)? {
            return Ok(Some(path));
        }
        if let Some(package_json) = cached_path.find_package_json(&self.cache, &self.options, ctx)? {
            if let Some(path) = self.load_alias_field(cached_path, None, &package_json, request, ctx)? {
                return Ok(Some(path));
            }
        }
        // A fully expanded candidate path can itself be aliased.
        let alias_specifier = cached_path.path().to_string_lossy();
        if let Some(path) =
            self.load_alias(cached_path, &alias_specifier, &self.options.alias, request, ctx)?
        {
            return Ok(Some(path));
        }
        if let Some(path) = self.run_file_stage("final-file", cached_path, request, ctx)? {
            return Ok(Some(path));
        }
        if cached_path.is_file(&self.cache.fs, ctx) {
            ctx.log("existing-file", &cached_path.path().display(), "existing file");
            if let Some(path) = self.run_file_stage("existing-file", cached_path, request, ctx)? {
                return Ok(Some(path));
            }
            return Ok(Some(cached_path.clone()));
        }
        ctx.log("file", &cached_path.path().display(), "doesn't exist");
        Ok(None)
    }

    fn load_node_modules(
        &self,
        cached_path: &CachedPath,
        specifier: &str,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let (package_name, subpath) = parse_package_specifier(specifier);
        // 1. let DIRS = NODE_MODULES_PATHS(START)
        // 2. for each DIR in DIRS:
        for module_name in &self.options.modules {
            for dir in std::iter::successors(Some(cached_path), |p| p.parent()) {
                if !dir.is_dir(&self.cache.fs, ctx) {
                    continue;
                }
                let Some(module_dir) = self.get_module_directory(dir, module_name, ctx) else {
                    continue;
                };
                ctx.log(
                    "module",
                    &request.display(),
                    format!("looking for modules in {}", module_dir.path().display()),
                );
                // Check whether the package directory exists before probing
                // inside it.
                if !package_name.is_empty() {
                    let package_path = module_dir.path().normalize_with(package_name);
                    let package_cached = self.cache.value(&package_path);
                    if package_cached.is_dir(&self.cache.fs, ctx) {
                        // a. LOAD_PACKAGE_EXPORTS(X, DIR)
                        if let Some(path) = self.load_package_exports(
                            specifier,
                            subpath,
                            &package_cached,
                            request,
                            ctx,
                        )? {
                            return Ok(Some(path));
                        }
                    } else {
                        if !subpath.is_empty() {
                            continue;
                        }
                        // `foo/node_modules/@scope` missing means the scoped
                        // package cannot exist either.
                        if package_name.starts_with('@') {
                            if let Some(scope_dir) = package_cached.parent() {
                                if !scope_dir.is_dir(&self.cache.fs, ctx) {
                                    continue;
                                }
                            }
                        }
                    }
                }

                // b. LOAD_AS_FILE(DIR/X)
                // c. LOAD_AS_DIRECTORY(DIR/X)
                let candidate = module_dir.path().normalize_with(specifier);
                let candidate = self.cache.value(&candidate);
                if let Some(path) = self.load_as_file_or_directory(&candidate, specifier, request, ctx)? {
                    return Ok(Some(path));
                }
            }
        }
        Ok(None)
    }

    fn get_module_directory(
        &self,
        cached_path: &CachedPath,
        module_name: &str,
        ctx: &mut Ctx,
    ) -> Option<CachedPath> {
        if cached_path.path().ends_with(module_name) {
            Some(cached_path.clone())
        } else if module_name == "node_modules" {
            cached_path.cached_node_modules(&self.cache, ctx)
        } else {
            cached_path.module_directory(module_name, &self.cache, ctx)
        }
    }

    /// LOAD_PACKAGE_EXPORTS(X, DIR)
    fn load_package_exports(
        &self,
        specifier: &str,
        subpath: &str,
        cached_path: &CachedPath,
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let Some(package_json) = cached_path.package_json(&self.cache, &self.options, ctx)? else {
            return Ok(None);
        };
        let exports: Vec<_> = package_json
            .exports_fields(&self.options.exports_fields)
            .filter(|entry| !matches!(entry, ImportsExportsEntry::Null))
            .collect();
        if exports.is_empty() {
            return Ok(None);
        }
        let match_key = format!(".{subpath}");
        for entry in exports {
            if let Some(path) = self.package_exports_resolve(
                cached_path.path(),
                &match_key,
                entry,
                &self.options.condition_names,
                request,
                ctx,
            )? {
                return self.resolve_esm_match(specifier, &path, &package_json, request, ctx);
            }
        }
        Ok(None)
    }

    /// Map an extension onto its configured replacements; when the map
    /// applies, the original extension is never tried.
    fn load_extension_alias(&self, cached_path: &CachedPath, request: &Request, ctx: &mut Ctx) -> ResolveResult {
        if self.options.extension_alias.is_empty() {
            return Ok(None);
        }
        let Some(extension) = cached_path.path().extension().and_then(std::ffi::OsStr::to_str)
        else {
            return Ok(None);
        };
        let Some((_, replacements)) = self
            .options
            .extension_alias
            .iter()
            .find(|(aliased, _)| aliased.trim_start_matches('.') == extension)
        else {
            return Ok(None);
        };
        ctx.log(
            "raw-file",
            &request.display(),
            format!("mapping extension '.{extension}' to '{}'", replacements.join(", ")),
        );
        let stem = cached_path.path().with_extension("");
        ctx.with_fully_specified(false);
        if let Some(path) = self.load_extensions(&stem, replacements, request, ctx)? {
            return Ok(Some(path));
        }
        let file_name = cached_path
            .path()
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
        let dir = cached_path.parent().map_or_else(PathBuf::new, |parent| parent.to_path_buf());
        Err(ResolveError::ExtensionAlias(file_name, replacements.join(", "), dir))
    }

    fn load_realpath(&self, cached_path: &CachedPath) -> Result<PathBuf, ResolveError> {
        if self.options.symlinks {
            self.cache.canonicalize(cached_path)
        } else {
            Ok(cached_path.to_path_buf())
        }
    }

    fn check_restrictions(&self, path: &Path) -> Result<(), ResolveError> {
        for restriction in &self.options.restrictions {
            let satisfied = match restriction {
                Restriction::Path(allowed) => path.is_inside(allowed),
                Restriction::RegExp(regex) => regex.is_match(&path.to_string_lossy()),
            };
            if !satisfied {
                return Err(ResolveError::Restriction(
                    path.to_path_buf(),
                    restriction.describe(),
                ));
            }
        }
        Ok(())
    }
}

/// Split a bare specifier into `(package_name, subpath)`, honoring
/// `@scope/name` packages. The subpath keeps its leading `/`.
fn parse_package_specifier(specifier: &str) -> (&str, &str) {
    let mut separator = specifier.as_bytes().iter().position(|b| *b == b'/');
    if specifier.starts_with('@') {
        if let Some(first) = separator {
            separator = specifier[first + 1..]
                .as_bytes()
                .iter()
                .position(|b| *b == b'/')
                .map(|i| i + first + 1);
        }
    }
    separator.map_or((specifier, ""), |index| (&specifier[..index], &specifier[index..]))
}

fn strip_package_name<'a>(specifier: &'a str, package_name: &str) -> Option<&'a str> {
    specifier
        .strip_prefix(package_name)
        .filter(|tail| tail.is_empty() || tail.starts_with(SLASH_START))
}
