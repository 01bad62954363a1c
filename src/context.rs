use std::{
    fmt,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
};

use rustc_hash::{FxHashSet, FxHasher};

use crate::error::ResolveError;

/// One row of the attempt log: what a pipeline stage tried and why it moved
/// on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub stage: &'static str,
    pub request: String,
    pub message: String,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.stage, self.message, self.request)
    }
}

/// Per-call observability sidecar filled by
/// [`crate::ResolverGeneric::resolve_with_context`].
///
/// The dependency sets cover every filesystem path the call touched or probed
/// and missed; `trace` aggregates the attempt log of a failing resolve.
#[derive(Debug, Default, Clone)]
pub struct ResolveContext {
    /// Paths that were found on the file system.
    pub file_dependencies: FxHashSet<PathBuf>,

    /// Directories the call depends on (e.g. a context resolution target).
    pub context_dependencies: FxHashSet<PathBuf>,

    /// Paths that were probed but do not exist.
    pub missing_dependencies: FxHashSet<PathBuf>,

    /// Ordered attempt log, one row per pipeline decision.
    pub trace: Vec<Attempt>,
}

/// Key of an entry in the visited set, returned by [Ctx::enter].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct VisitKey(u64);

/// Internal per-call state threaded through the pipeline.
#[derive(Debug, Default)]
pub(crate) struct Ctx {
    pub fully_specified: bool,
    pub query: Option<String>,
    pub fragment: Option<String>,
    /// The alias value currently being re-resolved, for bailing out of
    /// self-referencing alias fields.
    pub resolving_alias: Option<String>,
    depth: u16,
    visited: FxHashSet<u64>,
    pub file_dependencies: Option<Vec<PathBuf>>,
    pub context_dependencies: Option<Vec<PathBuf>>,
    pub missing_dependencies: Option<Vec<PathBuf>>,
    attempts: Option<Vec<Attempt>>,
}

impl Ctx {
    const MAX_DEPTH: u16 = 256;

    pub fn with_fully_specified(&mut self, yes: bool) {
        self.fully_specified = yes;
    }

    pub fn with_query_fragment(&mut self, query: Option<&str>, fragment: Option<&str>) {
        if let Some(query) = query {
            self.query.replace(query.to_string());
        }
        if let Some(fragment) = fragment {
            self.fragment.replace(fragment.to_string());
        }
    }

    pub fn with_resolving_alias(&mut self, alias: String) {
        self.resolving_alias = Some(alias);
    }

    pub fn init_dependencies(&mut self) {
        self.file_dependencies = Some(Vec::new());
        self.context_dependencies = Some(Vec::new());
        self.missing_dependencies = Some(Vec::new());
    }

    pub fn init_trace(&mut self) {
        self.attempts = Some(Vec::new());
    }

    pub fn add_file_dependency(&mut self, path: &Path) {
        if let Some(deps) = &mut self.file_dependencies {
            deps.push(path.to_path_buf());
        }
    }

    pub fn add_context_dependency(&mut self, path: &Path) {
        if let Some(deps) = &mut self.context_dependencies {
            deps.push(path.to_path_buf());
        }
    }

    pub fn add_missing_dependency(&mut self, path: &Path) {
        if let Some(deps) = &mut self.missing_dependencies {
            deps.push(path.to_path_buf());
        }
    }

    pub fn log(&mut self, stage: &'static str, request: &dyn fmt::Display, message: impl Into<String>) {
        let message = message.into();
        tracing::trace!(stage, request = %request, "{message}");
        if let Some(attempts) = &mut self.attempts {
            attempts.push(Attempt { stage, request: request.to_string(), message });
        }
    }

    pub fn take_attempts(&mut self) -> Vec<Attempt> {
        self.attempts.take().unwrap_or_default()
    }

    /// Guard against runaway recursion; the visited set in [Ctx::enter] is
    /// the canonical loop check, the depth cap is a backstop for loops that
    /// keep producing distinct requests.
    pub fn test_for_infinite_recursion(&mut self) -> Result<(), ResolveError> {
        self.depth += 1;
        if self.depth > Self::MAX_DEPTH {
            return Err(ResolveError::Recursion);
        }
        Ok(())
    }

    /// Mark a `(stage, path, request)` hop as in flight. Returns `None` when
    /// the exact hop is already on the stack, i.e. the pipeline would revisit
    /// itself. Pass the key to [Ctx::leave] when unwinding.
    ///
    /// The key covers the mutable per-call state as well: a hop re-entered
    /// with a different query, fragment or in-flight alias is a different
    /// hop, not a loop.
    pub fn enter(&mut self, stage: &'static str, path: &Path, request: &str) -> Option<VisitKey> {
        let mut hasher = FxHasher::default();
        stage.hash(&mut hasher);
        path.as_os_str().hash(&mut hasher);
        request.hash(&mut hasher);
        self.query.hash(&mut hasher);
        self.fragment.hash(&mut hasher);
        self.resolving_alias.hash(&mut hasher);
        self.fully_specified.hash(&mut hasher);
        let key = hasher.finish();
        self.visited.insert(key).then_some(VisitKey(key))
    }

    pub fn leave(&mut self, key: VisitKey) {
        self.visited.remove(&key.0);
    }
}
