use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::{cached_fs::CachedFs, hooks::Plugin, FileSystemOs, Resolution};

/// Admission filter for the whole-result cache.
pub type CachePredicate = Arc<dyn Fn(&Resolution) -> bool + Send + Sync>;

/// Module resolution options.
///
/// The option set is a configurable superset of the Node.js algorithm; field
/// names follow the common bundler configuration surface.
#[derive(Clone)]
pub struct ResolveOptions {
    /// Alias table applied to the request before candidate expansion.
    ///
    /// An alias replaces the whole request or its leading segment. A key
    /// ending in `$` only matches exactly. An [AliasValue::Ignore] value
    /// marks the module as deliberately absent.
    pub alias: Alias,

    /// Descriptor fields holding alias maps, e.g. `browser`, parsed
    /// according to the
    /// [package-browser-field spec](https://github.com/defunctzombie/package-browser-field-spec).
    /// Each entry is a dotted path such as `["browser"]`.
    ///
    /// Default `[]`
    pub alias_fields: Vec<Vec<String>>,

    /// Active condition names for the exports/imports trees, in preference
    /// order.
    ///
    /// Default `[]`
    pub condition_names: Vec<String>,

    /// Candidate descriptor file names; the first name present in a
    /// directory wins.
    ///
    /// Default `["package.json"]`
    pub description_files: Vec<String>,

    /// When enabled, a bare path without one of [ResolveOptions::extensions]
    /// is never a valid terminal.
    ///
    /// [EnforceExtension::Auto] (the default) becomes `Enabled` when
    /// [ResolveOptions::extensions] contains an empty string, `Disabled`
    /// otherwise.
    pub enforce_extension: EnforceExtension,

    /// Descriptor fields holding the exports tree, as dotted paths.
    ///
    /// Default `[["exports"]]`
    pub exports_fields: Vec<Vec<String>>,

    /// Descriptor fields holding the imports tree (requests starting with
    /// `#`), as dotted paths.
    ///
    /// Default `[["imports"]]`
    pub imports_fields: Vec<Vec<String>>,

    /// Maps an extension to a priority-ordered list of replacements, e.g.
    /// `.js -> [".ts", ".js"]`. When any replacement resolves, the original
    /// extension is not tried.
    ///
    /// Default `[]`
    pub extension_alias: Vec<(String, Vec<String>)>,

    /// Extensions to try for files, in order. All entries carry a leading
    /// dot.
    ///
    /// Default `[".js", ".json", ".node"]`
    pub extensions: Vec<String>,

    /// Alias table consulted only after normal resolution fails.
    ///
    /// Default `[]`
    pub fallback: Alias,

    /// The top-level request is already fully specified: extensions and main
    /// files are not tried for it (they still are for internal requests).
    ///
    /// Default `false`
    pub fully_specified: bool,

    /// Descriptor fields naming the package entry point; the first defined
    /// non-empty field wins.
    ///
    /// Default `["main"]`
    pub main_fields: Vec<String>,

    /// File names tried when resolving a directory.
    ///
    /// Default `["index"]`
    pub main_files: Vec<String>,

    /// Module directories to walk, each either a name (searched upward
    /// through every ancestor) or an absolute path.
    ///
    /// Default `["node_modules"]`
    pub modules: Vec<String>,

    /// Resolve to a directory instead of a file.
    ///
    /// Default `false`
    pub resolve_to_context: bool,

    /// Try the relative interpretation of a bare request before the module
    /// directory walk.
    ///
    /// Default `false`
    pub prefer_relative: bool,

    /// Try self/module resolution of a `/`-prefixed request before the
    /// filesystem root and [ResolveOptions::roots].
    ///
    /// Default `false`
    pub prefer_absolute: bool,

    /// Post-resolution filters; the terminal path must satisfy every entry.
    ///
    /// Default `[]`
    pub restrictions: Vec<Restriction>,

    /// Directories where `/`-prefixed requests are retried relative to the
    /// root.
    ///
    /// Default `[]`
    pub roots: Vec<PathBuf>,

    /// Canonicalize every symlinked segment of the result.
    ///
    /// Default `true`
    pub symlinks: bool,

    /// Recognize Node builtin specifiers (`fs`, `node:path`, ...) and report
    /// them as [crate::ResolveError::Builtin].
    ///
    /// Default `false`
    pub builtin_modules: bool,

    /// User plugins, attached to their declared source hooks in order.
    ///
    /// Default `[]`
    pub plugins: Vec<Arc<dyn Plugin>>,

    /// Memoize entire resolve results keyed by `(path, request)`. The cache
    /// never observes filesystem changes; pair it with
    /// [crate::ResolverGeneric::clear_cache].
    ///
    /// Default `false`
    pub unsafe_cache: bool,

    /// Include the caller's request context in the result cache key.
    ///
    /// Default `true`
    pub cache_with_context: bool,

    /// Admission filter for the result cache; results it rejects are
    /// recomputed on every call.
    ///
    /// Default `None` (admit everything)
    pub cache_predicate: Option<CachePredicate>,

    /// How long a filesystem probe stays memoized.
    ///
    /// Default 4 seconds.
    pub fs_cache_ttl: Duration,
}

impl ResolveOptions {
    #[must_use]
    pub fn with_condition_names(mut self, names: &[&str]) -> Self {
        self.condition_names = names.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.roots.push(root.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn with_extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.extensions.push(extension.into());
        self
    }

    #[must_use]
    pub fn with_main_field<S: Into<String>>(mut self, field: S) -> Self {
        self.main_fields.push(field.into());
        self
    }

    #[must_use]
    pub const fn with_symbolic_link(mut self, flag: bool) -> Self {
        self.symlinks = flag;
        self
    }

    #[must_use]
    pub fn with_module<S: Into<String>>(mut self, module: S) -> Self {
        self.modules.push(module.into());
        self
    }

    pub(crate) fn sanitize(mut self) -> Self {
        debug_assert!(
            self.extensions.iter().filter(|e| !e.is_empty()).all(|e| e.starts_with('.')),
            "All extensions must start with a leading dot"
        );
        // An empty extension entry means "also try the bare path", which is
        // the enforce-extension switch in disguise.
        if self.enforce_extension == EnforceExtension::Auto {
            if !self.extensions.is_empty() && self.extensions.iter().any(String::is_empty) {
                self.enforce_extension = EnforceExtension::Enabled;
            } else {
                self.enforce_extension = EnforceExtension::Disabled;
            }
        }
        self
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            alias: vec![],
            alias_fields: vec![],
            condition_names: vec![],
            description_files: vec!["package.json".into()],
            enforce_extension: EnforceExtension::Auto,
            exports_fields: vec![vec!["exports".into()]],
            imports_fields: vec![vec!["imports".into()]],
            extension_alias: vec![],
            extensions: vec![".js".into(), ".json".into(), ".node".into()],
            fallback: vec![],
            fully_specified: false,
            main_fields: vec!["main".into()],
            main_files: vec!["index".into()],
            modules: vec!["node_modules".into()],
            resolve_to_context: false,
            prefer_relative: false,
            prefer_absolute: false,
            restrictions: vec![],
            roots: vec![],
            symlinks: true,
            builtin_modules: false,
            plugins: vec![],
            unsafe_cache: false,
            cache_with_context: true,
            cache_predicate: None,
            fs_cache_ttl: CachedFs::<FileSystemOs>::DEFAULT_TTL,
        }
    }
}

/// Value for [ResolveOptions::enforce_extension].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceExtension {
    Auto,
    Enabled,
    Disabled,
}

impl EnforceExtension {
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::Auto)
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

/// Alias table for [ResolveOptions::alias] and [ResolveOptions::fallback].
pub type Alias = Vec<(String, Vec<AliasValue>)>;

/// One alias replacement.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum AliasValue {
    /// Replacement request or path.
    Path(String),

    /// The `false` value: the module is deliberately absent.
    Ignore,
}

impl<S> From<S> for AliasValue
where
    S: Into<String>,
{
    fn from(value: S) -> Self {
        Self::Path(value.into())
    }
}

/// Entry of [ResolveOptions::restrictions].
#[derive(Debug, Clone)]
pub enum Restriction {
    /// The result must live inside this directory.
    Path(PathBuf),
    /// The result path must match this pattern.
    RegExp(regex::Regex),
}

impl Restriction {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Path(path) => format!("path {}", path.display()),
            Self::RegExp(regex) => format!("regex {}", regex.as_str()),
        }
    }
}

impl fmt::Debug for ResolveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveOptions")
            .field("alias", &self.alias)
            .field("alias_fields", &self.alias_fields)
            .field("condition_names", &self.condition_names)
            .field("description_files", &self.description_files)
            .field("enforce_extension", &self.enforce_extension)
            .field("exports_fields", &self.exports_fields)
            .field("imports_fields", &self.imports_fields)
            .field("extension_alias", &self.extension_alias)
            .field("extensions", &self.extensions)
            .field("fallback", &self.fallback)
            .field("fully_specified", &self.fully_specified)
            .field("main_fields", &self.main_fields)
            .field("main_files", &self.main_files)
            .field("modules", &self.modules)
            .field("resolve_to_context", &self.resolve_to_context)
            .field("prefer_relative", &self.prefer_relative)
            .field("prefer_absolute", &self.prefer_absolute)
            .field("restrictions", &self.restrictions)
            .field("roots", &self.roots)
            .field("symlinks", &self.symlinks)
            .field("builtin_modules", &self.builtin_modules)
            .field("plugins", &self.plugins.iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .field("unsafe_cache", &self.unsafe_cache)
            .field("cache_with_context", &self.cache_with_context)
            .field("cache_predicate", &self.cache_predicate.as_ref().map(|_| "<fn>"))
            .field("fs_cache_ttl", &self.fs_cache_ttl)
            .finish()
    }
}
