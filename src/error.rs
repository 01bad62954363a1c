use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// All resolution errors.
///
/// `thiserror` is used to display meaningful error messages.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// The request matched an alias entry whose value is `false`, or a
    /// `false` value in a descriptor alias field such as `browser`.
    ///
    /// ```json
    /// {
    ///     "browser": { "./module": false }
    /// }
    /// ```
    ///
    /// Not a failure: the module is deliberately absent.
    #[error("Path is ignored {0}")]
    Ignored(PathBuf),

    /// Every candidate was exhausted.
    ///
    /// The aggregated attempt log is available through
    /// [`crate::ResolveContext::trace`] when tracing was enabled for the call.
    #[error("Cannot find module '{0}'")]
    NotFound(/* request */ String),

    /// The request string itself cannot be parsed.
    #[error("{0}")]
    Specifier(SpecifierError),

    /// A descriptor file exists but is not valid JSON.
    #[error("{0:?}")]
    Json(JSONError),

    #[error("{0}")]
    IOError(IOError),

    /// A Node builtin module name, reported when
    /// [`crate::ResolveOptions::builtin_modules`] is enabled.
    #[error("Builtin module {0}")]
    Builtin(String),

    /// None of the aliased extensions produced a file.
    #[error("Cannot resolve '{0}' for extension aliases '{1}' in '{2}'")]
    ExtensionAlias(
        /* file name */ String,
        /* tried names */ String,
        /* directory */ PathBuf,
    ),

    #[error(r#"Invalid module "{0}" specifier is not a valid subpath for the "exports" resolution of {1}"#)]
    InvalidModuleSpecifier(String, PathBuf),

    #[error(r#"Invalid "exports" target "{0}" defined for '{1}' in the package config {2}"#)]
    InvalidPackageTarget(String, String, PathBuf),

    #[error(r#"Package subpath '{0}' is not defined by "exports" in {1}"#)]
    PackagePathNotExported(String, PathBuf),

    /// The exports/imports tree maps the subpath to `null`, explicitly
    /// forbidding it.
    #[error(r#"Package subpath '{0}' is blocked by a null target in {1}"#)]
    PackagePathBlocked(String, PathBuf),

    #[error(r#"Invalid package config "{0}", "exports" cannot contain some keys starting with '.' and some not. The exports object must either be an object of package subpath keys or an object of main entry condition name keys only."#)]
    InvalidPackageConfig(PathBuf),

    #[error(r#"Default condition should be last one in "{0}""#)]
    InvalidPackageConfigDefault(PathBuf),

    #[error(r#"Expecting folder to folder mapping. "{0}" should end with "/""#)]
    InvalidPackageConfigDirectory(PathBuf),

    #[error(r#"Package import specifier "{0}" is not defined in package {1}"#)]
    PackageImportNotDefined(String, PathBuf),

    /// The terminal path violated a [`crate::Restriction`].
    #[error("Path {0:?} is restricted by {1}")]
    Restriction(PathBuf, /* rule */ String),

    /// A plugin referenced a hook that was never created.
    #[error("Unknown hook '{0}'")]
    UnknownHook(String),

    /// A user plugin failed; aborts the whole pipeline.
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// The same (stage, request) pair was reached twice within one call.
    #[error("Recursion in resolving")]
    Recursion,
}

impl ResolveError {
    #[must_use]
    pub const fn is_ignore(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    #[must_use]
    pub fn from_serde_json_error(path: PathBuf, error: &serde_json::Error) -> Self {
        Self::Json(JSONError {
            path,
            message: error.to_string(),
            line: error.line(),
            column: error.column(),
        })
    }
}

/// Error for [ResolveError::Specifier].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SpecifierError {
    #[error("The request must be a non-empty string. Received \"{0}\"")]
    Empty(String),
}

/// JSON error from [serde_json::Error].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct JSONError {
    pub path: PathBuf,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Cloneable [io::Error] wrapper; equality is by [io::ErrorKind].
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct IOError(Arc<io::Error>);

impl PartialEq for IOError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl IOError {
    #[must_use]
    pub fn kind(&self) -> io::ErrorKind {
        self.0.kind()
    }
}

impl From<io::Error> for IOError {
    fn from(err: io::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl From<IOError> for io::Error {
    fn from(error: IOError) -> Self {
        let inner = error.0.as_ref();
        Self::new(inner.kind(), inner.to_string())
    }
}

impl From<io::Error> for ResolveError {
    fn from(err: io::Error) -> Self {
        Self::IOError(IOError::from(err))
    }
}
