use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::PackageJson;

/// The terminal result of a successful resolve: an absolute path plus the
/// preserved `?query` and `#fragment`.
#[derive(Clone)]
pub struct Resolution {
    pub(crate) path: PathBuf,

    /// `?query`, contains the leading `?`.
    pub(crate) query: Option<String>,

    /// `#fragment`, contains the leading `#`.
    pub(crate) fragment: Option<String>,

    /// Descriptor of the package the result lives in.
    pub(crate) package_json: Option<Arc<PackageJson>>,
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("path", &self.path)
            .field("query", &self.query)
            .field("fragment", &self.fragment)
            .field("package_json", &self.package_json.as_ref().map(|p| &p.path))
            .finish()
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.query == other.query && self.fragment == other.fragment
    }
}

impl Eq for Resolution {}

impl Resolution {
    /// The resolved path, without query and fragment.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }

    /// `?query`, including the leading `?`.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// `#fragment`, including the leading `#`.
    #[must_use]
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    #[must_use]
    pub fn package_json(&self) -> Option<&Arc<PackageJson>> {
        self.package_json.as_ref()
    }

    /// The resolved path with query and fragment appended.
    #[must_use]
    pub fn full_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        if let Some(query) = &self.query {
            path.push(query);
        }
        if let Some(fragment) = &self.fragment {
            path.push(fragment);
        }
        PathBuf::from(path)
    }
}
