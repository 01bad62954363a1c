//! The in-flight resolution record and request-string parsing.

use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;

use crate::{PackageJson, SpecifierError};

/// A request string split into its path, `?query` and `#fragment` parts.
///
/// The first *unescaped* `#` starts the fragment and the first unescaped `?`
/// before it starts the query; a backslash escapes either character. A `#` in
/// first position never starts a fragment, it marks an internal (imports)
/// request. Query and fragment are kept verbatim, escapes in the path part
/// are unescaped.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Specifier<'a> {
    path: Cow<'a, str>,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

impl<'a> Specifier<'a> {
    /// # Errors
    ///
    /// * [SpecifierError::Empty] when the request or its path part is empty.
    pub fn parse(request: &'a str) -> Result<Self, SpecifierError> {
        if request.is_empty() {
            return Err(SpecifierError::Empty(request.to_string()));
        }
        let bytes = request.as_bytes();
        let mut fragment_start = None;
        let mut query_start = None;
        let mut escaped = false;
        let mut has_escape = false;
        for (i, &b) in bytes.iter().enumerate() {
            if escaped {
                escaped = false;
                continue;
            }
            match b {
                b'\\' if matches!(bytes.get(i + 1), Some(b'?' | b'#')) => {
                    escaped = true;
                    has_escape = true;
                }
                b'#' if i > 0 && fragment_start.is_none() => fragment_start = Some(i),
                b'?' if query_start.is_none() && fragment_start.is_none() => {
                    query_start = Some(i);
                }
                _ => {}
            }
        }
        let path_end = query_start.or(fragment_start).unwrap_or(bytes.len());
        if path_end == 0 {
            return Err(SpecifierError::Empty(request.to_string()));
        }
        let path = if has_escape {
            let mut unescaped = String::with_capacity(path_end);
            let mut chars = request[..path_end].chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\\' && matches!(chars.peek(), Some('?' | '#')) {
                    continue;
                }
                unescaped.push(c);
            }
            Cow::Owned(unescaped)
        } else {
            Cow::Borrowed(&request[..path_end])
        };
        let query = query_start.map(|start| &request[start..fragment_start.unwrap_or(bytes.len())]);
        let fragment = fragment_start.map(|start| &request[start..]);
        Ok(Self { path, query, fragment })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Opaque key/value map carried from the caller through the whole call, e.g.
/// the issuer path. Entries participate in the result cache key when
/// [`crate::ResolveOptions::cache_with_context`] is set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RequestContext(IndexMap<String, String>);

impl RequestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Key-order independent string form for cache keys.
    #[must_use]
    pub(crate) fn cache_key(&self) -> String {
        let mut entries: Vec<_> = self.0.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut out = String::new();
        for (k, v) in entries {
            out.push_str(k);
            out.push('\u{1}');
            out.push_str(v);
            out.push('\u{2}');
        }
        out
    }
}

/// Immutable record of in-progress resolution state, copied on modification.
///
/// `path == None` means the lookup base is indeterminate: an alias produced a
/// bare module name and the directory walk has to restart before the record
/// can advance again.
#[derive(Debug, Clone)]
pub struct Request {
    pub path: Option<PathBuf>,
    /// Remaining unresolved suffix; may be empty once `path` points directly
    /// at a candidate.
    pub request: String,
    /// `?query`, kept verbatim including the `?`.
    pub query: Option<String>,
    /// `#fragment`, kept verbatim including the `#`.
    pub fragment: Option<String>,
    /// The request explicitly denotes a directory (trailing slash).
    pub directory: bool,
    /// Still a bare module request: no leading `./`, `../`, `/` or `#`.
    pub module: bool,
    pub description_file_path: Option<PathBuf>,
    pub description_file_root: Option<PathBuf>,
    pub description_file_data: Option<Arc<PackageJson>>,
    /// Relative path from the descriptor root to the current candidate,
    /// normalized with a leading `./`.
    pub relative_path: Option<String>,
    pub context: RequestContext,
}

impl Request {
    #[must_use]
    pub fn new(lookup_path: &Path, specifier: &Specifier<'_>, context: RequestContext) -> Self {
        let path = specifier.path();
        Self {
            path: Some(lookup_path.to_path_buf()),
            request: path.to_string(),
            query: specifier.query.map(ToString::to_string),
            fragment: specifier.fragment.map(ToString::to_string),
            directory: path.ends_with('/'),
            module: is_module_request(path),
            description_file_path: None,
            description_file_root: None,
            description_file_data: None,
            relative_path: None,
            context,
        }
    }

    #[must_use]
    pub fn with_request(&self, request: impl Into<String>) -> Self {
        let request = request.into();
        let directory = request.ends_with('/');
        let module = is_module_request(&request);
        Self { request, directory, module, ..self.clone() }
    }

    #[must_use]
    pub fn with_path(&self, path: Option<PathBuf>) -> Self {
        Self { path, ..self.clone() }
    }

    /// Attach the located descriptor file. All three descriptor fields are
    /// set together and `relative_path` is recomputed from the root.
    #[must_use]
    pub fn with_description_file(
        &self,
        file_path: PathBuf,
        root: PathBuf,
        data: Arc<PackageJson>,
    ) -> Self {
        let relative_path = self.path.as_ref().and_then(|p| p.strip_prefix(&root).ok()).map(|rel| {
            let rel = rel.to_string_lossy();
            if rel.is_empty() {
                "./".to_string()
            } else {
                format!("./{rel}")
            }
        });
        Self {
            description_file_path: Some(file_path),
            description_file_root: Some(root),
            description_file_data: Some(data),
            relative_path,
            ..self.clone()
        }
    }

    /// Human-readable form used for attempt logs and the recursion guard.
    #[must_use]
    pub fn display(&self) -> String {
        let path = self
            .path
            .as_ref()
            .map_or_else(|| "<indeterminate>".to_string(), |p| p.display().to_string());
        let mut out = format!("{path} -> {}", self.request);
        if let Some(query) = &self.query {
            out.push_str(query);
        }
        if let Some(fragment) = &self.fragment {
            out.push_str(fragment);
        }
        out
    }
}

fn is_module_request(request: &str) -> bool {
    !request.is_empty()
        && !request.starts_with('/')
        && !request.starts_with("./")
        && !request.starts_with("../")
        && request != "."
        && request != ".."
        && !request.starts_with('#')
        && !Path::new(request).is_absolute()
}
