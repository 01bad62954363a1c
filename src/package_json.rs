//! Package descriptor model.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JSONValue;

use crate::{path::PathExt, ResolveError, ResolveOptions};

/// Ordered map type of the exports/imports trees. `serde_json` is built with
/// `preserve_order`, so iteration follows the descriptor's declared key
/// order.
pub type ImportsExportsMap = serde_json::Map<String, JSONValue>;

/// Borrowed, tagged view of one exports/imports value.
#[derive(Debug, Clone, Copy)]
pub enum ImportsExportsEntry<'a> {
    String(&'a str),
    Array(&'a Vec<JSONValue>),
    Map(&'a ImportsExportsMap),
    /// `null`: the subpath is explicitly blocked.
    Null,
}

impl<'a> ImportsExportsEntry<'a> {
    /// Booleans and numbers have no meaning in these trees and are treated
    /// as absent.
    pub(crate) fn from_value(value: &'a JSONValue) -> Option<Self> {
        match value {
            JSONValue::String(s) => Some(Self::String(s)),
            JSONValue::Array(a) => Some(Self::Array(a)),
            JSONValue::Object(o) => Some(Self::Map(o)),
            JSONValue::Null => Some(Self::Null),
            JSONValue::Bool(_) | JSONValue::Number(_) => None,
        }
    }
}

/// One normalized alias-field table (e.g. the `browser` field).
///
/// Relative keys are rewritten to absolute candidate paths at parse time so
/// lookups during resolution are a single map probe.
#[derive(Debug, Default)]
pub(crate) struct AliasTable(IndexMap<String, JSONValue>);

impl AliasTable {
    fn get(&self, key: &str) -> Option<&JSONValue> {
        self.0.get(key)
    }
}

/// The fields read eagerly at parse time; everything else stays in the raw
/// value.
#[derive(Debug, Default, Deserialize)]
struct DescriptorFields {
    name: Option<String>,
}

/// A parsed descriptor file.
#[derive(Debug, Default)]
pub struct PackageJson {
    /// Path to the descriptor file itself.
    pub path: PathBuf,

    /// Realpath to the descriptor file, when symlink resolution is enabled.
    pub realpath: PathBuf,

    raw: Arc<JSONValue>,

    /// The package name; with `exports` it enables self-references.
    ///
    /// <https://nodejs.org/api/packages.html#name>
    pub name: Option<String>,

    alias_tables: Vec<AliasTable>,
}

impl PackageJson {
    /// Parse descriptor JSON, tolerating comments.
    ///
    /// # Errors
    ///
    /// * [serde_json::Error] when the stripped source is still invalid JSON.
    pub(crate) fn parse(
        path: PathBuf,
        realpath: PathBuf,
        json: &str,
        options: &ResolveOptions,
    ) -> Result<Self, serde_json::Error> {
        let mut json = json.to_string();
        _ = json_strip_comments::strip(&mut json);
        let raw: JSONValue = serde_json::from_str(&json)?;

        let mut package_json = Self::default();
        package_json.name = DescriptorFields::deserialize(&raw).unwrap_or_default().name;
        if let Some(object) = raw.as_object() {
            let dir = path.parent().unwrap();
            package_json.alias_tables.reserve_exact(options.alias_fields.len());
            for field_path in &options.alias_fields {
                let Some(field_value) = get_value_by_path(object, field_path) else {
                    continue;
                };
                // Only an object value is a usable alias table.
                let Ok(map) =
                    serde_json::from_value::<IndexMap<String, JSONValue>>(field_value.clone())
                else {
                    continue;
                };
                let mut table = AliasTable::default();
                for (key, value) in map {
                    if key.starts_with('.') {
                        let absolute = dir.normalize_with(&key);
                        table.0.insert(absolute.to_string_lossy().into_owned(), value);
                    } else {
                        if Path::new(&key).extension().is_some() {
                            let absolute = dir.normalize_with(&key);
                            table.0.insert(absolute.to_string_lossy().into_owned(), value.clone());
                        }
                        table.0.insert(key, value);
                    }
                }
                package_json.alias_tables.push(table);
            }
        }

        package_json.path = path;
        package_json.realpath = realpath;
        package_json.raw = Arc::new(raw);
        Ok(package_json)
    }

    /// Directory containing the descriptor file.
    ///
    /// # Panics
    ///
    /// * When constructed from a path without a parent, which `parse` never
    ///   does.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.realpath.parent().unwrap()
    }

    /// The raw parsed JSON, for consumers that need fields this crate does
    /// not model.
    #[must_use]
    pub fn raw(&self) -> &JSONValue {
        &self.raw
    }

    /// Entry-point fields in caller-provided priority order, skipping absent
    /// and non-string values.
    ///
    /// <https://nodejs.org/api/packages.html#main>
    pub(crate) fn main_fields<'a>(
        &'a self,
        main_fields: &'a [String],
    ) -> impl Iterator<Item = &'a str> + 'a {
        main_fields
            .iter()
            .filter_map(|field| self.raw.get(field))
            .filter_map(JSONValue::as_str)
            .filter(|value| !value.is_empty())
    }

    /// The exports trees named by `exports_fields`, in order.
    ///
    /// <https://nodejs.org/api/packages.html#exports>
    pub(crate) fn exports_fields<'a>(
        &'a self,
        exports_fields: &'a [Vec<String>],
    ) -> impl Iterator<Item = ImportsExportsEntry<'a>> + 'a {
        exports_fields
            .iter()
            .filter_map(|field_path| {
                self.raw.as_object().and_then(|object| get_value_by_path(object, field_path))
            })
            .filter_map(ImportsExportsEntry::from_value)
    }

    /// The imports maps named by `imports_fields`, in order. Only object
    /// values are meaningful.
    ///
    /// <https://nodejs.org/api/packages.html#subpath-imports>
    pub(crate) fn imports_fields<'a>(
        &'a self,
        imports_fields: &'a [Vec<String>],
    ) -> impl Iterator<Item = &'a ImportsExportsMap> + 'a {
        imports_fields
            .iter()
            .filter_map(|field_path| {
                self.raw.as_object().and_then(|object| get_value_by_path(object, field_path))
            })
            .filter_map(JSONValue::as_object)
    }

    /// Look up `path`/`request` in the normalized alias tables.
    ///
    /// Returns the replacement request, `None` when no table matches, or
    /// [ResolveError::Ignored] for a `false` value.
    pub(crate) fn resolve_alias_field(
        &self,
        path: &Path,
        request: Option<&str>,
    ) -> Result<Option<&str>, ResolveError> {
        if self.alias_tables.is_empty() {
            return Ok(None);
        }
        let key = request.map_or_else(|| path.to_string_lossy().into_owned(), ToString::to_string);
        for table in &self.alias_tables {
            if let Some(value) = table.get(&key) {
                return match value {
                    JSONValue::String(value) => Ok(Some(value.as_str())),
                    JSONValue::Bool(false) => Err(ResolveError::Ignored(path.to_path_buf())),
                    _ => Ok(None),
                };
            }
        }
        Ok(None)
    }
}

fn get_value_by_path<'a>(
    object: &'a serde_json::Map<String, JSONValue>,
    field_path: &[String],
) -> Option<&'a JSONValue> {
    let (first, rest) = field_path.split_first()?;
    let mut value = object.get(first)?;
    for key in rest {
        value = value.as_object()?.get(key)?;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::PackageJson;
    use crate::{ResolveError, ResolveOptions};

    fn parse(json: &str, options: &ResolveOptions) -> PackageJson {
        PackageJson::parse(
            PathBuf::from("/pkg/package.json"),
            PathBuf::from("/pkg/package.json"),
            json,
            options,
        )
        .unwrap()
    }

    #[test]
    fn name_and_main_fields() {
        let options = ResolveOptions::default();
        let package_json =
            parse(r#"{ "name": "pkg", "main": "./lib/index.js", "module": "" }"#, &options);
        assert_eq!(package_json.name.as_deref(), Some("pkg"));
        assert_eq!(package_json.directory(), Path::new("/pkg"));
        let main_fields = ["module".to_string(), "main".to_string()];
        let fields: Vec<&str> = package_json.main_fields(&main_fields).collect();
        // empty values are skipped
        assert_eq!(fields, vec!["./lib/index.js"]);
    }

    #[test]
    fn comments_are_tolerated() {
        let options = ResolveOptions::default();
        let package_json = parse("{ /* entry */ \"main\": \"a.js\" // eol\n }", &options);
        assert_eq!(package_json.main_fields(&["main".to_string()]).next(), Some("a.js"));
    }

    #[test]
    fn alias_table_normalizes_relative_keys() {
        let options = ResolveOptions {
            alias_fields: vec![vec!["browser".to_string()]],
            ..ResolveOptions::default()
        };
        let package_json = parse(
            r#"{ "browser": { "./server.js": "./client.js", "module-a": "./shim.js", "fs": false } }"#,
            &options,
        );
        assert_eq!(
            package_json
                .resolve_alias_field(Path::new("/pkg/server.js"), None)
                .unwrap(),
            Some("./client.js")
        );
        assert_eq!(
            package_json.resolve_alias_field(Path::new("/pkg/x.js"), Some("module-a")).unwrap(),
            Some("./shim.js")
        );
        assert_eq!(
            package_json.resolve_alias_field(Path::new("/pkg/x.js"), Some("fs")),
            Err(ResolveError::Ignored(PathBuf::from("/pkg/x.js")))
        );
        assert_eq!(
            package_json.resolve_alias_field(Path::new("/pkg/x.js"), Some("unknown")).unwrap(),
            None
        );
    }

    #[test]
    fn dotted_field_paths() {
        let options = ResolveOptions {
            exports_fields: vec![vec!["wrapped".to_string(), "exports".to_string()]],
            ..ResolveOptions::default()
        };
        let package_json = parse(r#"{ "wrapped": { "exports": "./index.js" } }"#, &options);
        assert_eq!(package_json.exports_fields(&options.exports_fields).count(), 1);
    }
}
