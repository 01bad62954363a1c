//! Interpreter for the conditional `exports`/`imports` descriptor sub-language.
//!
//! Mirrors the ESM specification's PACKAGE_EXPORTS_RESOLVE /
//! PACKAGE_IMPORTS_RESOLVE family. Map iteration order is the descriptor's
//! declared key order (serde_json is built with `preserve_order`), which is
//! what makes condition matching well-defined.

use std::{cmp::Ordering, path::Path};

use crate::{
    cache::CachedPath,
    context::Ctx,
    package_json::{ImportsExportsEntry, ImportsExportsMap, PackageJson},
    path::PathExt,
    request::Request,
    FileSystem, ResolveError, ResolveResult, ResolverGeneric,
};

impl<Fs: FileSystem> ResolverGeneric<Fs> {
    /// PACKAGE_EXPORTS_RESOLVE(packageURL, subpath, exports, conditions)
    ///
    /// `subpath` is normalized: `"."` for the main export, `"./sub"`
    /// otherwise.
    pub(crate) fn package_exports_resolve(
        &self,
        package_url: &Path,
        subpath: &str,
        exports: ImportsExportsEntry<'_>,
        conditions: &[String],
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        let descriptor_path = || package_url.join("package.json");
        // An exports object must not mix subpath keys and condition keys.
        if let ImportsExportsEntry::Map(map) = exports {
            let mut has_dotted = false;
            let mut has_conditions = false;
            for key in map.keys() {
                has_dotted = has_dotted || key.starts_with('.');
                has_conditions = has_conditions || !key.starts_with('.');
                if has_dotted && has_conditions {
                    return Err(ResolveError::InvalidPackageConfig(descriptor_path()));
                }
            }
        }
        if subpath == "." {
            // Query and fragment make no sense on the main export.
            if ctx.query.is_some() || ctx.fragment.is_some() {
                let query = ctx.query.clone().unwrap_or_default();
                let fragment = ctx.fragment.clone().unwrap_or_default();
                return Err(ResolveError::PackagePathNotExported(
                    format!(".{query}{fragment}"),
                    descriptor_path(),
                ));
            }
            let main_export = match exports {
                ImportsExportsEntry::Null => None,
                ImportsExportsEntry::String(_) | ImportsExportsEntry::Array(_) => Some(exports),
                ImportsExportsEntry::Map(map) => map.get(".").map_or_else(
                    || {
                        // An object of condition keys only is itself the main
                        // export.
                        if map.keys().any(|key| key.starts_with('.')) {
                            None
                        } else {
                            Some(exports)
                        }
                    },
                    ImportsExportsEntry::from_value,
                ),
            };
            if let Some(main_export) = main_export {
                if let Some(path) = self.package_target_resolve(
                    package_url,
                    ".",
                    main_export,
                    None,
                    /* is_imports */ false,
                    conditions,
                    request,
                    ctx,
                )? {
                    return Ok(Some(path));
                }
            }
        } else if let ImportsExportsEntry::Map(map) = exports {
            if let Some(path) = self.imports_exports_lookup(
                subpath,
                map,
                package_url,
                /* is_imports */ false,
                conditions,
                request,
                ctx,
            )? {
                return Ok(Some(path));
            }
        }
        Err(ResolveError::PackagePathNotExported(subpath.to_string(), descriptor_path()))
    }

    /// PACKAGE_IMPORTS_RESOLVE(specifier, parentURL, conditions)
    pub(crate) fn package_imports_resolve(
        &self,
        specifier: &str,
        package_json: &PackageJson,
        request: &Request,
        ctx: &mut Ctx,
    ) -> Result<CachedPath, ResolveError> {
        debug_assert!(specifier.starts_with('#'), "{specifier}");
        if specifier == "#" || specifier.starts_with("#/") {
            return Err(ResolveError::InvalidModuleSpecifier(
                specifier.to_string(),
                package_json.path.clone(),
            ));
        }
        for imports in package_json.imports_fields(&self.options.imports_fields) {
            if let Some(path) = self.imports_exports_lookup(
                specifier,
                imports,
                package_json.directory(),
                /* is_imports */ true,
                &self.options.condition_names,
                request,
                ctx,
            )? {
                return Ok(path);
            }
        }
        Err(ResolveError::PackageImportNotDefined(
            specifier.to_string(),
            package_json.path.clone(),
        ))
    }

    /// PACKAGE_IMPORTS_EXPORTS_RESOLVE(matchKey, matchObj, packageURL, isImports, conditions)
    fn imports_exports_lookup(
        &self,
        match_key: &str,
        map: &ImportsExportsMap,
        package_url: &Path,
        is_imports: bool,
        conditions: &[String],
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        // Trailing-slash requests cannot address a file through these trees.
        if match_key.ends_with('/') {
            return Ok(None);
        }
        // Exact key wins over any pattern.
        if !match_key.contains('*') {
            if let Some(value) = map.get(match_key) {
                let Some(target) = ImportsExportsEntry::from_value(value) else {
                    return Ok(None);
                };
                return self.package_target_resolve(
                    package_url,
                    match_key,
                    target,
                    None,
                    is_imports,
                    conditions,
                    request,
                    ctx,
                );
            }
        }

        let mut best_key = "";
        let mut best_match = "";
        let mut best_value = None;
        for (key, value) in map {
            let is_subpath_key =
                if is_imports { key.starts_with('#') } else { key.starts_with("./") };
            if !is_subpath_key {
                continue;
            }
            if let Some((base, trailer)) = key.split_once('*') {
                if trailer.contains('*') {
                    continue;
                }
                if match_key.starts_with(base)
                    && (trailer.is_empty()
                        || (match_key.len() >= key.len() && match_key.ends_with(trailer)))
                    && pattern_precedence(best_key, key).is_gt()
                {
                    best_key = key.as_str();
                    best_match = &match_key[base.len()..match_key.len() - trailer.len()];
                    best_value = Some(value);
                }
            } else if key.ends_with('/')
                && match_key.starts_with(key.as_str())
                && pattern_precedence(best_key, key).is_gt()
            {
                // Deprecated folder mapping, still honored.
                best_key = key.as_str();
                best_match = &match_key[key.len()..];
                best_value = Some(value);
            }
        }
        if let Some(value) = best_value {
            let Some(target) = ImportsExportsEntry::from_value(value) else { return Ok(None) };
            return self.package_target_resolve(
                package_url,
                best_key,
                target,
                Some(best_match),
                is_imports,
                conditions,
                request,
                ctx,
            );
        }
        Ok(None)
    }

    /// PACKAGE_TARGET_RESOLVE(packageURL, target, patternMatch, isImports, conditions)
    fn package_target_resolve(
        &self,
        package_url: &Path,
        target_key: &str,
        target: ImportsExportsEntry<'_>,
        pattern_match: Option<&str>,
        is_imports: bool,
        conditions: &[String],
        request: &Request,
        ctx: &mut Ctx,
    ) -> ResolveResult {
        match target {
            ImportsExportsEntry::Null => Err(ResolveError::PackagePathBlocked(
                pattern_match.map_or_else(|| target_key.to_string(), ToString::to_string),
                package_url.join("package.json"),
            )),
            ImportsExportsEntry::String(target) => {
                if !target.starts_with("./") {
                    if !is_imports || target.starts_with("../") || target.starts_with('/') {
                        return Err(ResolveError::InvalidPackageTarget(
                            target.to_string(),
                            target_key.to_string(),
                            package_url.join("package.json"),
                        ));
                    }
                    // An imports target naming a bare module re-enters normal
                    // resolution from the package directory.
                    let target =
                        substitute_target(target_key, target, pattern_match, package_url)?;
                    let package_dir = self.cache.value(package_url);
                    ctx.with_fully_specified(false);
                    let reentry = request.with_request(target.as_str());
                    return match self.require(&package_dir, &target, &reentry, ctx) {
                        Ok(path) => Ok(Some(path)),
                        Err(ResolveError::NotFound(_)) => Ok(None),
                        Err(err) => Err(err),
                    };
                }
                let target = substitute_target(target_key, target, pattern_match, package_url)?;
                if Path::new(target.as_str()).is_invalid_package_target() {
                    return Err(ResolveError::InvalidPackageTarget(
                        target,
                        target_key.to_string(),
                        package_url.join("package.json"),
                    ));
                }
                let resolved = package_url.normalize_with(&target);
                if !resolved.is_inside(package_url) {
                    return Err(ResolveError::InvalidPackageTarget(
                        target,
                        target_key.to_string(),
                        package_url.join("package.json"),
                    ));
                }
                Ok(Some(self.cache.value(&resolved)))
            }
            ImportsExportsEntry::Map(map) => {
                for (index, (key, value)) in map.iter().enumerate() {
                    let is_default = key == "default";
                    if is_default && index < map.len() - 1 {
                        return Err(ResolveError::InvalidPackageConfigDefault(
                            package_url.join("package.json"),
                        ));
                    }
                    if is_default || conditions.iter().any(|condition| condition == key) {
                        let Some(target) = ImportsExportsEntry::from_value(value) else {
                            continue;
                        };
                        if let Some(path) = self.package_target_resolve(
                            package_url,
                            target_key,
                            target,
                            pattern_match,
                            is_imports,
                            conditions,
                            request,
                            ctx,
                        )? {
                            return Ok(Some(path));
                        }
                    }
                }
                Ok(None)
            }
            ImportsExportsEntry::Array(targets) => {
                if targets.is_empty() {
                    return Err(ResolveError::PackagePathNotExported(
                        format!(".{}", pattern_match.unwrap_or(".")),
                        package_url.join("package.json"),
                    ));
                }
                for (index, value) in targets.iter().enumerate() {
                    let Some(target) = ImportsExportsEntry::from_value(value) else {
                        continue;
                    };
                    let resolved = self.package_target_resolve(
                        package_url,
                        target_key,
                        target,
                        pattern_match,
                        is_imports,
                        conditions,
                        request,
                        ctx,
                    );
                    match resolved {
                        Ok(Some(path)) => {
                            // The first target that terminally resolves wins;
                            // a dangling one passes to the next fallback.
                            if index == targets.len() - 1
                                || path.is_file(&self.cache.fs, ctx)
                                || path.is_dir(&self.cache.fs, ctx)
                            {
                                return Ok(Some(path));
                            }
                        }
                        Ok(None) => {}
                        // Fallback entries absorb errors; only the last one
                        // surfaces.
                        Err(err) if index == targets.len() - 1 => return Err(err),
                        Err(_) => {}
                    }
                }
                Ok(None)
            }
        }
    }
}

/// Substitute the captured `*` into a string target.
fn substitute_target(
    target_key: &str,
    target: &str,
    pattern_match: Option<&str>,
    package_url: &Path,
) -> Result<String, ResolveError> {
    let Some(pattern_match) = pattern_match else { return Ok(target.to_string()) };
    if !target_key.contains('*') && !target.contains('*') {
        // Folder mapping: both sides must end with a slash.
        if target_key.ends_with('/') && target.ends_with('/') {
            return Ok(format!("{target}{pattern_match}"));
        }
        return Err(ResolveError::InvalidPackageConfigDirectory(
            package_url.join("package.json"),
        ));
    }
    Ok(target.replace('*', pattern_match))
}

/// PATTERN_KEY_COMPARE. `Greater` means `candidate` beats `current`.
fn pattern_precedence(current: &str, candidate: &str) -> Ordering {
    if current.is_empty() {
        return Ordering::Greater;
    }
    let current_base = current.find('*').map_or(current.len(), |p| p + 1);
    let candidate_base = candidate.find('*').map_or(candidate.len(), |p| p + 1);
    // Longer literal prefix first.
    if current_base != candidate_base {
        return if candidate_base > current_base { Ordering::Greater } else { Ordering::Less };
    }
    // In a tie, a `*` pattern is more specific than a folder mapping.
    if !current.contains('*') {
        return Ordering::Greater;
    }
    if !candidate.contains('*') {
        return Ordering::Less;
    }
    // Then the longer key overall (longer trailer).
    candidate.len().cmp(&current.len())
}
