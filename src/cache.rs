//! Path interning and resolver-lifetime memoization.
//!
//! Metadata probes are deliberately *not* memoized here: they go through the
//! TTL-bounded [CachedFs] on every query. What this layer pins for the
//! resolver's lifetime is path identity, parsed descriptors and symlink
//! canonicalization; [Cache::clear] drops all of it.

use std::{
    borrow::Borrow,
    hash::{BuildHasherDefault, Hash, Hasher},
    io,
    ops::Deref,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashSet;
use once_cell::sync::OnceCell;
use rustc_hash::FxHasher;

use crate::{
    cached_fs::CachedFs,
    context::Ctx,
    file_system::{FileMetadata, FileSystem},
    package_json::PackageJson,
    path::PathExt,
    ResolveError, ResolveOptions,
};

static THREAD_COUNT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = THREAD_COUNT.fetch_add(1, Ordering::SeqCst);
}

pub struct Cache<Fs> {
    pub(crate) fs: CachedFs<Fs>,
    paths: DashSet<CachedPath, BuildHasherDefault<IdentityHasher>>,
}

impl<Fs: FileSystem> Cache<Fs> {
    pub fn new(fs: Fs, ttl: Duration) -> Self {
        Self { fs: CachedFs::new(fs, ttl), paths: DashSet::default() }
    }

    /// Drop interned paths with their memoized descriptors and purge the
    /// probe cache.
    pub fn clear(&self) {
        self.paths.clear();
        self.fs.purge();
    }

    /// Intern a path, linking it to its interned parent chain.
    pub fn value(&self, path: &Path) -> CachedPath {
        let hash = {
            let mut hasher = FxHasher::default();
            path.as_os_str().hash(&mut hasher);
            hasher.finish()
        };
        if let Some(entry) = self.paths.get((hash, path).borrow() as &dyn CacheKey) {
            return entry.clone();
        }
        let parent = path.parent().map(|p| self.value(p));
        let entry = CachedPath(Arc::new(CachedPathImpl::new(
            hash,
            path.to_path_buf().into_boxed_path(),
            parent,
        )));
        self.paths.insert(entry.clone());
        entry
    }

    /// Resolve every symlinked segment of `path`.
    pub fn canonicalize(&self, path: &CachedPath) -> Result<PathBuf, ResolveError> {
        self.canonicalize_impl(path).map(|p| p.to_path_buf())
    }

    fn canonicalize_impl(&self, path: &CachedPath) -> Result<CachedPath, ResolveError> {
        // A thread re-entering the same entry while initializing it has
        // followed a symlink back onto itself. A *different* thread simply
        // blocks on the OnceCell and receives the finished result.
        let tid = THREAD_ID.with(|t| *t);
        if path.canonicalizing.load(Ordering::Acquire) == tid {
            return Err(io::Error::new(io::ErrorKind::NotFound, "Circular symlink").into());
        }
        path.canonicalized
            .get_or_init(|| {
                path.canonicalizing.store(tid, Ordering::Release);
                let result = path.parent().map_or_else(
                    || Ok(path.clone()),
                    |parent| {
                        self.canonicalize_impl(parent).and_then(|canonical_parent| {
                            let normalized = self.value(&canonical_parent.path().normalize_with(
                                path.path().strip_prefix(parent.path()).unwrap(),
                            ));
                            if self.fs.symlink_metadata(path.path()).is_ok_and(|m| m.is_symlink()) {
                                let link = self.fs.read_link(normalized.path())?;
                                if link.is_absolute() {
                                    return self.canonicalize_impl(&self.value(&link.normalize()));
                                }
                                if let Some(dir) = normalized.parent() {
                                    // Relative target, resolved against the
                                    // link's directory.
                                    let target = dir.path().normalize_with(&link);
                                    return self.canonicalize_impl(&self.value(&target));
                                }
                                debug_assert!(false, "symlink at root: {:?}", normalized.path());
                            }
                            Ok(normalized)
                        })
                    },
                );
                path.canonicalizing.store(0, Ordering::Release);
                result
            })
            .clone()
    }
}

#[derive(Clone)]
pub struct CachedPath(Arc<CachedPathImpl>);

pub struct CachedPathImpl {
    hash: u64,
    path: Box<Path>,
    parent: Option<CachedPath>,
    canonicalized: OnceCell<Result<CachedPath, ResolveError>>,
    canonicalizing: AtomicU64,
    node_modules: OnceCell<Option<CachedPath>>,
    package_json: OnceCell<Option<Arc<PackageJson>>>,
}

impl CachedPathImpl {
    fn new(hash: u64, path: Box<Path>, parent: Option<CachedPath>) -> Self {
        Self {
            hash,
            path,
            parent,
            canonicalized: OnceCell::new(),
            canonicalizing: AtomicU64::new(0),
            node_modules: OnceCell::new(),
            package_json: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.path.to_path_buf()
    }

    pub fn parent(&self) -> Option<&CachedPath> {
        self.parent.as_ref()
    }

    fn meta<Fs: FileSystem>(&self, fs: &CachedFs<Fs>) -> Option<FileMetadata> {
        fs.metadata(&self.path).ok()
    }

    pub fn is_file<Fs: FileSystem>(&self, fs: &CachedFs<Fs>, ctx: &mut Ctx) -> bool {
        match self.meta(fs) {
            None => {
                ctx.add_missing_dependency(self.path());
                false
            }
            Some(meta) => {
                ctx.add_file_dependency(self.path());
                meta.is_file()
            }
        }
    }

    pub fn is_dir<Fs: FileSystem>(&self, fs: &CachedFs<Fs>, ctx: &mut Ctx) -> bool {
        self.meta(fs).map_or_else(
            || {
                ctx.add_missing_dependency(self.path());
                false
            },
            |meta| meta.is_dir(),
        )
    }

    pub fn module_directory<Fs: FileSystem>(
        &self,
        module_name: &str,
        cache: &Cache<Fs>,
        ctx: &mut Ctx,
    ) -> Option<CachedPath> {
        let cached_path = cache.value(&self.path.join(module_name));
        cached_path.is_dir(&cache.fs, ctx).then_some(cached_path)
    }

    pub fn cached_node_modules<Fs: FileSystem>(
        &self,
        cache: &Cache<Fs>,
        ctx: &mut Ctx,
    ) -> Option<CachedPath> {
        self.node_modules.get_or_init(|| self.module_directory("node_modules", cache, ctx)).clone()
    }

    /// Find the nearest descriptor file by walking parent directories.
    ///
    /// # Errors
    ///
    /// * [ResolveError::Json]
    pub fn find_package_json<Fs: FileSystem>(
        &self,
        cache: &Cache<Fs>,
        options: &ResolveOptions,
        ctx: &mut Ctx,
    ) -> Result<Option<Arc<PackageJson>>, ResolveError> {
        let mut current = self;
        // Start from the containing directory when the path itself is a file.
        while !current.is_dir(&cache.fs, ctx) {
            if let Some(parent) = &current.parent {
                current = parent.as_ref();
            } else {
                break;
            }
        }
        let mut current = Some(current);
        while let Some(dir) = current {
            if let Some(package_json) = dir.package_json(cache, options, ctx)? {
                return Ok(Some(package_json));
            }
            current = dir.parent.as_deref();
        }
        Ok(None)
    }

    /// The descriptor of this directory, if one exists. The first name in
    /// [ResolveOptions::description_files] that exists here wins.
    ///
    /// # Errors
    ///
    /// * [ResolveError::Json]
    pub fn package_json<Fs: FileSystem>(
        &self,
        cache: &Cache<Fs>,
        options: &ResolveOptions,
        ctx: &mut Ctx,
    ) -> Result<Option<Arc<PackageJson>>, ResolveError> {
        // Change to `std::sync::OnceLock::get_or_try_init` when it is stable.
        let result = self
            .package_json
            .get_or_try_init(|| {
                for file_name in &options.description_files {
                    let descriptor_path = self.path.join(file_name);
                    let Ok(json) = cache.fs.read_to_string(&descriptor_path) else {
                        continue;
                    };
                    let realpath = if options.symlinks {
                        cache
                            .canonicalize(&cache.value(&self.path))
                            .map(|dir| dir.join(file_name))?
                    } else {
                        descriptor_path.clone()
                    };
                    return PackageJson::parse(descriptor_path.clone(), realpath, &json, options)
                        .map(Arc::new)
                        .map(Some)
                        .map_err(|error| {
                            ResolveError::from_serde_json_error(descriptor_path, &error)
                        });
                }
                Ok(None)
            })
            .cloned();
        match &result {
            Ok(Some(package_json)) => {
                ctx.add_file_dependency(&package_json.path);
            }
            Ok(None) => {
                if let Some(deps) = &mut ctx.missing_dependencies {
                    for file_name in &options.description_files {
                        deps.push(self.path.join(file_name));
                    }
                }
            }
            Err(_) => {
                if let Some(deps) = &mut ctx.file_dependencies {
                    for file_name in &options.description_files {
                        deps.push(self.path.join(file_name));
                    }
                }
            }
        }
        result
    }
}

impl Deref for CachedPath {
    type Target = CachedPathImpl;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl AsRef<CachedPathImpl> for CachedPath {
    fn as_ref(&self) -> &CachedPathImpl {
        self.0.as_ref()
    }
}

impl Hash for CachedPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash.hash(state);
    }
}

impl PartialEq for CachedPath {
    fn eq(&self, other: &Self) -> bool {
        self.0.path.as_os_str() == other.0.path.as_os_str()
    }
}

impl Eq for CachedPath {}

/// Pre-hashed lookup key, so interning can probe with a borrowed path.
/// Adapted from <https://stackoverflow.com/a/50478038>.
trait CacheKey {
    fn tuple(&self) -> (u64, &Path);
}

impl Hash for dyn CacheKey + '_ {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tuple().0.hash(state);
    }
}

impl PartialEq for dyn CacheKey + '_ {
    fn eq(&self, other: &Self) -> bool {
        self.tuple().1.as_os_str() == other.tuple().1.as_os_str()
    }
}

impl Eq for dyn CacheKey + '_ {}

impl CacheKey for CachedPath {
    fn tuple(&self) -> (u64, &Path) {
        (self.hash, &self.path)
    }
}

impl<'a> Borrow<dyn CacheKey + 'a> for CachedPath {
    fn borrow(&self) -> &(dyn CacheKey + 'a) {
        self
    }
}

impl CacheKey for (u64, &Path) {
    fn tuple(&self) -> (u64, &Path) {
        (self.0, self.1)
    }
}

impl<'a> Borrow<dyn CacheKey + 'a> for (u64, &'a Path) {
    fn borrow(&self) -> &(dyn CacheKey + 'a) {
        self
    }
}

/// Keys are pre-hashed, so hashing again would only double the work.
#[derive(Default)]
struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn write(&mut self, _: &[u8]) {
        unreachable!("IdentityHasher only accepts u64");
    }

    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
