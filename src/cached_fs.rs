//! Time-bounded memoization of filesystem probes.

use std::{
    hash::BuildHasherDefault,
    io,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use dashmap::{mapref::entry::Entry, DashMap};
use rustc_hash::FxHasher;

use crate::{
    error::IOError,
    file_system::{FileMetadata, FileSystem},
};

type ProbeMap<T> = DashMap<PathBuf, TimedEntry<T>, BuildHasherDefault<FxHasher>>;

#[derive(Debug, Clone)]
struct TimedEntry<T> {
    at: Instant,
    result: Result<T, IOError>,
}

impl<T: Clone> TimedEntry<T> {
    fn new(result: io::Result<T>) -> Self {
        Self { at: Instant::now(), result: result.map_err(IOError::from) }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.at.elapsed() >= ttl
    }

    fn value(&self) -> io::Result<T> {
        self.result.clone().map_err(io::Error::from)
    }
}

/// Wraps a [FileSystem], memoizing every probe for a wall-clock window.
///
/// Within the window repeated probes of the same path return identical
/// results without touching the underlying filesystem; errors are cached the
/// same way as successes. After the window, the next access re-probes. The
/// cache never observes filesystem changes on its own: callers that need
/// strict invalidation use [CachedFs::purge] or [CachedFs::purge_paths].
///
/// Concurrent identical probes collapse into one underlying call: the entry
/// lock is held while the probe runs, so at most one is in flight per key.
pub struct CachedFs<Fs> {
    fs: Fs,
    ttl: Duration,
    metadata: ProbeMap<FileMetadata>,
    symlink_metadata: ProbeMap<FileMetadata>,
    read_link: ProbeMap<PathBuf>,
    read_dir: ProbeMap<Vec<String>>,
    files: ProbeMap<String>,
}

impl<Fs: FileSystem> CachedFs<Fs> {
    /// The window used by [Default] constructions of the resolver.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(4);

    pub fn new(fs: Fs, ttl: Duration) -> Self {
        Self {
            fs,
            ttl,
            metadata: ProbeMap::default(),
            symlink_metadata: ProbeMap::default(),
            read_link: ProbeMap::default(),
            read_dir: ProbeMap::default(),
            files: ProbeMap::default(),
        }
    }

    /// The wrapped filesystem.
    pub fn inner(&self) -> &Fs {
        &self.fs
    }

    /// Drop every cached probe.
    pub fn purge(&self) {
        self.metadata.clear();
        self.symlink_metadata.clear();
        self.read_link.clear();
        self.read_dir.clear();
        self.files.clear();
    }

    /// Drop cached probes for the given paths and all of their ancestors.
    pub fn purge_paths<P: AsRef<Path>>(&self, paths: &[P]) {
        for path in paths {
            for ancestor in path.as_ref().ancestors() {
                self.metadata.remove(ancestor);
                self.symlink_metadata.remove(ancestor);
                self.read_link.remove(ancestor);
                self.read_dir.remove(ancestor);
                self.files.remove(ancestor);
            }
        }
    }

    fn cached<T: Clone>(
        &self,
        map: &ProbeMap<T>,
        path: &Path,
        probe: impl FnOnce(&Fs, &Path) -> io::Result<T>,
    ) -> io::Result<T> {
        match map.entry(path.to_path_buf()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().expired(self.ttl) {
                    occupied.insert(TimedEntry::new(probe(&self.fs, path)));
                }
                occupied.get().value()
            }
            Entry::Vacant(vacant) => {
                let entry = TimedEntry::new(probe(&self.fs, path));
                let result = entry.value();
                vacant.insert(entry);
                result
            }
        }
    }
}

impl<Fs: FileSystem> FileSystem for CachedFs<Fs> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.cached(&self.files, path, |fs, path| fs.read_to_string(path))
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        self.cached(&self.metadata, path, |fs, path| fs.metadata(path))
    }

    fn symlink_metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        self.cached(&self.symlink_metadata, path, |fs, path| fs.symlink_metadata(path))
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.cached(&self.read_link, path, |fs, path| fs.read_link(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        self.cached(&self.read_dir, path, |fs, path| fs.read_dir(path))
    }
}
