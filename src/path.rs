//! Lexical path helpers.
//!
//! None of these touch the filesystem; symlink handling lives in the cache
//! layer.

use std::path::{Component, Path, PathBuf};

pub const SLASH_START: &[char; 2] = &['/', '\\'];

/// Extension trait adding lexical normalization to [`Path`].
pub trait PathExt {
    /// Collapse `.` and `..` components without performing I/O.
    fn normalize(&self) -> PathBuf;

    /// Resolve `subpath` (which may contain `.` and `..`) against this path,
    /// assuming this path is already normalized.
    fn normalize_with<P: AsRef<Path>>(&self, subpath: P) -> PathBuf;

    /// Whether this path is lexically contained in `root` (or equal to it).
    fn is_inside(&self, root: &Path) -> bool;

    /// Whether an exports/imports target escapes its package once resolved:
    /// any `..` component, a non-leading `.`, or a `node_modules` segment.
    fn is_invalid_package_target(&self) -> bool;
}

impl PathExt for Path {
    fn normalize(&self) -> PathBuf {
        let mut components = self.components().peekable();
        let mut out = if let Some(prefix @ Component::Prefix(..)) = components.peek() {
            let buf = PathBuf::from(prefix.as_os_str());
            components.next();
            buf
        } else {
            PathBuf::new()
        };
        for component in components {
            match component {
                Component::Prefix(..) => unreachable!("prefix after start of {:?}", self),
                Component::RootDir => out.push(component.as_os_str()),
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                Component::Normal(seg) => out.push(seg),
            }
        }
        out
    }

    fn normalize_with<P: AsRef<Path>>(&self, subpath: P) -> PathBuf {
        let subpath = subpath.as_ref();
        let mut components = subpath.components();
        let Some(head) = components.next() else { return subpath.to_path_buf() };
        if matches!(head, Component::Prefix(..) | Component::RootDir) {
            return subpath.to_path_buf();
        }
        let mut out = self.to_path_buf();
        for component in std::iter::once(head).chain(components) {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    out.pop();
                }
                Component::Normal(seg) => out.push(seg),
                Component::Prefix(..) | Component::RootDir => {
                    unreachable!("absolute component in subpath {:?}", subpath)
                }
            }
        }
        out
    }

    fn is_inside(&self, root: &Path) -> bool {
        self.starts_with(root)
    }

    fn is_invalid_package_target(&self) -> bool {
        self.components().enumerate().any(|(index, component)| match component {
            Component::ParentDir => true,
            Component::CurDir => index > 0,
            Component::Normal(seg) => seg.eq_ignore_ascii_case("node_modules"),
            _ => false,
        })
    }
}
