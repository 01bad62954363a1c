/// Module names Node.js ships with, sorted for binary search.
///
/// A request naming one of these (with or without the `node:` scheme) can
/// never resolve to a file; with
/// [`crate::ResolveOptions::builtin_modules`] enabled it is reported as
/// [`crate::ResolveError::Builtin`] instead of walking module directories.
pub const NODEJS_BUILTINS: &[&str] = &[
    "assert",
    "assert/strict",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "diagnostics_channel",
    "dns",
    "dns/promises",
    "domain",
    "events",
    "fs",
    "fs/promises",
    "http",
    "http2",
    "https",
    "inspector",
    "inspector/promises",
    "module",
    "net",
    "os",
    "path",
    "path/posix",
    "path/win32",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "readline/promises",
    "repl",
    "stream",
    "stream/consumers",
    "stream/promises",
    "stream/web",
    "string_decoder",
    "sys",
    "timers",
    "timers/promises",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "util/types",
    "v8",
    "vm",
    "wasi",
    "worker_threads",
    "zlib",
];

pub(crate) fn is_builtin_module(specifier: &str) -> bool {
    specifier.starts_with("node:") || NODEJS_BUILTINS.binary_search(&specifier).is_ok()
}

#[cfg(test)]
mod tests {
    use super::{is_builtin_module, NODEJS_BUILTINS};

    #[test]
    fn list_is_sorted() {
        assert!(NODEJS_BUILTINS.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn lookup() {
        assert!(is_builtin_module("fs"));
        assert!(is_builtin_module("fs/promises"));
        assert!(is_builtin_module("node:anything"));
        assert!(!is_builtin_module("fs-extra"));
        assert!(!is_builtin_module("lodash"));
    }
}
