//! Dependency bookkeeping and the attempt trace.

use std::path::{Path, PathBuf};

use super::resolver_with;
use crate::{ResolveContext, ResolveOptions};

#[test]
fn found_files_land_in_file_dependencies() {
    let resolver = resolver_with(
        &[
            ("/proj/src/foo.js", ""),
            ("/proj/package.json", r#"{ "name": "proj" }"#),
        ],
        ResolveOptions::default(),
    );
    let mut context = ResolveContext::default();
    let resolution = resolver.resolve_with_context("/proj/src", "./foo", &mut context).unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.js"));
    assert!(context.file_dependencies.contains(Path::new("/proj/src/foo.js")));
    assert!(context.file_dependencies.contains(Path::new("/proj/package.json")));
}

#[test]
fn probed_misses_land_in_missing_dependencies() {
    let resolver = resolver_with(&[("/proj/src/foo.js", "")], ResolveOptions::default());
    let mut context = ResolveContext::default();
    resolver.resolve_with_context("/proj/src", "./foo", &mut context).unwrap();
    // the extension-less candidate was probed and missed
    assert!(context.missing_dependencies.contains(Path::new("/proj/src/foo")));
    // so was the descriptor walk
    assert!(context.missing_dependencies.contains(Path::new("/proj/src/package.json")));
}

#[test]
fn failed_resolution_keeps_its_probes() {
    let resolver = resolver_with(&[("/proj/src/other.js", "")], ResolveOptions::default());
    let mut context = ResolveContext::default();
    assert!(resolver.resolve_with_context("/proj/src", "./gone", &mut context).is_err());
    let all: Vec<&PathBuf> =
        context.file_dependencies.iter().chain(&context.missing_dependencies).collect();
    assert!(!all.is_empty());
    assert!(context.missing_dependencies.iter().any(|p| p.starts_with("/proj/src")));
}

#[test]
fn failing_resolve_aggregates_an_attempt_trace() {
    let resolver = resolver_with(&[("/proj/src/other.js", "")], ResolveOptions::default());
    let mut context = ResolveContext::default();
    assert!(resolver.resolve_with_context("/proj/src", "./gone", &mut context).is_err());
    assert!(!context.trace.is_empty());
    assert!(context.trace.iter().any(|attempt| attempt.message.contains("doesn't exist")));
    // rows render as human-readable reasons
    let rendered = context.trace.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
    assert!(rendered.contains("/proj/src/gone"));
}

#[test]
fn trace_is_not_collected_for_plain_resolves() {
    let resolver = resolver_with(&[("/proj/src/foo.js", "")], ResolveOptions::default());
    // plain resolve has no sidecar; this simply asserts it succeeds without
    // dependency bookkeeping enabled
    assert!(resolver.resolve("/proj/src", "./foo").is_ok());
}

#[test]
fn context_dependencies_record_directory_results() {
    let resolver = resolver_with(
        &[("/proj/src/dir/index.js", "")],
        ResolveOptions { resolve_to_context: true, ..ResolveOptions::default() },
    );
    let mut context = ResolveContext::default();
    let resolution = resolver.resolve_with_context("/proj/src", "./dir", &mut context).unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/dir"));
    assert!(context.context_dependencies.contains(Path::new("/proj/src/dir")));
}
