//! Core request shapes: relative, absolute, bare, directory.

use std::path::Path;

use super::resolver_with;
use crate::{ResolveError, ResolveOptions};

fn base_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("/proj/src/foo.js", ""),
        ("/proj/src/foo.json", ""),
        ("/proj/src/dir/index.js", ""),
        ("/proj/node_modules/lib/package.json", r#"{ "main": "a.js" }"#),
        ("/proj/node_modules/lib/a.js", ""),
        ("/proj/node_modules/lib/sub.js", ""),
        ("/proj/node_modules/@scope/pkg/package.json", r#"{ "main": "./entry.js" }"#),
        ("/proj/node_modules/@scope/pkg/entry.js", ""),
        ("/proj/src/deep/nested/consumer.js", ""),
    ]
}

#[test]
fn relative_request_with_extension() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./foo").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.js"));
}

#[test]
fn relative_request_explicit_extension() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./foo.json").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.json"));
}

#[test]
fn extension_order_prefers_earlier() {
    // foo.js and foo.json both exist; .js is listed first
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./foo").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.js"));
}

#[test]
fn directory_request_uses_index() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./dir").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/dir/index.js"));
    let resolution = resolver.resolve("/proj/src", "./dir/").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/dir/index.js"));
}

#[test]
fn bare_request_resolves_through_main_field() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "lib").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/lib/a.js"));
    assert_eq!(
        resolution.package_json().unwrap().path,
        Path::new("/proj/node_modules/lib/package.json")
    );
}

#[test]
fn bare_request_subpath() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "lib/sub").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/lib/sub.js"));
}

#[test]
fn scoped_package() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "@scope/pkg").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/@scope/pkg/entry.js"));
}

#[test]
fn module_directories_are_walked_upward() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src/deep/nested", "lib").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/lib/a.js"));
}

#[test]
fn absolute_request() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/elsewhere", "/proj/src/foo").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.js"));
}

#[test]
fn missing_module_is_not_found() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    assert_eq!(
        resolver.resolve("/proj/src", "no-such-module"),
        Err(ResolveError::NotFound("no-such-module".to_string()))
    );
    assert_eq!(
        resolver.resolve("/proj/src", "./missing"),
        Err(ResolveError::NotFound("./missing".to_string()))
    );
}

#[test]
fn empty_specifier_is_rejected() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    assert!(matches!(
        resolver.resolve("/proj/src", ""),
        Err(ResolveError::Specifier(_))
    ));
}

#[test]
fn query_and_fragment_are_preserved() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./foo?query=1#frag").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/foo.js"));
    assert_eq!(resolution.query(), Some("?query=1"));
    assert_eq!(resolution.fragment(), Some("#frag"));
    assert_eq!(resolution.full_path(), Path::new("/proj/src/foo.js?query=1#frag"));
}

#[test]
fn resolution_is_deterministic() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let first = resolver.resolve("/proj/src", "lib").unwrap();
    let second = resolver.resolve("/proj/src", "lib").unwrap();
    assert_eq!(first, second);
}

#[test]
fn resolving_a_result_is_idempotent() {
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    let first = resolver.resolve("/proj/src", "./foo").unwrap();
    let again = resolver
        .resolve("/proj/src", first.path().to_str().unwrap())
        .unwrap();
    assert_eq!(first.path(), again.path());
}

#[test]
fn resolve_to_context_returns_the_directory() {
    let resolver = resolver_with(
        &base_files(),
        ResolveOptions { resolve_to_context: true, ..ResolveOptions::default() },
    );
    let resolution = resolver.resolve("/proj/src", "./dir").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/dir"));
}

#[test]
fn builtin_modules_are_reported() {
    let resolver = resolver_with(
        &base_files(),
        ResolveOptions { builtin_modules: true, ..ResolveOptions::default() },
    );
    assert_eq!(
        resolver.resolve("/proj/src", "fs"),
        Err(ResolveError::Builtin("fs".to_string()))
    );
    assert_eq!(
        resolver.resolve("/proj/src", "node:path"),
        Err(ResolveError::Builtin("node:path".to_string()))
    );
    // disabled by default
    let resolver = resolver_with(&base_files(), ResolveOptions::default());
    assert_eq!(resolver.resolve("/proj/src", "fs"), Err(ResolveError::NotFound("fs".to_string())));
}

#[test]
fn self_reference_through_exports() {
    let resolver = resolver_with(
        &[
            (
                "/app/package.json",
                r#"{ "name": "app", "exports": { ".": "./main.js", "./util": "./lib/util.js" } }"#,
            ),
            ("/app/main.js", ""),
            ("/app/lib/util.js", ""),
            ("/app/src/consumer.js", ""),
        ],
        ResolveOptions::default(),
    );
    let resolution = resolver.resolve("/app/src", "app/util").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/lib/util.js"));
    let resolution = resolver.resolve("/app/src", "app").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/main.js"));
}

#[test]
fn hash_in_path_can_be_escaped() {
    let resolver = resolver_with(&[("/proj/src/a#b.js", "")], ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", r"./a\#b").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/a#b.js"));
}

#[test]
fn fragment_is_tried_as_path_first() {
    // `./some#thing` names an actual file containing `#`
    let resolver = resolver_with(&[("/proj/src/some#thing.js", "")], ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./some#thing").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/some#thing.js"));
    assert_eq!(resolution.fragment(), None);

    // plain fragment when no such file exists
    let resolver = resolver_with(&[("/proj/src/some.js", "")], ResolveOptions::default());
    let resolution = resolver.resolve("/proj/src", "./some#thing").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/src/some.js"));
    assert_eq!(resolution.fragment(), Some("#thing"));
}
