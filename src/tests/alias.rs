//! Alias and fallback tables.

use std::path::{Path, PathBuf};

use super::resolver_with;
use crate::{AliasValue, ResolveError, ResolveOptions};

fn files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("/a/index.js", ""),
        ("/a/dir/index.js", ""),
        ("/b/index.js", ""),
        ("/c/world.js", ""),
        ("/proj/src/main.js", ""),
        ("/proj/node_modules/mod/index.js", ""),
    ]
}

fn options(alias: Vec<(&'static str, Vec<AliasValue>)>) -> ResolveOptions {
    ResolveOptions {
        alias: alias.into_iter().map(|(key, value)| (key.to_string(), value)).collect(),
        ..ResolveOptions::default()
    }
}

#[test]
fn prefix_alias_rewrites_the_leading_segment() {
    let resolver = resolver_with(
        &files(),
        options(vec![("hello", vec![AliasValue::from("/a")])]),
    );
    let resolution = resolver.resolve("/proj/src", "hello").unwrap();
    assert_eq!(resolution.path(), Path::new("/a/index.js"));
    let resolution = resolver.resolve("/proj/src", "hello/dir").unwrap();
    assert_eq!(resolution.path(), Path::new("/a/dir/index.js"));
}

#[test]
fn exact_alias_only_matches_whole_request() {
    let resolver = resolver_with(
        &files(),
        options(vec![("only$", vec![AliasValue::from("/b")])]),
    );
    let resolution = resolver.resolve("/proj/src", "only").unwrap();
    assert_eq!(resolution.path(), Path::new("/b/index.js"));
    assert!(resolver.resolve("/proj/src", "only/dir").is_err());
}

#[test]
fn alias_values_are_tried_in_order() {
    let resolver = resolver_with(
        &files(),
        options(vec![(
            "multi",
            vec![AliasValue::from("/missing"), AliasValue::from("/b")],
        )]),
    );
    let resolution = resolver.resolve("/proj/src", "multi").unwrap();
    assert_eq!(resolution.path(), Path::new("/b/index.js"));
}

#[test]
fn ignored_module_is_a_distinct_outcome() {
    let resolver = resolver_with(
        &files(),
        options(vec![("lib", vec![AliasValue::Ignore])]),
    );
    let err = resolver.resolve("/proj", "lib").unwrap_err();
    assert!(err.is_ignore(), "{err:?}");
    assert_eq!(err, ResolveError::Ignored(PathBuf::from("/proj/lib")));
}

#[test]
fn alias_value_may_carry_query_and_fragment() {
    let resolver = resolver_with(
        &files(),
        options(vec![("styled", vec![AliasValue::from("/c/world?q")])]),
    );
    let resolution = resolver.resolve("/proj/src", "styled").unwrap();
    assert_eq!(resolution.path(), Path::new("/c/world.js"));
    assert_eq!(resolution.query(), Some("?q"));
}

#[test]
fn alias_does_not_shadow_existing_modules_it_does_not_name() {
    let resolver = resolver_with(
        &files(),
        options(vec![("hello", vec![AliasValue::from("/a")])]),
    );
    let resolution = resolver.resolve("/proj/src", "mod").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/mod/index.js"));
}

#[test]
fn fallback_is_consulted_only_after_normal_resolution_fails() {
    let fallback_options = ResolveOptions {
        fallback: vec![
            ("mod".to_string(), vec![AliasValue::from("/b")]),
            ("gone".to_string(), vec![AliasValue::from("/b")]),
        ],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), fallback_options);
    // `mod` resolves normally, the fallback must not be used
    let resolution = resolver.resolve("/proj/src", "mod").unwrap();
    assert_eq!(resolution.path(), Path::new("/proj/node_modules/mod/index.js"));
    // `gone` does not resolve normally, the fallback kicks in
    let resolution = resolver.resolve("/proj/src", "gone").unwrap();
    assert_eq!(resolution.path(), Path::new("/b/index.js"));
}

#[test]
fn aliased_absolute_path() {
    let resolver = resolver_with(
        &files(),
        options(vec![("/a/dir", vec![AliasValue::from("/b")])]),
    );
    let resolution = resolver.resolve("/proj/src", "/a/dir").unwrap();
    assert_eq!(resolution.path(), Path::new("/b/index.js"));
}

#[test]
fn recursive_alias_terminates() {
    let resolver = resolver_with(
        &files(),
        options(vec![("loop", vec![AliasValue::from("loop")])]),
    );
    // the re-entry guard declines the alias, so this is simply not found
    assert!(resolver.resolve("/proj/src", "loop").is_err());
}
