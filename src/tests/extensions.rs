//! Extension expansion, `enforce_extension` and `fully_specified`.

use std::path::Path;

use super::resolver_with;
use crate::{EnforceExtension, ResolveError, ResolveOptions};

fn files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("/app/foo.js", ""),
        ("/app/foo.json", ""),
        ("/app/bare", ""),
        ("/app/both", ""),
        ("/app/both.js", ""),
    ]
}

#[test]
fn configured_order_is_respected() {
    let options = ResolveOptions {
        extensions: vec![".json".to_string(), ".js".to_string()],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    let resolution = resolver.resolve("/app", "./foo").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/foo.json"));
}

#[test]
fn bare_file_wins_over_extensions_by_default() {
    let resolver = resolver_with(&files(), ResolveOptions::default());
    let resolution = resolver.resolve("/app", "./both").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/both"));
}

#[test]
fn enforce_extension_skips_the_bare_path() {
    let options = ResolveOptions {
        enforce_extension: EnforceExtension::Enabled,
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    // `both` exists bare and with .js; only the extension try is allowed
    let resolution = resolver.resolve("/app", "./both").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/both.js"));
    // a file reachable only bare is no longer a valid terminal
    assert_eq!(
        resolver.resolve("/app", "./bare"),
        Err(ResolveError::NotFound("./bare".to_string()))
    );
}

#[test]
fn enforce_extension_result_always_carries_an_extension() {
    let options = ResolveOptions {
        enforce_extension: EnforceExtension::Enabled,
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options.clone());
    for request in ["./foo", "./both"] {
        let resolution = resolver.resolve("/app", request).unwrap();
        let path = resolution.path().to_string_lossy().into_owned();
        assert!(
            options.extensions.iter().any(|extension| path.ends_with(extension.as_str())),
            "{path}"
        );
    }
}

#[test]
fn empty_extension_entry_enables_enforcement_and_orders_the_bare_try() {
    let options = ResolveOptions {
        extensions: vec![".js".to_string(), String::new()],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    // the bare try now happens after .js, in list order
    let resolution = resolver.resolve("/app", "./both").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/both.js"));
    let resolution = resolver.resolve("/app", "./bare").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/bare"));
}

#[test]
fn fully_specified_disables_extension_expansion() {
    let options = ResolveOptions { fully_specified: true, ..ResolveOptions::default() };
    let resolver = resolver_with(&files(), options);
    assert_eq!(
        resolver.resolve("/app", "./foo"),
        Err(ResolveError::NotFound("./foo".to_string()))
    );
    let resolution = resolver.resolve("/app", "./foo.js").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/foo.js"));
}
