//! User plugins on the hook registry.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use super::resolver_with;
use crate::{Plugin, PluginAction, Request, ResolveError, ResolveOptions};

struct VirtualModule {
    name: &'static str,
    target: &'static str,
}

impl Plugin for VirtualModule {
    fn name(&self) -> &str {
        "virtual-module"
    }

    fn source(&self) -> &str {
        "normal-resolve"
    }

    fn target(&self) -> Option<&str> {
        Some("resolve")
    }

    fn run(&self, request: &Request) -> Result<PluginAction, ResolveError> {
        if request.request == self.name {
            Ok(PluginAction::Rewrite(request.with_request(self.target)))
        } else {
            Ok(PluginAction::Decline)
        }
    }
}

struct DenyList(&'static str);

impl Plugin for DenyList {
    fn name(&self) -> &str {
        "deny-list"
    }

    fn source(&self) -> &str {
        "module"
    }

    fn run(&self, request: &Request) -> Result<PluginAction, ResolveError> {
        if request.request == self.0 {
            Ok(PluginAction::Ignore)
        } else {
            Ok(PluginAction::Decline)
        }
    }
}

struct Pinned {
    requested: &'static str,
    path: &'static str,
}

impl Plugin for Pinned {
    fn name(&self) -> &str {
        "pinned"
    }

    fn source(&self) -> &str {
        "resolve"
    }

    fn run(&self, request: &Request) -> Result<PluginAction, ResolveError> {
        if request.request == self.requested {
            Ok(PluginAction::Finish(PathBuf::from(self.path)))
        } else {
            Ok(PluginAction::Decline)
        }
    }
}

struct Failing;

impl Plugin for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn source(&self) -> &str {
        "parsed-resolve"
    }

    fn run(&self, _request: &Request) -> Result<PluginAction, ResolveError> {
        Err(ResolveError::Plugin {
            plugin: "failing".to_string(),
            message: "boom".to_string(),
        })
    }
}

struct VetoSecret;

impl Plugin for VetoSecret {
    fn name(&self) -> &str {
        "veto-secret"
    }

    fn source(&self) -> &str {
        "resolved"
    }

    fn run(&self, request: &Request) -> Result<PluginAction, ResolveError> {
        let is_secret = request
            .path
            .as_ref()
            .is_some_and(|path| path.file_name().is_some_and(|name| name == "secret.js"));
        if is_secret {
            Ok(PluginAction::Ignore)
        } else {
            Ok(PluginAction::Decline)
        }
    }
}

fn files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("/app/real.js", ""),
        ("/app/pinned-target.js", ""),
        ("/app/secret.js", ""),
        ("/app/open.js", ""),
    ]
}

#[test]
fn rewrite_reenters_the_pipeline() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(VirtualModule { name: "virtual", target: "./real.js" })],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    let resolution = resolver.resolve("/app", "virtual").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/real.js"));
    // unrelated requests pass through the plugin untouched
    let resolution = resolver.resolve("/app", "./open.js").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/open.js"));
}

#[test]
fn ignore_yields_the_ignored_outcome() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(DenyList("left-pad"))],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    assert!(resolver.resolve("/app", "left-pad").unwrap_err().is_ignore());
}

#[test]
fn finish_short_circuits_resolution() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(Pinned { requested: "pinned", path: "/app/pinned-target.js" })],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    let resolution = resolver.resolve("/app", "pinned").unwrap();
    assert_eq!(resolution.path(), Path::new("/app/pinned-target.js"));
}

#[test]
fn plugin_errors_abort_the_pipeline() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(Failing)],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    assert_eq!(
        resolver.resolve("/app", "./real.js"),
        Err(ResolveError::Plugin { plugin: "failing".to_string(), message: "boom".to_string() })
    );
}

#[test]
fn resolved_hook_can_veto_the_terminal_path() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(VetoSecret)],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    assert!(resolver.resolve("/app", "./secret").unwrap_err().is_ignore());
    assert!(resolver.resolve("/app", "./open").is_ok());
}

#[test]
fn declared_hooks_are_created_on_attach() {
    let options = ResolveOptions {
        plugins: vec![Arc::new(VirtualModule { name: "virtual", target: "./real.js" })],
        ..ResolveOptions::default()
    };
    let resolver = resolver_with(&files(), options);
    assert!(resolver.hooks().get_hook("normal-resolve").is_ok());
    assert_eq!(
        resolver.hooks().get_hook("never-declared"),
        Err(ResolveError::UnknownHook("never-declared".to_string()))
    );
}
