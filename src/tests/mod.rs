mod alias;
mod dependencies;
mod extensions;
mod plugins;
mod resolve;

use std::{path::Path, sync::Arc, thread};

use memory_fs::MemoryFS;

use crate::{ResolveOptions, ResolverGeneric};

pub(super) fn resolver_with(
    files: &[(&str, &str)],
    options: ResolveOptions,
) -> ResolverGeneric<MemoryFS> {
    ResolverGeneric::new_with_file_system(MemoryFS::new(files), options)
}

#[test]
fn threaded_environment() {
    let resolver = Arc::new(resolver_with(
        &[("/app/index.js", ""), ("/app/node_modules/dep/index.js", "")],
        ResolveOptions::default(),
    ));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                let specifier = if i % 2 == 0 { "./index" } else { "dep" };
                resolver.resolve("/app", specifier).map(|r| r.path().to_path_buf())
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let path = handle.join().unwrap().unwrap();
        if i % 2 == 0 {
            assert_eq!(path, Path::new("/app/index.js"));
        } else {
            assert_eq!(path, Path::new("/app/node_modules/dep/index.js"));
        }
    }
}
