//! Node class discovery (spec §4.3, §6): "every regular file in a
//! conventional nodes directory whose name does not begin with an
//! underscore is loaded; every class ... that carries a palette category
//! is registered."
//!
//! Node implementations here are trusted, compiled-in Rust (spec §1's
//! non-goal rules out sandboxing arbitrary code, and there is no dynamic
//! loader in scope), so "the source file" is a real file on disk that a
//! [`NodeModule`] impl names itself after, while the constructor it runs
//! is ordinary compiled code — the file's presence/absence on disk is
//! what discovery and hot-reload both key off of: re-reading a file,
//! fetching from a store, or recompiling are all left to the
//! collaborator behind `NodeModule`/`ClassSource` (§9).

use log::debug;
use minicortex_core::prelude::*;
use std::path::Path;

/// One discoverable node implementation: the file it is conventionally
/// associated with (used for both discovery and, if `dynamic`, hot
/// reload), and the class it builds.
pub trait NodeModule: Send + Sync {
    fn file_name(&self) -> &str;
    fn build(&self) -> NodeClass;
}

/// Scans `dir` for regular files not starting with `_` and returns the
/// classes of every registered [`NodeModule`] whose `file_name` is
/// present among them (spec §4.3). Files with no matching module, and
/// modules whose file is absent, are both silently skipped — this models
/// "every other file is imported and scanned for classes carrying a
/// palette-category tag" without a real dynamic importer.
pub fn discover(dir: &Path, modules: &[Box<dyn NodeModule>]) -> Result<Vec<NodeClass>> {
    let mut present = std::collections::HashSet::new();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| MiniCortexError::NotFound(format!("nodes directory {dir:?}: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| MiniCortexError::NotFound(e.to_string()))?;
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('_') {
                present.insert(name.to_string());
            }
        }
    }

    let classes: Vec<NodeClass> = modules
        .iter()
        .filter(|m| present.contains(m.file_name()))
        .map(|m| m.build())
        .collect();
    debug!("discovered {} class(es) in {dir:?}", classes.len());
    Ok(classes)
}

/// Discovers classes and registers every one not already present in
/// `registry` (spec §6's `Rediscover` operation), returning the newly
/// added type names.
pub fn rediscover(registry: &mut Registry, dir: &Path, modules: &[Box<dyn NodeModule>]) -> Result<Vec<TypeName>> {
    let classes = discover(dir, modules)?;
    let mut added = Vec::new();
    for class in classes {
        if registry.class(class.type_name()).is_none() {
            added.push(class.type_name().clone());
            registry.register_class(class);
        }
    }
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoNode;
    impl Node for EchoNode {
        fn process(&mut self, _ctx: &mut NodeContext) -> Result<()> {
            Ok(())
        }
    }

    struct EchoModule;
    impl NodeModule for EchoModule {
        fn file_name(&self) -> &str {
            "echo.rs"
        }
        fn build(&self) -> NodeClass {
            NodeClass::new(
                NodeSchema {
                    type_name: "echo".into(),
                    category: PaletteCategory::Utilities,
                    descriptors: vec![],
                    dynamic: false,
                    source_file: Some("echo.rs".into()),
                },
                std::sync::Arc::new(|| Box::new(EchoNode) as Box<dyn Node>),
            )
        }
    }

    struct HiddenModule;
    impl NodeModule for HiddenModule {
        fn file_name(&self) -> &str {
            "_helpers.rs"
        }
        fn build(&self) -> NodeClass {
            NodeClass::new(
                NodeSchema {
                    type_name: "hidden".into(),
                    category: PaletteCategory::Utilities,
                    descriptors: vec![],
                    dynamic: false,
                    source_file: None,
                },
                std::sync::Arc::new(|| Box::new(EchoNode) as Box<dyn Node>),
            )
        }
    }

    #[test]
    fn discovers_named_files_and_skips_underscore_prefixed() {
        let dir = std::env::temp_dir().join(format!("minicortex-nodes-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("echo.rs"), "").unwrap();
        std::fs::write(dir.join("_helpers.rs"), "").unwrap();

        let modules: Vec<Box<dyn NodeModule>> = vec![Box::new(EchoModule), Box::new(HiddenModule)];
        let found = discover(&dir, &modules).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].type_name(), &TypeName::from("echo"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rediscover_skips_already_registered_classes() {
        let dir = std::env::temp_dir().join(format!("minicortex-nodes-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("echo.rs"), "").unwrap();

        let modules: Vec<Box<dyn NodeModule>> = vec![Box::new(EchoModule)];
        let mut reg = Registry::new();
        let added = rediscover(&mut reg, &dir, &modules).unwrap();
        assert_eq!(added, vec![TypeName::from("echo")]);
        let added_again = rediscover(&mut reg, &dir, &modules).unwrap();
        assert!(added_again.is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
