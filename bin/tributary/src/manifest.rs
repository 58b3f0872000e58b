//! Manifest loading.
//!
//! The full manifest pipeline (packaging, hashing, proto registry) lives in
//! the packaging tooling; the engine binary consumes its output: a JSON
//! document listing module descriptors and the path of each compiled WASM
//! binary.

use eyre::{Result, WrapErr};
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tributary_primitives::{ModuleDescriptor, ModuleGraph};

#[derive(Debug, Deserialize)]
pub(crate) struct Manifest {
    modules: Vec<ManifestModule>,
}

#[derive(Debug, Deserialize)]
struct ManifestModule {
    #[serde(flatten)]
    descriptor: ModuleDescriptor,
    /// Path of the compiled WASM binary, relative to the manifest file.
    code: PathBuf,
}

impl Manifest {
    /// Reads and validates a manifest, returning the module graph and the
    /// compiled code of every module.
    pub(crate) fn load(path: &Path) -> Result<(ModuleGraph, HashMap<String, Vec<u8>>)> {
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading manifest {}", path.display()))?;
        let manifest: Manifest =
            serde_json::from_str(&raw).wrap_err("parsing manifest json")?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut codes = HashMap::new();
        let mut descriptors = Vec::with_capacity(manifest.modules.len());
        for module in manifest.modules {
            let code_path = base.join(&module.code);
            let code = std::fs::read(&code_path)
                .wrap_err_with(|| format!("reading module code {}", code_path.display()))?;
            codes.insert(module.descriptor.name.clone(), code);
            descriptors.push(module.descriptor);
        }

        let graph = ModuleGraph::new(descriptors).wrap_err("validating module graph")?;
        Ok((graph, codes))
    }
}
