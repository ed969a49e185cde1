//! The outcome of a run and how it is written to disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::diagnostic::Diagnostic;
use crate::transforms::PipelineReport;
use crate::unpack::Bundle;

pub const OUTPUT_FILENAME: &str = "deobfuscated.js";
pub const MANIFEST_FILENAME: &str = "bundle.json";

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize the bundle manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct DecloakResult {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Bundle>,
    pub report: PipelineReport,
    /// Every diagnostic of the run, in the order it was raised.
    pub diagnostics: Vec<Diagnostic>,
}

impl DecloakResult {
    /// Module path to printed code, for an unpacked bundle.
    pub fn files(&self) -> BTreeMap<&str, &str> {
        self.bundle
            .iter()
            .flat_map(|bundle| &bundle.modules)
            .map(|module| (module.path.as_str(), module.code.as_str()))
            .collect()
    }

    /// Writes `deobfuscated.js` and, for a bundle, each module plus
    /// `bundle.json` below `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), SaveError> {
        write(&dir.join(OUTPUT_FILENAME), self.code.as_bytes())?;

        let Some(bundle) = &self.bundle else {
            return Ok(());
        };
        for module in &bundle.modules {
            write(&confined(dir, &module.path), module.code.as_bytes())?;
        }
        let manifest = serde_json::to_string_pretty(&bundle.manifest())?;
        write(&dir.join(MANIFEST_FILENAME), manifest.as_bytes())?;
        debug!(dir = %dir.display(), modules = bundle.modules.len(), "saved bundle");
        Ok(())
    }
}

/// Joins `relative` onto `dir`, dropping root, prefix and `..` components.
fn confined(dir: &Path, relative: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for component in Path::new(relative).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

fn write(path: &Path, contents: &[u8]) -> Result<(), SaveError> {
    let to_error = |source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(to_error)?;
    }
    fs::write(path, contents).map_err(to_error)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::unpack::{BundleKind, ModuleGraph, ModuleId, UnpackedModule};

    fn result(bundle: Option<Bundle>) -> DecloakResult {
        DecloakResult {
            code: "console.log(1);\n".to_string(),
            bundle,
            report: PipelineReport::default(),
            diagnostics: Vec::new(),
        }
    }

    fn module(id: u64, path: &str) -> UnpackedModule {
        UnpackedModule {
            id: ModuleId::Number(id),
            path: path.to_string(),
            is_entry: id == 0,
            dependencies: BTreeSet::new(),
            dynamic_requires: 0,
            code: format!("// {id}\n"),
        }
    }

    #[test]
    fn saves_code_only() {
        let dir = tempfile::tempdir().unwrap();
        result(None).save(dir.path()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(OUTPUT_FILENAME)).unwrap(),
            "console.log(1);\n"
        );
        assert!(!dir.path().join(MANIFEST_FILENAME).exists());
    }

    #[test]
    fn saves_modules_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = ModuleGraph::new();
        graph.add_dependency(ModuleId::Number(0), ModuleId::Number(1));
        let mut entry = module(0, "index.js");
        entry.dependencies.insert(ModuleId::Number(1));
        let bundle = Bundle {
            kind: BundleKind::Webpack4,
            entry: Some(ModuleId::Number(0)),
            modules: vec![entry, module(1, "lib/1.js")],
            graph,
        };
        let result = result(Some(bundle));
        assert_eq!(
            result.files().into_iter().collect::<Vec<_>>(),
            vec![("index.js", "// 0\n"), ("lib/1.js", "// 1\n")]
        );
        result.save(dir.path()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("index.js")).unwrap(), "// 0\n");
        assert_eq!(fs::read_to_string(dir.path().join("lib/1.js")).unwrap(), "// 1\n");
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(MANIFEST_FILENAME)).unwrap()).unwrap();
        assert_eq!(manifest["kind"], "webpack4");
        assert_eq!(manifest["entry"], 0);
        assert_eq!(manifest["modules"][0]["dependencies"], serde_json::json!([1]));
        assert_eq!(manifest["modules"][1]["path"], "lib/1.js");
    }

    #[test]
    fn paths_stay_inside_the_directory() {
        let dir = Path::new("/out");
        assert_eq!(confined(dir, "../../etc/passwd"), PathBuf::from("/out/etc/passwd"));
        assert_eq!(confined(dir, "/abs/a.js"), PathBuf::from("/out/abs/a.js"));
        assert_eq!(confined(dir, "./a/./b.js"), PathBuf::from("/out/a/b.js"));
    }
}
