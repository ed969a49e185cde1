//! decloak: JavaScript deobfuscation and bundle unpacking.
//!
//! [`decloak`] parses the source, runs the transform pipeline to a fixpoint,
//! optionally mangles names and unpacks a recognized bundle, and prints the
//! result.

pub mod config;
pub mod deobfuscator;
pub mod diagnostic;
pub mod factory;
pub mod helpers;
pub mod matcher;
pub mod parser;
pub mod printer;
pub mod rename;
pub mod result;
pub mod rewrite;
pub mod semantic;
pub mod transforms;
pub mod unpack;

#[cfg(test)]
pub(crate) mod test_support;

use tracing::{debug, info};

use crate::config::{Config, ConfigError, TransformsConfig};
use crate::diagnostic::Diagnostic;
use crate::parser::{ParseError, Parser};
use crate::printer::{PrintError, print_module};
use crate::result::SaveError;
use crate::transforms::mangle::Mangle;
use crate::transforms::pipeline::DEFAULT_MAX_PASSES;
use crate::transforms::{
    Pipeline, PipelineError, Plugin, Transform, TransformContext, default_registry,
};

pub use crate::result::DecloakResult;
pub use crate::unpack::{Bundle, BundleKind, ModuleGraph, ModuleId, UnpackedModule};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Print(#[from] PrintError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Save(#[from] SaveError),
}

/// Run configuration.
#[derive(Debug, Clone)]
pub struct Options {
    pub jsx: bool,
    pub unpack: bool,
    pub deobfuscate: bool,
    pub mangle: bool,
    pub max_passes: usize,
    /// Transform or group names to skip.
    pub disabled: Vec<String>,
    pub plugins: Vec<Plugin>,
}

impl Default for Options {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Options {
    fn from(config: &Config) -> Self {
        Self {
            jsx: config.jsx,
            unpack: config.unpack,
            deobfuscate: config.deobfuscate,
            mangle: config.mangle,
            max_passes: config.max_passes,
            disabled: config.transforms.disabled.clone(),
            plugins: Vec::new(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// Deobfuscates `source`, and unpacks it when it is a recognized bundle.
///
/// A transform that halts the pipeline does not fail the call: the result
/// holds the tree as far as it got, and the report names the transform.
pub fn decloak(source: &str, options: &Options) -> Result<DecloakResult, Error> {
    let parsed = Parser::builder().jsx(options.jsx).build().parse(source)?;
    let mut module = parsed.module;
    let mut diagnostics: Vec<Diagnostic> = parsed
        .recovered
        .iter()
        .map(|error| Diagnostic::warning(transforms::pipeline::PARSE, error.to_string()))
        .collect();

    let mut registry = default_registry();
    registry.configure(&TransformsConfig {
        disabled: options.disabled.clone(),
    });
    if !options.jsx {
        registry.disable("jsx");
    }
    if !options.deobfuscate {
        registry.disable("deobfuscate");
    }
    let max_passes = if options.max_passes == 0 {
        DEFAULT_MAX_PASSES
    } else {
        options.max_passes
    };
    let pipeline = Pipeline::with_plugins(registry, &options.plugins)?.max_passes(max_passes);
    let mut report = pipeline.run(&mut module, None);
    info!(
        passes = report.passes,
        changes = report.changes,
        converged = report.converged,
        "pipeline finished"
    );

    diagnostics.extend(report.diagnostics.iter().cloned());

    // Mangling runs once; it has no fixpoint of its own.
    if options.mangle && !report.is_halted() {
        let mangle = Mangle::new();
        let mut ctx = TransformContext::new(None);
        match mangle.run(&mut module, &mut ctx) {
            Ok(changes) => {
                report.changes += changes;
                if changes > 0 {
                    report.per_transform.insert(mangle.metadata().name.to_string(), changes);
                }
            }
            Err(err) => ctx.report(Diagnostic::warning(mangle.metadata().name, err.to_string())),
        }
        diagnostics.extend(ctx.into_diagnostics());
    }

    let bundle = if options.unpack {
        let mut ctx = TransformContext::new(None);
        let bundle = unpack::unpack(&module, &parsed.source_map, &mut ctx)?;
        diagnostics.extend(ctx.into_diagnostics());
        bundle
    } else {
        None
    };
    if let Some(bundle) = &bundle {
        debug!(kind = %bundle.kind, modules = bundle.modules.len(), "unpacked");
    }

    let code = print_module(&module, &parsed.source_map)?;
    Ok(DecloakResult {
        code,
        bundle,
        report,
        diagnostics,
    })
}
