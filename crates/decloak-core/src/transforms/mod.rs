//! Transform system
//!
//! A transform is a named, tagged rewrite over a [`Module`] that reports how
//! many changes it made. Built-in transforms live in the [`TransformRegistry`]
//! in pipeline order; [`pipeline::Pipeline`] runs them to a fixpoint.

pub mod block_statements;
pub mod computed_properties;
pub mod jsx;
pub mod mangle;
pub mod merge_strings;
pub mod pipeline;
pub mod plugin;
pub mod raw_literals;

use std::collections::HashSet;

use serde::Serialize;
use swc_ecma_ast::Module;

use crate::config::TransformsConfig;
use crate::diagnostic::Diagnostic;
use crate::rename::RenameError;
use crate::semantic::BindingKey;

pub use pipeline::{Halt, Pipeline, PipelineError, PipelineReport};
pub use plugin::{InsertionPoint, Plugin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformTag {
    /// Behavior-preserving and idempotent.
    Safe,
    /// Heuristic; may change output shape.
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformGroup {
    Unminify,
    Deobfuscate,
    Unpack,
}

impl TransformGroup {
    pub fn name(self) -> &'static str {
        match self {
            TransformGroup::Unminify => "unminify",
            TransformGroup::Deobfuscate => "deobfuscate",
            TransformGroup::Unpack => "unpack",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "unminify" => Some(TransformGroup::Unminify),
            "deobfuscate" => Some(TransformGroup::Deobfuscate),
            "unpack" => Some(TransformGroup::Unpack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub group: TransformGroup,
    pub tags: &'static [TransformTag],
}

impl TransformMetadata {
    pub fn is_safe(&self) -> bool {
        self.tags.contains(&TransformTag::Safe)
    }
}

pub trait Transform {
    fn metadata(&self) -> &TransformMetadata;
    fn run(&self, module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Stops the pipeline.
    Fatal,
    /// Becomes a diagnostic; the pipeline moves on to the next transform.
    Recoverable,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Rename(#[from] RenameError),
    #[error("{message}: {preview}")]
    UnexpectedShape { message: String, preview: String },
    #[error("{0}")]
    Unsupported(String),
}

impl TransformError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            TransformError::Rename(RenameError::UnexpectedSite { .. } | RenameError::StaleGraph) => {
                ErrorSeverity::Fatal
            }
            TransformError::Rename(_) => ErrorSeverity::Recoverable,
            TransformError::UnexpectedShape { .. } => ErrorSeverity::Fatal,
            TransformError::Unsupported(_) => ErrorSeverity::Recoverable,
        }
    }
}

const MAX_NESTING: u32 = 8;

/// Per-run state handed to every transform.
#[derive(Debug, Default)]
pub struct TransformContext {
    target: Option<BindingKey>,
    diagnostics: Vec<Diagnostic>,
    depth: u32,
    current: &'static str,
}

impl TransformContext {
    pub fn new(target: Option<BindingKey>) -> Self {
        Self {
            target,
            ..Self::default()
        }
    }

    /// The binding a binding-keyed transform operates on.
    pub fn target(&self) -> Option<&BindingKey> {
        self.target.as_ref()
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub(crate) fn set_current(&mut self, name: &'static str) {
        self.current = name;
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::info(self.current, message));
    }

    pub fn warn(&mut self, message: impl Into<String>, preview: Option<String>) {
        let mut diagnostic = Diagnostic::warning(self.current, message);
        diagnostic.preview = preview;
        self.report(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Runs `pipeline` over a sub-tree with its own change counter. The
    /// nested run's diagnostics are also recorded here.
    pub fn run_nested(
        &mut self,
        pipeline: &Pipeline,
        module: &mut Module,
        target: Option<BindingKey>,
    ) -> PipelineReport {
        if self.depth >= MAX_NESTING {
            self.warn("nested pipeline depth limit reached", None);
            return PipelineReport::default();
        }
        let mut child = TransformContext {
            target,
            diagnostics: Vec::new(),
            depth: self.depth + 1,
            current: self.current,
        };
        let mut report = pipeline.run_with_context(module, &mut child);
        report.diagnostics = child.diagnostics;
        self.diagnostics.extend(report.diagnostics.iter().cloned());
        report
    }
}

/// Ordered set of built-in transforms.
pub struct TransformRegistry {
    transforms: Vec<Box<dyn Transform>>,
    disabled: HashSet<String>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            disabled: HashSet::new(),
        }
    }

    pub fn register(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn configure(&mut self, config: &TransformsConfig) {
        for name in &config.disabled {
            self.disable(name);
        }
    }

    /// Disables a transform by name, or every member of a group.
    pub fn disable(&mut self, name: &str) {
        match TransformGroup::from_name(name) {
            Some(group) => {
                let members: Vec<&'static str> = self
                    .transforms
                    .iter()
                    .filter(|t| t.metadata().group == group)
                    .map(|t| t.metadata().name)
                    .collect();
                self.disabled.extend(members.into_iter().map(String::from));
            }
            None => {
                self.disabled.insert(name.to_string());
            }
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).is_some() && !self.disabled.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Transform> {
        self.transforms
            .iter()
            .find(|t| t.metadata().name == name)
            .map(|t| t.as_ref())
    }

    pub fn transforms(&self) -> impl Iterator<Item = &dyn Transform> {
        self.transforms.iter().map(|t| t.as_ref())
    }

    /// Splits into the enabled transforms, in order, and the metadata of all
    /// registered ones.
    pub(crate) fn into_parts(self) -> (Vec<Box<dyn Transform>>, Vec<TransformMetadata>) {
        let all = self.transforms.iter().map(|t| t.metadata().clone()).collect();
        let disabled = self.disabled;
        let enabled = self
            .transforms
            .into_iter()
            .filter(|t| !disabled.contains(t.metadata().name))
            .collect();
        (enabled, all)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in transforms in pipeline order.
pub fn default_registry() -> TransformRegistry {
    use crate::deobfuscator::{
        ControlFlowObject, ControlFlowSwitch, ObjectLiterals, SelfDefending, StringArray,
    };

    let mut registry = TransformRegistry::new();
    registry.register(Box::new(block_statements::BlockStatements::new()));
    registry.register(Box::new(raw_literals::RawLiterals::new()));
    registry.register(Box::new(SelfDefending::new()));
    registry.register(Box::new(ObjectLiterals::new()));
    registry.register(Box::new(StringArray::new()));
    registry.register(Box::new(merge_strings::MergeStrings::new()));
    registry.register(Box::new(computed_properties::ComputedProperties::new()));
    registry.register(Box::new(ControlFlowObject::new()));
    registry.register(Box::new(ControlFlowSwitch::new()));
    registry.register(Box::new(jsx::Jsx::new()));
    registry
}

#[macro_export]
macro_rules! declare_transform {
    (
        $name:ident,
        name = $transform_name:literal,
        description = $desc:literal,
        group = $group:ident,
        tags = [$($tag:ident),+ $(,)?]
    ) => {
        pub struct $name {
            metadata: $crate::transforms::TransformMetadata,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    metadata: $crate::transforms::TransformMetadata {
                        name: $transform_name,
                        description: $desc,
                        group: $crate::transforms::TransformGroup::$group,
                        tags: &[$($crate::transforms::TransformTag::$tag),+],
                    },
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    struct CountingTransform {
        metadata: TransformMetadata,
        result: fn() -> Result<usize, TransformError>,
    }

    impl CountingTransform {
        fn new(name: &'static str, group: TransformGroup) -> Self {
            Self {
                metadata: TransformMetadata {
                    name,
                    description: "test transform",
                    group,
                    tags: &[TransformTag::Safe],
                },
                result: || Ok(0),
            }
        }
    }

    impl Transform for CountingTransform {
        fn metadata(&self) -> &TransformMetadata {
            &self.metadata
        }

        fn run(&self, _module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
            (self.result)()
        }
    }

    #[test]
    fn default_registry_order() {
        let registry = default_registry();
        let names: Vec<&str> = registry.transforms().map(|t| t.metadata().name).collect();
        assert_eq!(
            names,
            vec![
                "block-statements",
                "raw-literals",
                "self-defending",
                "object-literals",
                "string-array",
                "merge-strings",
                "computed-properties",
                "control-flow-object",
                "control-flow-switch",
                "jsx",
            ]
        );
    }

    #[test]
    fn disabling_a_group_disables_its_members() {
        let mut registry = TransformRegistry::new();
        registry.register(Box::new(CountingTransform::new("a", TransformGroup::Unminify)));
        registry.register(Box::new(CountingTransform::new("b", TransformGroup::Deobfuscate)));
        registry.register(Box::new(CountingTransform::new("c", TransformGroup::Deobfuscate)));

        registry.disable("deobfuscate");

        assert!(registry.is_enabled("a"));
        assert!(!registry.is_enabled("b"));
        assert!(!registry.is_enabled("c"));
        assert!(registry.contains("c"));
        let (enabled, all) = registry.into_parts();
        assert_eq!(enabled.len(), 1);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn configure_reads_disabled_names() {
        let mut registry = default_registry();
        registry.configure(&TransformsConfig {
            disabled: vec!["jsx".to_string()],
        });
        assert!(!registry.is_enabled("jsx"));
        assert!(registry.is_enabled("string-array"));
    }

    #[test]
    fn error_severity_policy() {
        assert_eq!(
            TransformError::from(RenameError::StaleGraph).severity(),
            ErrorSeverity::Fatal
        );
        assert_eq!(
            TransformError::from(RenameError::Collision { name: "a".into() }).severity(),
            ErrorSeverity::Recoverable
        );
        assert_eq!(
            TransformError::Unsupported("x".into()).severity(),
            ErrorSeverity::Recoverable
        );
    }

    #[test]
    fn safe_tag_is_reported() {
        let transform = CountingTransform::new("a", TransformGroup::Unminify);
        assert!(transform.metadata().is_safe());
        let mut module = parse("a;").unwrap().module;
        let mut ctx = TransformContext::new(None);
        assert_eq!(transform.run(&mut module, &mut ctx).unwrap(), 0);
    }
}
