//! Ordered, convergence-driven transform execution.

use std::collections::BTreeMap;

use serde::Serialize;
use swc_ecma_ast::Module;
use tracing::{debug, debug_span, warn};

use super::plugin::{Hook, Plugin, PluginVisitor};
use super::{ErrorSeverity, Transform, TransformContext, TransformGroup, TransformMetadata, TransformRegistry};
use crate::diagnostic::Diagnostic;
use crate::factory::NodeFactory;
use crate::semantic::BindingKey;

pub const DEFAULT_MAX_PASSES: usize = 10;

/// Insertion point naming the start of the list.
pub const PARSE: &str = "parse";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("plugin `{plugin}` refers to unknown insertion point `{target}`")]
    UnknownInsertionPoint { plugin: String, target: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Halt {
    pub transform: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub passes: usize,
    pub changes: usize,
    pub per_transform: BTreeMap<String, usize>,
    pub converged: bool,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<Halt>,
}

impl PipelineReport {
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Folds a later run into this one.
    pub fn merge(&mut self, other: PipelineReport) {
        self.passes += other.passes;
        self.changes += other.changes;
        for (name, count) in other.per_transform {
            *self.per_transform.entry(name).or_default() += count;
        }
        self.converged = self.converged && other.converged;
        self.diagnostics.extend(other.diagnostics);
        if self.halted.is_none() {
            self.halted = other.halted;
        }
    }

    fn record(&mut self, name: &str, changes: usize) {
        if changes > 0 {
            *self.per_transform.entry(name.to_string()).or_default() += changes;
        }
    }
}

enum Step {
    Transform(Box<dyn Transform>),
    Plugin { name: String, visitor: PluginVisitor },
}

impl Step {
    fn name(&self) -> &str {
        match self {
            Step::Transform(transform) => transform.metadata().name,
            Step::Plugin { name, .. } => name,
        }
    }

    fn is_plugin(&self) -> bool {
        matches!(self, Step::Plugin { .. })
    }
}

pub struct Pipeline {
    steps: Vec<Step>,
    pre: Vec<Hook>,
    post: Vec<Hook>,
    max_passes: usize,
    setup_diagnostics: Vec<Diagnostic>,
}

impl Pipeline {
    /// A pipeline over the enabled transforms of `registry`.
    pub fn new(registry: TransformRegistry) -> Self {
        let (enabled, _) = registry.into_parts();
        Self::from_transforms(enabled)
    }

    pub fn from_transforms(transforms: Vec<Box<dyn Transform>>) -> Self {
        Self {
            steps: transforms.into_iter().map(Step::Transform).collect(),
            pre: Vec::new(),
            post: Vec::new(),
            max_passes: DEFAULT_MAX_PASSES,
            setup_diagnostics: Vec::new(),
        }
    }

    /// Splices `plugins` into the registry's order. Plugins are placed in
    /// registration order relative to each other.
    pub fn with_plugins(registry: TransformRegistry, plugins: &[Plugin]) -> Result<Self, PipelineError> {
        let (enabled, all) = registry.into_parts();
        let mut pipeline = Self::from_transforms(enabled);
        let mut at_start = 0;
        for plugin in plugins {
            pipeline.splice(plugin, &all, &mut at_start)?;
            pipeline.pre.extend(plugin.pre.clone());
            pipeline.post.extend(plugin.post.clone());
        }
        Ok(pipeline)
    }

    pub fn max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    fn splice(
        &mut self,
        plugin: &Plugin,
        all: &[TransformMetadata],
        at_start: &mut usize,
    ) -> Result<(), PipelineError> {
        let step = Step::Plugin {
            name: plugin.name.clone(),
            visitor: plugin.visitor.clone(),
        };
        let target = plugin.position.target();
        let after = matches!(plugin.position, super::InsertionPoint::After(_));

        if target == PARSE {
            self.steps.insert(*at_start, step);
            *at_start += 1;
            return Ok(());
        }

        let members: Vec<usize> = match TransformGroup::from_name(target) {
            Some(group) => self
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| matches!(s, Step::Transform(t) if t.metadata().group == group))
                .map(|(i, _)| i)
                .collect(),
            None => self
                .steps
                .iter()
                .position(|s| !s.is_plugin() && s.name() == target)
                .into_iter()
                .collect(),
        };

        let index = match (members.first(), members.last()) {
            (Some(&first), Some(&last)) => {
                if after {
                    let mut index = last + 1;
                    while index < self.steps.len() && self.steps[index].is_plugin() {
                        index += 1;
                    }
                    index
                } else {
                    first
                }
            }
            _ => {
                let known = TransformGroup::from_name(target).is_some()
                    || all.iter().any(|meta| meta.name == target);
                if !known {
                    return Err(PipelineError::UnknownInsertionPoint {
                        plugin: plugin.name.clone(),
                        target: target.to_string(),
                    });
                }
                warn!(plugin = %plugin.name, insertion_point = target, "insertion point is disabled");
                self.setup_diagnostics.push(Diagnostic::warning(
                    plugin.name.clone(),
                    format!("insertion point `{target}` is disabled; running at the end"),
                ));
                self.steps.len()
            }
        };
        self.steps.insert(index, step);
        Ok(())
    }

    pub fn run(&self, module: &mut Module, target: Option<BindingKey>) -> PipelineReport {
        let mut ctx = TransformContext::new(target);
        let mut report = self.run_with_context(module, &mut ctx);
        report.diagnostics = ctx.into_diagnostics();
        report
    }

    /// Runs every pass against `ctx`. Diagnostics stay in the context.
    pub(crate) fn run_with_context(&self, module: &mut Module, ctx: &mut TransformContext) -> PipelineReport {
        for diagnostic in &self.setup_diagnostics {
            ctx.report(diagnostic.clone());
        }
        for hook in &self.pre {
            hook();
        }

        let factory = NodeFactory;
        let mut report = PipelineReport::default();
        'passes: while report.passes < self.max_passes {
            report.passes += 1;
            let span = debug_span!("pass", n = report.passes);
            let _guard = span.enter();

            let mut pass_changes = 0;
            for step in &self.steps {
                match step {
                    Step::Transform(transform) => {
                        let name = transform.metadata().name;
                        let _span = debug_span!("transform", name).entered();
                        ctx.set_current(name);
                        match transform.run(module, ctx) {
                            Ok(changes) => {
                                if changes > 0 {
                                    debug!(changes, "applied");
                                }
                                pass_changes += changes;
                                report.record(name, changes);
                            }
                            Err(err) => match err.severity() {
                                ErrorSeverity::Recoverable => {
                                    warn!(error = %err, "transform skipped");
                                    ctx.report(Diagnostic::warning(name, err.to_string()));
                                }
                                ErrorSeverity::Fatal => {
                                    warn!(error = %err, "pipeline halted");
                                    ctx.report(Diagnostic::error(name, err.to_string()));
                                    report.changes += pass_changes;
                                    report.halted = Some(Halt {
                                        transform: name.to_string(),
                                        message: err.to_string(),
                                    });
                                    break 'passes;
                                }
                            },
                        }
                    }
                    Step::Plugin { name, visitor } => {
                        let changes = visitor(module, &factory);
                        pass_changes += changes;
                        report.record(name, changes);
                    }
                }
            }

            report.changes += pass_changes;
            debug!(changes = pass_changes, "pass finished");
            if pass_changes == 0 {
                report.converged = true;
                break;
            }
        }

        for hook in &self.post {
            hook();
        }
        report
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("steps", &self.step_names())
            .field("max_passes", &self.max_passes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::diagnostic::Severity;
    use crate::parser::parse;
    use crate::rename::RenameError;
    use crate::transforms::{InsertionPoint, TransformError, TransformTag};

    type Log = Rc<RefCell<Vec<String>>>;

    struct Scripted {
        metadata: TransformMetadata,
        script: RefCell<Vec<Result<usize, TransformError>>>,
        log: Log,
    }

    impl Scripted {
        /// Returns the scripted results in order, then zero.
        fn boxed(
            name: &'static str,
            group: TransformGroup,
            script: Vec<Result<usize, TransformError>>,
            log: &Log,
        ) -> Box<dyn Transform> {
            let mut script = script;
            script.reverse();
            Box::new(Self {
                metadata: TransformMetadata {
                    name,
                    description: "scripted",
                    group,
                    tags: &[TransformTag::Safe],
                },
                script: RefCell::new(script),
                log: log.clone(),
            })
        }
    }

    impl Transform for Scripted {
        fn metadata(&self) -> &TransformMetadata {
            &self.metadata
        }

        fn run(&self, _module: &mut Module, _ctx: &mut TransformContext) -> Result<usize, TransformError> {
            self.log.borrow_mut().push(self.metadata.name.to_string());
            self.script.borrow_mut().pop().unwrap_or(Ok(0))
        }
    }

    fn module() -> Module {
        parse("a;").unwrap().module
    }

    fn registry(log: &Log) -> TransformRegistry {
        let mut registry = TransformRegistry::new();
        registry.register(Scripted::boxed("a", TransformGroup::Unminify, vec![], log));
        registry.register(Scripted::boxed("b", TransformGroup::Deobfuscate, vec![], log));
        registry.register(Scripted::boxed("c", TransformGroup::Deobfuscate, vec![], log));
        registry.register(Scripted::boxed("d", TransformGroup::Unminify, vec![], log));
        registry
    }

    fn noop(name: &str, position: InsertionPoint) -> Plugin {
        Plugin::new(name, position, |_, _| 0)
    }

    #[test]
    fn runs_until_a_pass_makes_no_changes() {
        let log = Log::default();
        let pipeline = Pipeline::from_transforms(vec![
            Scripted::boxed("a", TransformGroup::Unminify, vec![Ok(2), Ok(1)], &log),
            Scripted::boxed("b", TransformGroup::Unminify, vec![Ok(0), Ok(3)], &log),
        ]);
        let report = pipeline.run(&mut module(), None);

        assert_eq!(report.passes, 3);
        assert_eq!(report.changes, 6);
        assert!(report.converged);
        assert_eq!(report.per_transform.get("a"), Some(&3));
        assert_eq!(report.per_transform.get("b"), Some(&3));
    }

    #[test]
    fn pass_cap_is_not_an_error() {
        let log = Log::default();
        let pipeline = Pipeline::from_transforms(vec![Scripted::boxed(
            "a",
            TransformGroup::Unminify,
            (0..20).map(|_| Ok(1)).collect(),
            &log,
        )])
        .max_passes(4);
        let report = pipeline.run(&mut module(), None);

        assert_eq!(report.passes, 4);
        assert!(!report.converged);
        assert!(!report.is_halted());
    }

    #[test]
    fn recoverable_error_continues_with_next_transform() {
        let log = Log::default();
        let pipeline = Pipeline::from_transforms(vec![
            Scripted::boxed(
                "a",
                TransformGroup::Unminify,
                vec![Err(TransformError::Unsupported("odd rotator".into()))],
                &log,
            ),
            Scripted::boxed("b", TransformGroup::Unminify, vec![], &log),
        ]);
        let report = pipeline.run(&mut module(), None);

        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert!(report.converged);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].severity, Severity::Warning);
        assert_eq!(report.diagnostics[0].source, "a");
    }

    #[test]
    fn fatal_error_halts_the_pipeline() {
        let log = Log::default();
        let pipeline = Pipeline::from_transforms(vec![
            Scripted::boxed("a", TransformGroup::Unminify, vec![Ok(1)], &log),
            Scripted::boxed(
                "b",
                TransformGroup::Unminify,
                vec![Err(TransformError::Rename(RenameError::StaleGraph))],
                &log,
            ),
            Scripted::boxed("c", TransformGroup::Unminify, vec![], &log),
        ]);
        let report = pipeline.run(&mut module(), None);

        assert_eq!(*log.borrow(), vec!["a", "b"]);
        assert_eq!(report.changes, 1);
        let halt = report.halted.unwrap();
        assert_eq!(halt.transform, "b");
        assert_eq!(report.diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn plugins_are_spliced_at_their_insertion_points() {
        let log = Log::default();
        let plugins = vec![
            noop("p-start", InsertionPoint::after(PARSE)),
            noop("p-before-c", InsertionPoint::before("c")),
            noop("p-after-a", InsertionPoint::after("a")),
            noop("p-after-a-2", InsertionPoint::after("a")),
            noop("p-after-deob", InsertionPoint::after("deobfuscate")),
            noop("p-start-2", InsertionPoint::before(PARSE)),
        ];
        let pipeline = Pipeline::with_plugins(registry(&log), &plugins).unwrap();

        assert_eq!(
            pipeline.step_names(),
            vec![
                "p-start",
                "p-start-2",
                "a",
                "p-after-a",
                "p-after-a-2",
                "b",
                "p-before-c",
                "c",
                "p-after-deob",
                "d",
            ]
        );
    }

    #[test]
    fn unknown_insertion_point_is_an_error() {
        let log = Log::default();
        let err = Pipeline::with_plugins(registry(&log), &[noop("p", InsertionPoint::before("nope"))])
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::UnknownInsertionPoint {
                plugin: "p".into(),
                target: "nope".into()
            }
        );
    }

    #[test]
    fn disabled_insertion_point_runs_at_the_end() {
        let log = Log::default();
        let mut registry = registry(&log);
        registry.disable("b");
        let pipeline = Pipeline::with_plugins(registry, &[noop("p", InsertionPoint::after("b"))]).unwrap();

        assert_eq!(pipeline.step_names(), vec!["a", "c", "d", "p"]);
        let report = pipeline.run(&mut module(), None);
        assert!(report.diagnostics.iter().any(|d| d.source == "p" && d.severity == Severity::Warning));
    }

    #[test]
    fn hooks_run_once_around_all_passes() {
        let pre = Rc::new(Cell::new(0));
        let post = Rc::new(Cell::new(0));
        let visits = Rc::new(Cell::new(0));
        let plugin = {
            let (pre, post, visits) = (pre.clone(), post.clone(), visits.clone());
            Plugin::new("counter", InsertionPoint::after(PARSE), move |_, _| {
                visits.set(visits.get() + 1);
                usize::from(visits.get() < 3)
            })
            .with_pre(move || pre.set(pre.get() + 1))
            .with_post(move || post.set(post.get() + 1))
        };
        let pipeline = Pipeline::with_plugins(TransformRegistry::new(), &[plugin]).unwrap();
        let report = pipeline.run(&mut module(), None);

        assert_eq!(report.passes, 3);
        assert_eq!(visits.get(), 3);
        assert_eq!(pre.get(), 1);
        assert_eq!(post.get(), 1);
    }

    struct Nesting {
        metadata: TransformMetadata,
        inner: Pipeline,
    }

    impl Transform for Nesting {
        fn metadata(&self) -> &TransformMetadata {
            &self.metadata
        }

        fn run(&self, _module: &mut Module, ctx: &mut TransformContext) -> Result<usize, TransformError> {
            let mut sub = parse("b;").unwrap().module;
            let report = ctx.run_nested(&self.inner, &mut sub, None);
            assert_eq!(ctx.depth(), 0);
            assert_eq!(report.changes, 5);
            Ok(0)
        }
    }

    #[test]
    fn nested_runs_keep_their_own_counters() {
        let log = Log::default();
        let inner = Pipeline::from_transforms(vec![Scripted::boxed(
            "inner",
            TransformGroup::Unpack,
            vec![Ok(5), Err(TransformError::Unsupported("dynamic require".into()))],
            &log,
        )]);
        let pipeline = Pipeline::from_transforms(vec![Box::new(Nesting {
            metadata: TransformMetadata {
                name: "outer",
                description: "runs a nested pipeline",
                group: TransformGroup::Unpack,
                tags: &[TransformTag::Unsafe],
            },
            inner,
        })]);
        let report = pipeline.run(&mut module(), None);

        assert_eq!(report.passes, 1);
        assert_eq!(report.changes, 0);
        assert!(report.converged);
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].source, "inner");
    }

    #[test]
    fn merge_combines_counts() {
        let mut first = PipelineReport {
            passes: 2,
            changes: 3,
            converged: true,
            ..PipelineReport::default()
        };
        first.record("a", 3);
        let mut second = PipelineReport {
            passes: 1,
            changes: 1,
            converged: true,
            ..PipelineReport::default()
        };
        second.record("a", 1);
        first.merge(second);

        assert_eq!(first.passes, 3);
        assert_eq!(first.per_transform["a"], 4);
        assert!(first.converged);
    }
}
