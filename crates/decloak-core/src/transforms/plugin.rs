//! External extension points spliced into the pipeline.

use std::fmt;
use std::rc::Rc;

use swc_ecma_ast::Module;

use crate::factory::NodeFactory;

pub type Hook = Rc<dyn Fn()>;
pub type PluginVisitor = Rc<dyn Fn(&mut Module, &NodeFactory) -> usize>;

/// Where a plugin runs relative to a named built-in transform, a transform
/// group, or `"parse"` (the very start of the list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertionPoint {
    Before(String),
    After(String),
}

impl InsertionPoint {
    pub fn before(name: impl Into<String>) -> Self {
        InsertionPoint::Before(name.into())
    }

    pub fn after(name: impl Into<String>) -> Self {
        InsertionPoint::After(name.into())
    }

    pub fn target(&self) -> &str {
        match self {
            InsertionPoint::Before(name) | InsertionPoint::After(name) => name,
        }
    }
}

/// A visitor plus the position it occupies in every pass. `pre` and `post`
/// run once around the whole run.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub position: InsertionPoint,
    pub(crate) pre: Option<Hook>,
    pub(crate) post: Option<Hook>,
    pub(crate) visitor: PluginVisitor,
}

impl Plugin {
    pub fn new(
        name: impl Into<String>,
        position: InsertionPoint,
        visitor: impl Fn(&mut Module, &NodeFactory) -> usize + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            position,
            pre: None,
            post: None,
            visitor: Rc::new(visitor),
        }
    }

    pub fn with_pre(mut self, hook: impl Fn() + 'static) -> Self {
        self.pre = Some(Rc::new(hook));
        self
    }

    pub fn with_post(mut self, hook: impl Fn() + 'static) -> Self {
        self.post = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("position", &self.position)
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}
