//! The Model facade
//!
//! A [`Model`] ties the pieces together for downstream plugins: it owns the
//! option set, the intern pool (which grows monotonically and is released
//! with the model), an environment stack, and a registry of named node
//! operations — the crate's rendition of prototype-based method dispatch.
//! Parsing itself stays per-call: every [`Model::parse`] builds a fresh
//! parser over the top of the environment stack.

use crate::ast::{Location, Node};
use crate::env::Environment;
use crate::error::ParseResult;
use crate::intern::{NodeId, Pool};
use crate::options::Options;
use crate::parser::Parser;
use crate::render;
use fnv::FnvHashMap;
use std::sync::Arc;

/// A named operation over nodes, dispatched through the registry
pub type NodeFn = Arc<dyn Fn(&Node) -> Node + Send + Sync>;

/// Registry of plugin operations
///
/// Plugins mount functions by name; [`Model::apply`] composes a node with
/// one of them, which is as close as Rust gets to augmenting a shared
/// prototype.
#[derive(Default, Clone)]
pub struct Registry {
    fns: FnvHashMap<String, NodeFn>,
}

impl Registry {
    /// Register (or replace) an operation
    pub fn register(&mut self, name: impl Into<String>, f: NodeFn) {
        self.fns.insert(name.into(), f);
    }

    /// Look up an operation
    pub fn get(&self, name: &str) -> Option<&NodeFn> {
        self.fns.get(name)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("ops", &self.fns.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Input accepted by [`Model::create`]
#[derive(Debug, Clone)]
pub enum Source<'a> {
    /// LaTeX source to parse
    Latex(&'a str),
    /// An existing tree to deep copy
    Node(&'a Node),
}

impl<'a> From<&'a str> for Source<'a> {
    fn from(src: &'a str) -> Self {
        Source::Latex(src)
    }
}

impl<'a> From<&'a Node> for Source<'a> {
    fn from(node: &'a Node) -> Self {
        Source::Node(node)
    }
}

/// Facade owning options, intern pool, environments, and plugins
#[derive(Debug)]
pub struct Model {
    opts: Options,
    pool: Pool,
    env_stack: Vec<Environment>,
    base_env: Environment,
    registry: Registry,
}

impl Model {
    /// A model with the given options and no environment
    pub fn new(opts: Options) -> Self {
        Model {
            opts,
            pool: Pool::new(),
            env_stack: Vec::new(),
            base_env: Environment::new(),
            registry: Registry::default(),
        }
    }

    /// The model's options
    pub fn options(&self) -> &Options {
        &self.opts
    }

    /// Push an environment for subsequent parses
    pub fn push_env(&mut self, env: Environment) {
        self.env_stack.push(env);
    }

    /// Pop the top environment
    pub fn pop_env(&mut self) -> Option<Environment> {
        self.env_stack.pop()
    }

    /// The environment the next parse will see
    pub fn env(&self) -> &Environment {
        self.env_stack.last().unwrap_or(&self.base_env)
    }

    /// Run `f` with `env` pushed; the pop happens on every exit path
    pub fn with_env<T>(
        &mut self,
        env: Environment,
        f: impl FnOnce(&mut Model) -> T,
    ) -> T {
        self.env_stack.push(env);
        let out = f(self);
        self.env_stack.pop();
        out
    }

    /// Parse LaTeX against the current environment
    pub fn parse(&self, src: &str) -> ParseResult<Node> {
        let mut parser = Parser::new(self.opts.clone(), src, self.env())?;
        parser.expr()
    }

    /// Parse a string, or deep-copy an existing tree
    ///
    /// The optional location is attached to the root of the result.
    pub fn create<'a>(
        &self,
        source: impl Into<Source<'a>>,
        location: Option<Location>,
    ) -> ParseResult<Node> {
        let mut node = match source.into() {
            Source::Latex(src) => self.parse(src)?,
            // strings and numbers copy by value, children recurse
            Source::Node(node) => node.clone(),
        };
        if location.is_some() {
            node.location = location;
        }
        Ok(node)
    }

    /// Parse each source in order
    pub fn create_many<'a>(
        &self,
        sources: impl IntoIterator<Item = Source<'a>>,
        location: Option<Location>,
    ) -> ParseResult<Vec<Node>> {
        sources
            .into_iter()
            .map(|s| self.create(s, location))
            .collect()
    }

    /// One-shot convenience: parse with fresh state
    pub fn from_latex(opts: Options, src: &str) -> ParseResult<Node> {
        Model::new(opts).parse(src)
    }

    /// Render a tree back to LaTeX
    pub fn to_latex(node: &Node) -> String {
        render::to_latex(node)
    }

    /// Intern a subtree in this model's pool
    pub fn intern(&mut self, node: &Node) -> NodeId {
        self.pool.intern(node)
    }

    /// Rebuild a fresh tree from an interned id
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.pool.node(id)
    }

    /// The plugin registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a plugin operation
    pub fn register(&mut self, name: impl Into<String>, f: NodeFn) {
        self.registry.register(name, f);
    }

    /// Apply a registered operation to a node
    pub fn apply(&self, name: &str, node: &Node) -> Option<Node> {
        self.registry.get(name).map(|f| f(node))
    }
}
