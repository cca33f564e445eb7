//! Compiled program trees.
//!
//! [`Program::compile`] turns a declarative [`StateSpec`] into an immutable
//! tree of [`StateNode`]s. All the dynamic, attribute-keyed material of the
//! specification is resolved here, once: shorthand directives are parsed
//! into path expressions, subtree imports are expanded (with cycle
//! detection), aliases are collected, and every node gets a preorder index
//! used by bypass interception. Navigation never re-inspects raw
//! specification data.
//!
//! A compiled `Program` is shared read-only (via `Rc`) by every instance
//! created from it.

use std::fmt;
use std::rc::Rc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::hooks::HookFn;
use crate::path::{self, PathExpr, ResolutionError};
use crate::program::{ActionSpec, AttrSpec, OwnerDirective, Perms, StateSpec};
use crate::registry::Capture;

/// Index of a state within its program's node table (also its preorder
/// position).
pub type NodeId = usize;

/// Hop bound for chained bypass interceptions and exit-hook redirections
/// within one external request.
pub const HOP_LIMIT: u32 = 16;

/// A shorthand directive compiled into a reusable path expression.
#[derive(Clone, Debug)]
pub(crate) struct Directive {
    pub raw: String,
    pub expr: PathExpr,
}

/// A hook or compiled directive occupying a hook slot.
pub(crate) enum Action {
    Hook(HookFn),
    Go(Directive),
    Target(Directive),
}

impl Clone for Action {
    fn clone(&self) -> Self {
        match self {
            Action::Hook(f) => Action::Hook(Rc::clone(f)),
            Action::Go(d) => Action::Go(d.clone()),
            Action::Target(d) => Action::Target(d.clone()),
        }
    }
}

#[derive(Clone)]
pub(crate) enum CompiledOwner {
    Notify(Directive),
    Mute,
}

/// Compiled attributes of one state.
#[derive(Clone, Default)]
pub(crate) struct NodeAttrs {
    pub enter: Option<Action>,
    pub on: Option<Action>,
    pub exit: Option<Action>,
    pub bypass_forward: Option<Directive>,
    pub bypass_backward: Option<Directive>,
    pub root: bool,
    pub perms: Perms,
    pub vars: Vec<String>,
    pub capture: Option<Capture>,
    pub sequence: bool,
    pub gate: bool,
    pub pendable: bool,
    pub owner: Option<CompiledOwner>,
}

/// One state in a compiled program tree.
pub struct StateNode {
    pub(crate) name: String,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    by_name: FxHashMap<String, NodeId>,
    pub(crate) attrs: NodeAttrs,
}

impl StateNode {
    /// The state's declared name (`"program"` for the root).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn child(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }
}

/// An immutable, compiled tree of state definitions.
pub struct Program {
    nodes: Vec<StateNode>,
    aliases: FxHashMap<String, NodeId>,
    /// Nodes carrying a bypass directive, in preorder.
    pub(crate) bypass_nodes: Vec<NodeId>,
}

/// Errors produced while compiling a [`StateSpec`].
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    /// Two states declare the same alias token.
    #[error("duplicate alias `@{alias}` (on `{first}` and `{second}`)")]
    #[diagnostic(code(trellis::tree::duplicate_alias))]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },

    /// A state name is empty or contains reserved characters.
    #[error("invalid state name `{name}`")]
    #[diagnostic(
        code(trellis::tree::invalid_name),
        help("state names may not contain `/`, `@`, `|`, `.` or whitespace")
    )]
    InvalidName { name: String },

    /// An import path is not absolute.
    #[error("import path `{path}` must be absolute (`//a/b`)")]
    #[diagnostic(code(trellis::tree::import_not_absolute))]
    NonAbsoluteImport { path: String },

    /// An import path names no state in the specification.
    #[error("import path `{path}` does not resolve to a state")]
    #[diagnostic(code(trellis::tree::unresolved_import))]
    UnresolvedImport { path: String },

    /// Imports form a cycle.
    #[error("import cycle through `{path}`")]
    #[diagnostic(code(trellis::tree::import_cycle))]
    ImportCycle { path: String },

    /// A shorthand directive failed to parse.
    #[error("invalid directive `{expr}` on state `{state}`")]
    #[diagnostic(code(trellis::tree::bad_directive))]
    Directive {
        state: String,
        expr: String,
        #[source]
        source: ResolutionError,
    },
}

impl Program {
    /// Compile a specification into an immutable program tree.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileError`] for duplicate aliases, invalid state
    /// names, unresolvable or cyclic imports, and malformed shorthand
    /// directives.
    pub fn compile(spec: StateSpec) -> Result<Rc<Program>, CompileError> {
        let expanded = expand_imports(&spec, &spec, &mut Vec::new())?;

        let mut program = Program {
            nodes: Vec::new(),
            aliases: FxHashMap::default(),
            bypass_nodes: Vec::new(),
        };
        program.add_node("program".to_string(), &expanded, None)?;

        program.bypass_nodes = (0..program.nodes.len())
            .filter(|&id| {
                let attrs = &program.nodes[id].attrs;
                attrs.bypass_forward.is_some() || attrs.bypass_backward.is_some()
            })
            .collect();

        tracing::debug!(
            target: "trellis::tree",
            states = program.nodes.len(),
            aliases = program.aliases.len(),
            "program compiled"
        );
        Ok(Rc::new(program))
    }

    fn add_node(
        &mut self,
        name: String,
        spec: &StateSpec,
        parent: Option<NodeId>,
    ) -> Result<NodeId, CompileError> {
        if parent.is_some() && !path::is_valid_name(&name) {
            return Err(CompileError::InvalidName { name });
        }

        let id = self.nodes.len();
        let attrs = compile_attrs(&name, &spec.attrs, parent.is_none())?;

        if let Some(alias) = &spec.attrs.alias {
            if !path::is_valid_name(alias) {
                return Err(CompileError::InvalidName {
                    name: alias.clone(),
                });
            }
            if let Some(&existing) = self.aliases.get(alias) {
                return Err(CompileError::DuplicateAlias {
                    alias: alias.clone(),
                    first: self.nodes[existing].name.clone(),
                    second: name,
                });
            }
            self.aliases.insert(alias.clone(), id);
        }

        self.nodes.push(StateNode {
            name,
            parent,
            children: Vec::new(),
            by_name: FxHashMap::default(),
            attrs,
        });

        for (child_name, child_spec) in &spec.children {
            let child_id = self.add_node(child_name.clone(), child_spec, Some(id))?;
            self.nodes[id].children.push(child_id);
            self.nodes[id].by_name.insert(child_name.clone(), child_id);
        }
        Ok(id)
    }

    /// The root state's id.
    pub fn root(&self) -> NodeId {
        0
    }

    /// Number of states in the tree (root included).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the tree has only the root.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub(crate) fn node(&self, id: NodeId) -> &StateNode {
        &self.nodes[id]
    }

    /// Look up a state by alias token.
    pub(crate) fn alias(&self, name: &str) -> Option<NodeId> {
        self.aliases.get(name).copied()
    }

    /// Nearest root-marked ancestor-or-self; the tree root is an implicit
    /// branch root.
    pub(crate) fn branch_root_of(&self, base: NodeId) -> NodeId {
        let mut cur = base;
        loop {
            let node = self.node(cur);
            match node.parent {
                Some(parent) if !node.attrs.root => cur = parent,
                _ => return cur,
            }
        }
    }

    /// Root-to-node chain of ids.
    pub(crate) fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            chain.push(c);
            cur = self.node(c).parent;
        }
        chain.reverse();
        chain
    }

    /// Root-to-node chain of names (diagnostics).
    pub fn chain_names(&self, id: NodeId) -> Vec<String> {
        self.chain(id)
            .into_iter()
            .map(|n| self.node(n).name.clone())
            .collect()
    }
}

// Hook closures are opaque, so this cannot be derived.
impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("states", &self.nodes.len())
            .field("aliases", &self.aliases.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn compile_attrs(
    state: &str,
    spec: &AttrSpec,
    is_root: bool,
) -> Result<NodeAttrs, CompileError> {
    let action = |slot: &Option<ActionSpec>| -> Result<Option<Action>, CompileError> {
        match slot {
            None => Ok(None),
            Some(ActionSpec::Hook(f)) => Ok(Some(Action::Hook(Rc::clone(f)))),
            Some(ActionSpec::Go(raw)) => Ok(Some(Action::Go(directive(state, raw)?))),
            Some(ActionSpec::Target(raw)) => Ok(Some(Action::Target(directive(state, raw)?))),
        }
    };

    Ok(NodeAttrs {
        enter: action(&spec.enter)?,
        on: action(&spec.on)?,
        exit: action(&spec.exit)?,
        bypass_forward: spec
            .bypass_forward
            .as_ref()
            .map(|raw| directive(state, raw))
            .transpose()?,
        bypass_backward: spec
            .bypass_backward
            .as_ref()
            .map(|raw| directive(state, raw))
            .transpose()?,
        // The program root is always a branch root.
        root: spec.root || is_root,
        perms: spec.perms.unwrap_or_default(),
        vars: spec.vars.clone(),
        capture: spec.capture.clone(),
        sequence: spec.sequence,
        gate: spec.gate,
        pendable: spec.pendable,
        owner: spec
            .owner
            .as_ref()
            .map(|o| match o {
                OwnerDirective::Notify(raw) => {
                    directive(state, raw).map(CompiledOwner::Notify)
                }
                OwnerDirective::Mute => Ok(CompiledOwner::Mute),
            })
            .transpose()?,
    })
}

fn directive(state: &str, raw: &str) -> Result<Directive, CompileError> {
    PathExpr::parse(raw)
        .map(|expr| Directive {
            raw: raw.to_string(),
            expr,
        })
        .map_err(|source| CompileError::Directive {
            state: state.to_string(),
            expr: raw.to_string(),
            source,
        })
}

/// Expand subtree imports within `spec`, resolving references against the
/// root specification. `in_progress` carries the import paths currently
/// being expanded for cycle detection.
fn expand_imports(
    spec: &StateSpec,
    root: &StateSpec,
    in_progress: &mut Vec<String>,
) -> Result<StateSpec, CompileError> {
    let mut out = if let Some(import_path) = &spec.attrs.import {
        if in_progress.iter().any(|p| p == import_path) {
            return Err(CompileError::ImportCycle {
                path: import_path.clone(),
            });
        }
        let target = find_spec(root, import_path)?;

        in_progress.push(import_path.clone());
        let mut imported = expand_imports(target, root, in_progress)?;
        in_progress.pop();

        // An alias names one state; imported copies never re-register it.
        strip_aliases(&mut imported);
        merge_spec(imported, spec)
    } else {
        spec.clone()
    };

    // Expand children after the merge so that locally declared children may
    // themselves import. Already-expanded imported children pass through
    // unchanged (their import attribute is cleared during expansion).
    let children = std::mem::take(&mut out.children);
    for (name, child) in children {
        let expanded = expand_imports(&child, root, in_progress)?;
        out.children.push((name, expanded));
    }
    Ok(out)
}

fn strip_aliases(spec: &mut StateSpec) {
    spec.attrs.alias = None;
    for (_, child) in &mut spec.children {
        strip_aliases(child);
    }
}

/// Merge an imported subtree with the importing state's local declarations:
/// local attributes and same-named children override imported ones.
fn merge_spec(imported: StateSpec, local: &StateSpec) -> StateSpec {
    let mut out = imported;
    let l = &local.attrs;

    if l.enter.is_some() {
        out.attrs.enter = l.enter.clone();
    }
    if l.on.is_some() {
        out.attrs.on = l.on.clone();
    }
    if l.exit.is_some() {
        out.attrs.exit = l.exit.clone();
    }
    if l.bypass_forward.is_some() {
        out.attrs.bypass_forward = l.bypass_forward.clone();
    }
    if l.bypass_backward.is_some() {
        out.attrs.bypass_backward = l.bypass_backward.clone();
    }
    if l.perms.is_some() {
        out.attrs.perms = l.perms;
    }
    if l.capture.is_some() {
        out.attrs.capture = l.capture.clone();
    }
    if l.owner.is_some() {
        out.attrs.owner = l.owner.clone();
    }
    out.attrs.alias = l.alias.clone();
    out.attrs.root |= l.root;
    out.attrs.sequence |= l.sequence;
    out.attrs.gate |= l.gate;
    out.attrs.pendable |= l.pendable;
    out.attrs.vars.extend(l.vars.iter().cloned());
    out.attrs.import = None;

    // Local children replace imported children of the same name, keeping
    // the imported declaration position.
    for (name, child) in &local.children {
        if let Some(slot) = out.children.iter_mut().find(|(n, _)| n == name) {
            slot.1 = child.clone();
        } else {
            out.children.push((name.clone(), child.clone()));
        }
    }
    out
}

/// Locate a spec node by absolute path.
fn find_spec<'a>(root: &'a StateSpec, path: &str) -> Result<&'a StateSpec, CompileError> {
    let expr = PathExpr::parse(path).map_err(|_| CompileError::NonAbsoluteImport {
        path: path.to_string(),
    })?;
    let segs = match expr {
        PathExpr::Walk {
            anchor: crate::path::Anchor::Absolute,
            segs,
        } => segs,
        PathExpr::ProgramRoot => Vec::new(),
        _ => {
            return Err(CompileError::NonAbsoluteImport {
                path: path.to_string(),
            });
        }
    };

    let mut cur = root;
    for seg in &segs {
        let name = match seg {
            crate::path::Seg::Name(n) => n,
            crate::path::Seg::Up => {
                return Err(CompileError::NonAbsoluteImport {
                    path: path.to_string(),
                });
            }
        };
        cur = cur
            .children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
            .ok_or_else(|| CompileError::UnresolvedImport {
                path: path.to_string(),
            })?;
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::StateSpec;

    #[test]
    fn compiles_minimal_tree() {
        let program = Program::compile(
            StateSpec::new()
                .child("a", StateSpec::new().child("b", StateSpec::new()))
                .child("c", StateSpec::new()),
        )
        .unwrap();

        assert_eq!(program.len(), 4);
        let root = program.root();
        assert_eq!(program.node(root).name(), "program");
        // Preorder: program, a, b, c.
        assert_eq!(program.node(1).name(), "a");
        assert_eq!(program.node(2).name(), "b");
        assert_eq!(program.node(3).name(), "c");
        assert_eq!(program.node(2).parent, Some(1));
        assert_eq!(program.chain_names(2), vec!["program", "a", "b"]);
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let err = Program::compile(
            StateSpec::new()
                .child("a", StateSpec::new().alias("start"))
                .child("b", StateSpec::new().alias("start")),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateAlias { .. }));
    }

    #[test]
    fn invalid_name_is_rejected() {
        let err = Program::compile(StateSpec::new().child("a/b", StateSpec::new()))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidName { .. }));
    }

    #[test]
    fn import_expands_subtree() {
        let program = Program::compile(
            StateSpec::new()
                .child(
                    "all",
                    StateSpec::new()
                        .root()
                        .child("update", StateSpec::new())
                        .child("mark", StateSpec::new()),
                )
                .child("active", StateSpec::new().import("//all").capture("item")),
        )
        .unwrap();

        // active received copies of update and mark.
        let active = program.node(program.root()).child("active").unwrap();
        assert!(program.node(active).child("update").is_some());
        assert!(program.node(active).child("mark").is_some());
        // and the local capture attribute survived the merge.
        assert!(program.node(active).attrs.capture.is_some());
        // imported root marker carried over.
        assert!(program.node(active).attrs.root);
    }

    #[test]
    fn import_cycle_is_rejected() {
        let err = Program::compile(
            StateSpec::new()
                .child("a", StateSpec::new().import("//b"))
                .child("b", StateSpec::new().import("//a")),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::ImportCycle { .. }));
    }

    #[test]
    fn unresolved_import_is_rejected() {
        let err = Program::compile(
            StateSpec::new().child("a", StateSpec::new().import("//missing")),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedImport { .. }));

        let err = Program::compile(
            StateSpec::new().child("a", StateSpec::new().import("relative/path")),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::NonAbsoluteImport { .. }));
    }

    #[test]
    fn directives_are_parsed_at_compile_time() {
        let err = Program::compile(
            StateSpec::new().child("a", StateSpec::new().on_go("bad@segment")),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Directive { .. }));
    }
}
