//! Declarative state specifications.
//!
//! A [`StateSpec`] describes one state of a program: its lifecycle hooks,
//! navigation directives, markers, and named child states. Specs are plain
//! values assembled with a fluent builder and compiled once into an
//! immutable [`Program`](crate::tree::Program) shared by every instance.
//!
//! The recognized attributes are exactly the ones the builder methods
//! expose; anything else a program wants is a named child state added with
//! [`child`](StateSpec::child). Child declaration order is semantically
//! significant: it drives sequence walks, gate runs, and bypass
//! interception order.
//!
//! # Examples
//!
//! ```
//! use trellis::program::StateSpec;
//! use trellis::tree::Program;
//!
//! let spec = StateSpec::new()
//!     .enter_target("@start")
//!     .child(
//!         "list",
//!         StateSpec::new()
//!             .alias("start")
//!             .root()
//!             .on_go("all")
//!             .child("all", StateSpec::new().root())
//!             .child("active", StateSpec::new().import("//list/all")),
//!     );
//!
//! let program = Program::compile(spec).unwrap();
//! # let _ = program;
//! ```

use crate::hooks::{HookCx, HookFn};
use crate::registry::Capture;
use std::rc::Rc;

/// Access-control mode for a state.
///
/// Restricts which caller categories may transition into or out of the
/// state. The instance's own hooks (`self`) are always allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Perms {
    pub owner: bool,
    pub sub: bool,
    pub external: bool,
}

impl Default for Perms {
    fn default() -> Self {
        Perms::allow_all()
    }
}

impl Perms {
    /// Every caller category is allowed (the default).
    pub const fn allow_all() -> Self {
        Perms {
            owner: true,
            sub: true,
            external: true,
        }
    }

    /// Only the instance's own hooks may cross this state.
    pub const fn deny_all() -> Self {
        Perms {
            owner: false,
            sub: false,
            external: false,
        }
    }

    /// Allow everything except sub-instances.
    pub const fn deny_sub() -> Self {
        Perms {
            owner: true,
            sub: false,
            external: true,
        }
    }

    /// Allow everything except external callers.
    pub const fn deny_external() -> Self {
        Perms {
            owner: true,
            sub: true,
            external: false,
        }
    }
}

/// Owner directive: how a sub-instance routes its owner when a cascade
/// comes to rest (or the sub is destroyed) within the declaring branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerDirective {
    /// Send the owner a `go` to this path, resolved in the owner's context.
    Notify(String),
    /// Suppress owner notification while within this branch.
    Mute,
}

/// A hook or a shorthand navigation directive occupying a hook slot.
pub(crate) enum ActionSpec {
    Hook(HookFn),
    Go(String),
    Target(String),
}

impl Clone for ActionSpec {
    fn clone(&self) -> Self {
        match self {
            ActionSpec::Hook(f) => ActionSpec::Hook(Rc::clone(f)),
            ActionSpec::Go(s) => ActionSpec::Go(s.clone()),
            ActionSpec::Target(s) => ActionSpec::Target(s.clone()),
        }
    }
}

/// The attribute set of one state specification.
#[derive(Clone, Default)]
pub(crate) struct AttrSpec {
    pub enter: Option<ActionSpec>,
    pub on: Option<ActionSpec>,
    pub exit: Option<ActionSpec>,
    pub bypass_forward: Option<String>,
    pub bypass_backward: Option<String>,
    pub root: bool,
    pub alias: Option<String>,
    pub perms: Option<Perms>,
    pub vars: Vec<String>,
    pub capture: Option<Capture>,
    pub sequence: bool,
    pub gate: bool,
    pub pendable: bool,
    pub owner: Option<OwnerDirective>,
    pub import: Option<String>,
}

/// Declarative specification of one state and its children.
#[derive(Clone, Default)]
pub struct StateSpec {
    pub(crate) attrs: AttrSpec,
    pub(crate) children: Vec<(String, StateSpec)>,
}

impl StateSpec {
    /// Creates a new, empty state specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook invoked when this state is entered.
    #[must_use]
    pub fn enter(mut self, hook: impl Fn(&mut HookCx<'_>) + 'static) -> Self {
        self.attrs.enter = Some(ActionSpec::Hook(Rc::new(hook)));
        self
    }

    /// Shorthand entry directive: issue `go(expr)` on entry.
    #[must_use]
    pub fn enter_go(mut self, expr: impl Into<String>) -> Self {
        self.attrs.enter = Some(ActionSpec::Go(expr.into()));
        self
    }

    /// Shorthand entry directive: issue `target(expr)` on entry.
    #[must_use]
    pub fn enter_target(mut self, expr: impl Into<String>) -> Self {
        self.attrs.enter = Some(ActionSpec::Target(expr.into()));
        self
    }

    /// Hook invoked when this state is the request's target; receives the
    /// invocation arguments.
    #[must_use]
    pub fn on(mut self, hook: impl Fn(&mut HookCx<'_>) + 'static) -> Self {
        self.attrs.on = Some(ActionSpec::Hook(Rc::new(hook)));
        self
    }

    /// Shorthand on-target directive: issue `go(expr)` after arriving here.
    #[must_use]
    pub fn on_go(mut self, expr: impl Into<String>) -> Self {
        self.attrs.on = Some(ActionSpec::Go(expr.into()));
        self
    }

    /// Shorthand on-target directive: issue `target(expr)` after arriving.
    #[must_use]
    pub fn on_target(mut self, expr: impl Into<String>) -> Self {
        self.attrs.on = Some(ActionSpec::Target(expr.into()));
        self
    }

    /// Hook invoked when this state is exited. Exit hooks may redirect the
    /// in-progress transition via [`HookCx::redirect`].
    #[must_use]
    pub fn exit(mut self, hook: impl Fn(&mut HookCx<'_>) + 'static) -> Self {
        self.attrs.exit = Some(ActionSpec::Hook(Rc::new(hook)));
        self
    }

    /// Forward-bypass directive: when a transition would skip over this
    /// state moving toward later declaration positions, the directive's
    /// target supersedes the request (the original target is retried after
    /// the interception completes).
    #[must_use]
    pub fn bypass_forward(mut self, expr: impl Into<String>) -> Self {
        self.attrs.bypass_forward = Some(expr.into());
        self
    }

    /// Backward-bypass directive; as [`bypass_forward`](Self::bypass_forward)
    /// for transitions moving toward earlier declaration positions.
    #[must_use]
    pub fn bypass_backward(mut self, expr: impl Into<String>) -> Self {
        self.attrs.bypass_backward = Some(expr.into());
        self
    }

    /// Mark this state a branch root: branch-rooted expressions (`/x`)
    /// resolve from the nearest root-marked ancestor-or-self.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.attrs.root = true;
        self
    }

    /// Declare an `@alias` token for this state. Aliases are program-wide
    /// and must be unique.
    #[must_use]
    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.attrs.alias = Some(name.into());
        self
    }

    /// Access-control mode for transitions crossing this state.
    #[must_use]
    pub fn perms(mut self, perms: Perms) -> Self {
        self.attrs.perms = Some(perms);
        self
    }

    /// Declare data variables scoped to this state: visible to hooks only
    /// while this state is on the current path, dropped when it is exited.
    #[must_use]
    pub fn vars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs.vars.extend(names.into_iter().map(Into::into));
        self
    }

    /// Capture criteria scoping the default sub-instance view while this
    /// state is on the current path.
    #[must_use]
    pub fn capture(mut self, criteria: impl Into<Capture>) -> Self {
        self.attrs.capture = Some(criteria.into());
        self
    }

    /// Sequence flag: after this state's entry hook, walk every descendant
    /// in declaration order, depth-first preorder.
    #[must_use]
    pub fn sequence(mut self) -> Self {
        self.attrs.sequence = true;
        self
    }

    /// Gate flag: after this state's entry hook, run each direct child once,
    /// declaration order.
    #[must_use]
    pub fn gate(mut self) -> Self {
        self.attrs.gate = true;
        self
    }

    /// Pendable flag: the entry hook may register a cancellable timed
    /// continuation via [`HookCx::pend`].
    #[must_use]
    pub fn pendable(mut self) -> Self {
        self.attrs.pendable = true;
        self
    }

    /// Owner directive: when a sub-instance rests (or is destroyed) within
    /// this branch, route its owner to `expr` (resolved in the owner's own
    /// context).
    #[must_use]
    pub fn owner_to(mut self, expr: impl Into<String>) -> Self {
        self.attrs.owner = Some(OwnerDirective::Notify(expr.into()));
        self
    }

    /// Suppress owner notification while within this branch.
    #[must_use]
    pub fn owner_mute(mut self) -> Self {
        self.attrs.owner = Some(OwnerDirective::Mute);
        self
    }

    /// Subtree import: this state takes its attributes and children from the
    /// state at `expr` (an absolute path), with locally declared attributes
    /// and children overriding the imported ones.
    #[must_use]
    pub fn import(mut self, expr: impl Into<String>) -> Self {
        self.attrs.import = Some(expr.into());
        self
    }

    /// Add a named child state. Declaration order is preserved.
    #[must_use]
    pub fn child(mut self, name: impl Into<String>, spec: StateSpec) -> Self {
        self.children.push((name.into(), spec));
        self
    }
}
