//! Program instances: identity, current path, scoped data, and ownership.
//!
//! An [`Instance`] is a cheaply cloneable handle on one running occupation
//! of a compiled [`Program`](crate::tree::Program). All mutable state lives
//! behind a single `RefCell`; instances are single-threaded by construction
//! and shared through `Rc`, with owners holding strong references to their
//! subs and subs holding a weak reference back.
//!
//! # Examples
//!
//! ```
//! use trellis::program::StateSpec;
//! use trellis::scheduler::Scheduler;
//! use trellis::tree::Program;
//!
//! let program = Program::compile(
//!     StateSpec::new().child("a", StateSpec::new()).child("b", StateSpec::new()),
//! )
//! .unwrap();
//! let sched = Scheduler::new();
//! let inst = sched.create(&program).unwrap();
//! inst.go("a").unwrap();
//! assert_eq!(inst.status().path, vec!["program", "a"]);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::callbacks::Callback;
use crate::navigator::{self, Request, RequestKind, TransitionError};
use crate::path::ResolutionError;
use crate::registry::Capture;
use crate::scheduler::SchedCore;
use crate::tree::{NodeId, Program};

/// Lifecycle phase of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Created, ignition cascade not yet settled.
    Initializing,
    /// Resting on a stable path; accepts requests.
    Active,
    /// Terminated; every request is rejected.
    Destroyed,
}

/// One entry in an instance's navigation trail.
#[derive(Debug, Clone, Serialize)]
pub struct TrailEntry {
    pub when: DateTime<Utc>,
    pub expr: String,
}

/// Point-in-time snapshot of an instance.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Root-to-leaf names of the current path (empty once destroyed).
    pub path: Vec<String>,
    pub phase: Phase,
    /// Accepted request expressions, most recent first.
    pub trail: Vec<TrailEntry>,
}

/// Data variables scoped to one entered state.
pub(crate) struct DataFrame {
    pub node: NodeId,
    pub vars: FxHashMap<String, Value>,
}

pub(crate) struct InstanceState {
    pub phase: Phase,
    /// Root-to-leaf ids of the currently occupied states.
    pub path: Vec<NodeId>,
    /// One frame per entered state that declares variables; stack order
    /// follows the path.
    pub scopes: Vec<DataFrame>,
    pub trail: Vec<TrailEntry>,
    pub owner: Weak<InstanceCore>,
    /// Sub-instances, creation order.
    pub subs: Vec<Rc<InstanceCore>>,
    /// A cascade is currently running on this instance.
    pub in_cascade: bool,
    /// Same-instance requests issued mid-cascade, drained before the
    /// running cascade returns.
    pub queued: VecDeque<Request>,
    /// Monotonic pend counter; a timer only fires when its sequence still
    /// matches `pending`.
    pub pend_seq: u64,
    pub pending: Option<u64>,
}

pub(crate) struct InstanceCore {
    pub id: Uuid,
    pub program: Rc<Program>,
    pub sched: Rc<SchedCore>,
    pub state: RefCell<InstanceState>,
}

impl InstanceCore {
    pub(crate) fn new(
        program: &Rc<Program>,
        sched: &Rc<SchedCore>,
        owner: Weak<InstanceCore>,
    ) -> Rc<Self> {
        Rc::new(InstanceCore {
            id: Uuid::new_v4(),
            program: Rc::clone(program),
            sched: Rc::clone(sched),
            state: RefCell::new(InstanceState {
                phase: Phase::Initializing,
                path: Vec::new(),
                scopes: Vec::new(),
                trail: Vec::new(),
                owner,
                subs: Vec::new(),
                in_cascade: false,
                queued: VecDeque::new(),
                pend_seq: 0,
                pending: None,
            }),
        })
    }

    /// Current leaf (root when the path is empty).
    pub(crate) fn leaf(&self) -> NodeId {
        self.state
            .borrow()
            .path
            .last()
            .copied()
            .unwrap_or_else(|| self.program.root())
    }
}

/// Snapshot `core`'s status.
pub(crate) fn status(core: &InstanceCore) -> Status {
    let st = core.state.borrow();
    Status {
        path: st
            .path
            .iter()
            .map(|&id| core.program.node(id).name().to_string())
            .collect(),
        phase: st.phase,
        trail: st.trail.iter().rev().cloned().collect(),
    }
}

/// Errors from scoped data access.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum DataError {
    /// No state on the current path declares this variable.
    #[error("no variable `{name}` is visible from the current path")]
    #[diagnostic(
        code(trellis::instance::not_visible),
        help("variables exist only while their declaring state is occupied")
    )]
    NotVisible { name: String },
}

/// Accessor over the data variables visible from an instance's current
/// path. Lookup is innermost-first: a variable declared closer to the leaf
/// shadows a same-named one declared closer to the root.
pub struct Data<'a> {
    core: &'a InstanceCore,
}

impl<'a> Data<'a> {
    pub(crate) fn new(core: &'a InstanceCore) -> Self {
        Data { core }
    }

    /// Read the innermost visible value of `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        let st = self.core.state.borrow();
        st.scopes
            .iter()
            .rev()
            .find_map(|frame| frame.vars.get(name).cloned())
    }

    /// Write the innermost visible `name`.
    ///
    /// # Errors
    ///
    /// [`DataError::NotVisible`] when no occupied state declares `name`;
    /// the write is dropped and instance state is unchanged.
    pub fn set(&self, name: &str, value: Value) -> Result<(), DataError> {
        let mut st = self.core.state.borrow_mut();
        for frame in st.scopes.iter_mut().rev() {
            if let Some(slot) = frame.vars.get_mut(name) {
                *slot = value;
                return Ok(());
            }
        }
        Err(DataError::NotVisible {
            name: name.to_string(),
        })
    }

    /// Names visible from the current path, innermost scope first.
    pub fn names(&self) -> Vec<String> {
        let st = self.core.state.borrow();
        let mut seen = Vec::new();
        for frame in st.scopes.iter().rev() {
            for name in frame.vars.keys() {
                if !seen.iter().any(|n| n == name) {
                    seen.push(name.clone());
                }
            }
        }
        seen
    }
}

/// Handle on a running program instance.
///
/// Clones share the same underlying instance.
#[derive(Clone)]
pub struct Instance {
    pub(crate) core: Rc<InstanceCore>,
}

impl Instance {
    pub(crate) fn from_core(core: Rc<InstanceCore>) -> Self {
        Instance { core }
    }

    /// This instance's unique id.
    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.core.state.borrow().phase
    }

    /// Snapshot of path, phase and trail.
    pub fn status(&self) -> Status {
        status(&self.core)
    }

    /// Scoped data accessor.
    pub fn data(&self) -> Data<'_> {
        Data::new(&self.core)
    }

    /// Issue a full navigation request: resolve `expr` from the current
    /// leaf, run the exit/entry cascade, and settle.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] when the expression does not resolve, an
    /// access-control check denies the caller, the hop limit is exceeded,
    /// or the instance is already destroyed. On error no hook has run and
    /// the instance rests unchanged.
    pub fn go(&self, expr: &str) -> Result<(), TransitionError> {
        navigator::submit(&self.core, RequestKind::Go, expr, Vec::new())
    }

    /// Issue a targeted request carrying `args` for the destination's
    /// on-target hook.
    ///
    /// # Errors
    ///
    /// As [`go`](Self::go).
    pub fn target(&self, expr: &str, args: Vec<Value>) -> Result<(), TransitionError> {
        navigator::submit(&self.core, RequestKind::Target, expr, args)
    }

    /// Capture query over this instance's sub-registry.
    pub fn capture(&self, criteria: &Capture) -> Vec<Instance> {
        crate::registry::capture(&self.core, criteria)
    }

    /// Deregister subs without destroying them.
    pub fn remove(&self, ids: &[Uuid]) {
        crate::registry::remove(&self.core, ids);
    }

    /// This instance's owner, when alive.
    pub fn owner(&self) -> Option<Instance> {
        let owner = self.core.state.borrow().owner.upgrade()?;
        Some(Instance::from_core(owner))
    }

    /// Bind a callback handle to `expr`, anchored at the current leaf.
    ///
    /// # Errors
    ///
    /// [`ResolutionError`] when `expr` (or one of its `|`-separated
    /// alternatives) fails to parse.
    pub fn bind_callback(&self, expr: &str) -> Result<Callback, ResolutionError> {
        crate::callbacks::bind(&self.core, self.core.leaf(), expr)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.core.state.borrow();
        f.debug_struct("Instance")
            .field("id", &self.core.id)
            .field("phase", &st.phase)
            .field(
                "path",
                &st.path
                    .iter()
                    .map(|&id| self.core.program.node(id).name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
