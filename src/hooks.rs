//! Hook functions and the context they run against.
//!
//! Every lifecycle hook (entry, on-target, exit) receives a [`HookCx`]
//! scoped to the instance being navigated and the state the hook is
//! declared on. The context is the *only* doorway from hook code back into
//! the runtime: navigation, scoped data, sub-instance management, callback
//! binding, and pendable continuations all go through it.
//!
//! Requests issued from a hook against the same instance are queued and run
//! after the current cascade settles; requests against another instance run
//! immediately, nested depth-first.

use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::callbacks::Callback;
use crate::instance::{Data, Instance, InstanceCore, Status};
use crate::navigator::{self, RequestKind};
use crate::path::ResolutionError;
use crate::registry::Capture;
use crate::tree::{NodeId, Program};

/// A lifecycle hook.
pub type HookFn = Rc<dyn Fn(&mut HookCx<'_>)>;

/// Which hook slot is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Enter,
    On,
    Exit,
}

/// Execution context for a single hook invocation.
pub struct HookCx<'a> {
    pub(crate) core: &'a Rc<InstanceCore>,
    pub(crate) node: NodeId,
    pub(crate) phase: HookPhase,
    pub(crate) args: &'a [Value],
    pub(crate) redirect: Option<String>,
    pub(crate) pend: Option<(Duration, String)>,
}

impl<'a> HookCx<'a> {
    pub(crate) fn new(
        core: &'a Rc<InstanceCore>,
        node: NodeId,
        phase: HookPhase,
        args: &'a [Value],
    ) -> Self {
        HookCx {
            core,
            node,
            phase,
            args,
            redirect: None,
            pend: None,
        }
    }

    /// Name of the state this hook is declared on.
    pub fn state_name(&self) -> &str {
        self.core.program.node(self.node).name()
    }

    /// Which hook slot is executing.
    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    /// Arguments carried by the request (empty outside on-target hooks).
    pub fn args(&self) -> &[Value] {
        self.args
    }

    /// The `i`-th request argument, if present.
    pub fn arg(&self, i: usize) -> Option<&Value> {
        self.args.get(i)
    }

    /// Scoped data accessor for this instance.
    pub fn data(&self) -> Data<'_> {
        Data::new(self.core)
    }

    /// Shorthand for `data().get(name)`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.data().get(name)
    }

    /// Shorthand for `data().set(name, value)`; failure to find a visible
    /// variable is logged and dropped.
    pub fn set(&self, name: &str, value: Value) {
        if let Err(err) = self.data().set(name, value) {
            tracing::warn!(
                target: "trellis::hooks",
                instance = %self.core.id,
                state = self.state_name(),
                %err,
                "data write dropped"
            );
        }
    }

    /// Issue a full navigation request against this instance.
    ///
    /// Mid-cascade requests against the same instance are queued and run
    /// after the current cascade settles; failures surface in the log, not
    /// here.
    pub fn go(&self, expr: &str) {
        self.submit(RequestKind::Go, expr, Vec::new());
    }

    /// Issue a targeted request with arguments against this instance.
    pub fn target(&self, expr: &str, args: Vec<Value>) {
        self.submit(RequestKind::Target, expr, args);
    }

    fn submit(&self, kind: RequestKind, expr: &str, args: Vec<Value>) {
        if let Err(err) = navigator::submit(self.core, kind, expr, args) {
            tracing::warn!(
                target: "trellis::hooks",
                instance = %self.core.id,
                state = self.state_name(),
                expr,
                %err,
                "hook-issued request failed"
            );
        }
    }

    /// Redirect the in-progress transition to a different destination.
    ///
    /// Only exit hooks may redirect; the runtime abandons the old
    /// destination and restarts resolution from the instance's current
    /// position. Calls from other hook slots are logged and ignored.
    pub fn redirect(&mut self, expr: impl Into<String>) {
        if self.phase != HookPhase::Exit {
            tracing::warn!(
                target: "trellis::hooks",
                instance = %self.core.id,
                state = self.state_name(),
                "redirect outside an exit hook ignored"
            );
            return;
        }
        self.redirect = Some(expr.into());
    }

    /// Register a timed continuation: after `after` elapses with the
    /// instance still resting on this state, issue `go(expr)`.
    ///
    /// Only entry hooks of pendable states may pend; a later transition
    /// away (or a newer pend) cancels the continuation. Calls from other
    /// slots are logged and ignored.
    pub fn pend(&mut self, after: Duration, expr: impl Into<String>) {
        if self.phase != HookPhase::Enter {
            tracing::warn!(
                target: "trellis::hooks",
                instance = %self.core.id,
                state = self.state_name(),
                "pend outside an entry hook ignored"
            );
            return;
        }
        self.pend = Some((after, expr.into()));
    }

    /// Create a sub-instance of `program` owned by this instance.
    ///
    /// The sub is registered with this instance in creation order and runs
    /// its ignition cascade before the call returns.
    pub fn spawn(&self, program: &Rc<Program>) -> Instance {
        crate::scheduler::spawn_sub(self.core, program)
    }

    /// Capture query over this instance's sub-registry.
    pub fn capture(&self, criteria: &Capture) -> Vec<Instance> {
        crate::registry::capture(self.core, criteria)
    }

    /// Capture using the innermost capture criteria declared on the current
    /// path (defaults to [`Capture::All`]).
    pub fn capture_scoped(&self) -> Vec<Instance> {
        let criteria = self.scoped_criteria();
        crate::registry::capture(self.core, &criteria)
    }

    fn scoped_criteria(&self) -> Capture {
        let st = self.core.state.borrow();
        st.path
            .iter()
            .rev()
            .find_map(|&id| self.core.program.node(id).attrs.capture.clone())
            .unwrap_or(Capture::All)
    }

    /// Deregister subs from this instance's registry without destroying
    /// them.
    pub fn remove(&self, ids: &[uuid::Uuid]) {
        crate::registry::remove(self.core, ids);
    }

    /// Handle on this instance's owner, when it has one and the owner is
    /// still alive.
    pub fn owner(&self) -> Option<Instance> {
        let owner = self.core.state.borrow().owner.upgrade()?;
        Some(Instance::from_core(owner))
    }

    /// Bind a callback handle to `expr`, anchored at this state.
    ///
    /// The returned handle is `Send + Sync` and may outlive the current
    /// path; firing it after the instance has navigated away (or been
    /// destroyed) is a logged no-op.
    ///
    /// `expr` may carry `|`-separated alternative targets; firing the
    /// handle picks the first alternative not already on the current path
    /// (toggle semantics) unless the caller selects one explicitly.
    pub fn callbacks(&self, expr: &str) -> Result<Callback, ResolutionError> {
        crate::callbacks::bind(self.core, self.node, expr)
    }

    /// Snapshot of this instance's current path, phase and trail.
    pub fn status(&self) -> Status {
        crate::instance::status(self.core)
    }

    /// This instance's id.
    pub fn id(&self) -> uuid::Uuid {
        self.core.id
    }

    /// Public handle on the instance this hook runs against.
    pub fn instance(&self) -> Instance {
        Instance::from_core(Rc::clone(self.core))
    }
}
