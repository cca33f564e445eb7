//! The run-to-completion scheduler.
//!
//! A [`Scheduler`] owns the table of live instances, the stack of running
//! cascades (used to classify request callers), pended continuation timers,
//! and the channel that detached [`Callback`](crate::callbacks::Callback)
//! handles fire into.
//!
//! All instance work happens on the scheduler's thread. Callback handles
//! may fire from anywhere; the events they post are turned into ordinary
//! requests by [`pump`](Scheduler::pump) or, together with due timers, by
//! the async [`run_until_idle`](Scheduler::run_until_idle) loop.
//!
//! # Examples
//!
//! ```
//! use trellis::program::StateSpec;
//! use trellis::scheduler::Scheduler;
//! use trellis::tree::Program;
//!
//! let program = Program::compile(StateSpec::new().child("a", StateSpec::new())).unwrap();
//! let sched = Scheduler::new();
//! let inst = sched.create(&program).unwrap();
//! let cb = inst.bind_callback("a").unwrap();
//! cb.invoke(vec![]);
//! sched.pump();
//! assert_eq!(inst.status().path, vec!["program", "a"]);
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::instrument;
use uuid::Uuid;

use crate::callbacks::CallbackFired;
use crate::instance::{Instance, InstanceCore};
use crate::navigator::{self, Origin, Request, RequestKind, TransitionError};
use crate::path::{self, PathExpr, ResolvedTarget};
use crate::tree::{NodeId, Program};

struct Timer {
    deadline: tokio::time::Instant,
    instance: Uuid,
    seq: u64,
    node: NodeId,
    raw: String,
    expr: PathExpr,
}

pub(crate) struct SchedCore {
    instances: RefCell<FxHashMap<Uuid, Weak<InstanceCore>>>,
    /// Ids of instances whose cascades are currently running, innermost
    /// last.
    cascade_stack: RefCell<Vec<Uuid>>,
    timers: RefCell<Vec<Timer>>,
    tx: flume::Sender<CallbackFired>,
    rx: flume::Receiver<CallbackFired>,
}

impl SchedCore {
    pub(crate) fn current_cascade(&self) -> Option<Uuid> {
        self.cascade_stack.borrow().last().copied()
    }

    pub(crate) fn push_cascade(&self, id: Uuid) {
        self.cascade_stack.borrow_mut().push(id);
    }

    pub(crate) fn pop_cascade(&self) {
        self.cascade_stack.borrow_mut().pop();
    }

    pub(crate) fn callback_sender(&self) -> flume::Sender<CallbackFired> {
        self.tx.clone()
    }

    pub(crate) fn schedule_pend(
        &self,
        instance: Uuid,
        seq: u64,
        node: NodeId,
        raw: String,
        expr: PathExpr,
        after: Duration,
    ) {
        self.timers.borrow_mut().push(Timer {
            deadline: tokio::time::Instant::now() + after,
            instance,
            seq,
            node,
            raw,
            expr,
        });
    }

    /// Drop the timer backing a cancelled or superseded continuation.
    pub(crate) fn drop_pend(&self, instance: Uuid, seq: u64) {
        self.timers
            .borrow_mut()
            .retain(|t| !(t.instance == instance && t.seq == seq));
    }

    pub(crate) fn forget(&self, id: Uuid) {
        self.instances.borrow_mut().remove(&id);
        self.timers.borrow_mut().retain(|t| t.instance != id);
    }

    fn lookup(&self, id: Uuid) -> Option<Rc<InstanceCore>> {
        self.instances.borrow().get(&id)?.upgrade()
    }

    fn register(&self, core: &Rc<InstanceCore>) {
        self.instances
            .borrow_mut()
            .insert(core.id, Rc::downgrade(core));
    }
}

/// Create a sub-instance owned by `owner` and run its ignition cascade.
pub(crate) fn spawn_sub(owner: &Rc<InstanceCore>, program: &Rc<Program>) -> Instance {
    let core = InstanceCore::new(program, &owner.sched, Rc::downgrade(owner));
    owner.sched.register(&core);
    owner.state.borrow_mut().subs.push(Rc::clone(&core));
    tracing::debug!(
        target: "trellis::scheduler",
        owner = %owner.id,
        sub = %core.id,
        "sub-instance spawned"
    );
    if let Err(err) = navigator::ignite(&core) {
        tracing::warn!(
            target: "trellis::scheduler",
            sub = %core.id,
            %err,
            "sub-instance ignition failed"
        );
    }
    Instance::from_core(core)
}

/// Front door of the runtime: creates instances and pumps external events.
///
/// Cloning shares the same underlying scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedCore>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Scheduler {
            inner: Rc::new(SchedCore {
                instances: RefCell::new(FxHashMap::default()),
                cascade_stack: RefCell::new(Vec::new()),
                timers: RefCell::new(Vec::new()),
                tx,
                rx,
            }),
        }
    }

    /// Create a top-level instance of `program` and run its ignition
    /// cascade to the first stable path.
    ///
    /// # Errors
    ///
    /// The first [`TransitionError`] hit while igniting; the instance is
    /// not returned in that case.
    #[instrument(skip_all)]
    pub fn create(&self, program: &Rc<Program>) -> Result<Instance, TransitionError> {
        let core = InstanceCore::new(program, &self.inner, Weak::new());
        self.inner.register(&core);
        tracing::debug!(
            target: "trellis::scheduler",
            instance = %core.id,
            "instance created"
        );
        navigator::ignite(&core)?;
        Ok(Instance::from_core(core))
    }

    /// Deliver every callback event already sitting in the channel.
    ///
    /// Each event becomes a targeted request resolved from the state the
    /// callback was bound on; events for destroyed instances are dropped
    /// with a log line.
    #[instrument(skip_all)]
    pub fn pump(&self) {
        while let Ok(fired) = self.inner.rx.try_recv() {
            self.deliver(fired);
        }
    }

    /// Drive callbacks and pended continuations until neither is
    /// outstanding.
    ///
    /// Requires a tokio runtime; pairs with `tokio::time::pause` for
    /// deterministic timer tests.
    #[instrument(skip_all)]
    pub async fn run_until_idle(&self) {
        loop {
            self.pump();
            self.fire_due_timers();

            let next_deadline = self
                .inner
                .timers
                .borrow()
                .iter()
                .map(|t| t.deadline)
                .min();
            if next_deadline.is_none() && self.inner.rx.is_empty() {
                return;
            }

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = tokio::time::sleep_until(deadline) => {}
                        fired = self.inner.rx.recv_async() => {
                            if let Ok(fired) = fired {
                                self.deliver(fired);
                            }
                        }
                    }
                }
                None => {
                    if let Ok(fired) = self.inner.rx.recv_async().await {
                        self.deliver(fired);
                    }
                }
            }
        }
    }

    fn fire_due_timers(&self) {
        let now = tokio::time::Instant::now();
        let due: Vec<Timer> = {
            let mut timers = self.inner.timers.borrow_mut();
            let mut due = Vec::new();
            let mut i = 0;
            while i < timers.len() {
                if timers[i].deadline <= now {
                    due.push(timers.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due.sort_by_key(|t| t.deadline);
            due
        };
        for timer in due {
            match self.inner.lookup(timer.instance) {
                Some(core) => {
                    navigator::fire_pend(&core, timer.seq, timer.node, timer.raw, timer.expr);
                }
                None => {
                    tracing::trace!(
                        target: "trellis::scheduler",
                        instance = %timer.instance,
                        "timer for a gone instance dropped"
                    );
                }
            }
        }
    }

    fn deliver(&self, fired: CallbackFired) {
        let Some(core) = self.inner.lookup(fired.instance) else {
            tracing::debug!(
                target: "trellis::scheduler",
                instance = %fired.instance,
                "stale callback dropped"
            );
            return;
        };

        let chosen = match fired.selector {
            Some(n) => match fired.targets.get(n) {
                Some(t) => t.clone(),
                None => {
                    tracing::warn!(
                        target: "trellis::scheduler",
                        instance = %fired.instance,
                        selector = n,
                        alternatives = fired.targets.len(),
                        "callback selector out of range"
                    );
                    return;
                }
            },
            None => select_toggle(&core, fired.base, &fired.targets),
        };

        let req = Request {
            raw: chosen.raw.clone(),
            expr: chosen.expr.clone(),
            kind: RequestKind::Target,
            args: fired.args,
            base: Some(fired.base),
            origin: Origin::External,
            hops: 0,
        };
        if let Err(err) = navigator::submit_request(&core, req) {
            tracing::warn!(
                target: "trellis::scheduler",
                instance = %core.id,
                expr = %chosen.raw,
                %err,
                "callback request failed"
            );
        }
    }
}

/// Toggle selection: the first alternative whose destination is not already
/// on the instance's current path; falls back to the first alternative.
fn select_toggle(
    core: &InstanceCore,
    base: NodeId,
    targets: &[crate::callbacks::BoundTarget],
) -> crate::callbacks::BoundTarget {
    for t in targets {
        match path::resolve(&core.program, base, &t.expr) {
            Ok(ResolvedTarget::Node(id)) => {
                if !core.state.borrow().path.contains(&id) {
                    return t.clone();
                }
            }
            Ok(ResolvedTarget::Terminate) => return t.clone(),
            Err(err) => {
                tracing::trace!(
                    target: "trellis::scheduler",
                    instance = %core.id,
                    expr = %t.raw,
                    %err,
                    "unresolvable callback alternative skipped"
                );
            }
        }
    }
    targets[0].clone()
}
