//! Stable callback binding.
//!
//! A [`Callback`] is a `Send + Sync` handle bound to an instance, an anchor
//! state, and one or more alternative target expressions. Firing it does not
//! touch instance state directly: it posts a [`CallbackFired`] event onto
//! the scheduler's channel, and the next pump turns the event into an
//! ordinary targeted request — resolved from the *anchor* state, so the
//! binding survives any navigation the instance performed in between.
//!
//! Firing a handle whose instance has been destroyed (or dropped) is a
//! logged no-op.

use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use crate::instance::InstanceCore;
use crate::path::{PathExpr, ResolutionError};
use crate::tree::NodeId;

/// One `|`-separated alternative of a callback binding.
#[derive(Debug, Clone)]
pub(crate) struct BoundTarget {
    pub raw: String,
    pub expr: PathExpr,
}

/// Event posted when a callback handle fires.
#[derive(Debug, Clone)]
pub(crate) struct CallbackFired {
    pub instance: Uuid,
    pub base: NodeId,
    pub targets: Vec<BoundTarget>,
    /// Explicit alternative chosen by [`Callback::invoke_nth`]; `None`
    /// selects by toggle.
    pub selector: Option<usize>,
    pub args: Vec<Value>,
}

/// A detached, thread-safe handle that navigates its instance when fired.
///
/// With several `|`-separated alternatives, [`invoke`](Callback::invoke)
/// picks the first alternative not already on the instance's current path
/// (toggle semantics); [`invoke_nth`](Callback::invoke_nth) picks one
/// explicitly.
#[derive(Clone)]
pub struct Callback {
    instance: Uuid,
    base: NodeId,
    targets: Vec<BoundTarget>,
    tx: flume::Sender<CallbackFired>,
}

impl Callback {
    /// Fire the handle with toggle selection.
    pub fn invoke(&self, args: Vec<Value>) {
        self.post(None, args);
    }

    /// Fire the handle, explicitly selecting the `n`-th alternative.
    pub fn invoke_nth(&self, n: usize, args: Vec<Value>) {
        self.post(Some(n), args);
    }

    /// Raw text of the bound alternatives.
    pub fn targets(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.raw.as_str()).collect()
    }

    fn post(&self, selector: Option<usize>, args: Vec<Value>) {
        let fired = CallbackFired {
            instance: self.instance,
            base: self.base,
            targets: self.targets.clone(),
            selector,
            args,
        };
        if self.tx.send(fired).is_err() {
            tracing::debug!(
                target: "trellis::callbacks",
                instance = %self.instance,
                "callback fired after scheduler shutdown; dropped"
            );
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("instance", &self.instance)
            .field("base", &self.base)
            .field("targets", &self.targets())
            .finish()
    }
}

/// Bind a callback handle for `core`, anchored at `base`.
pub(crate) fn bind(
    core: &InstanceCore,
    base: NodeId,
    expr: &str,
) -> Result<Callback, ResolutionError> {
    let mut targets = Vec::new();
    for piece in expr.split('|') {
        let raw = piece.trim();
        targets.push(BoundTarget {
            raw: raw.to_string(),
            expr: PathExpr::parse(raw)?,
        });
    }
    tracing::trace!(
        target: "trellis::callbacks",
        instance = %core.id,
        anchor = core.program.node(base).name(),
        expr,
        "callback bound"
    );
    Ok(Callback {
        instance: core.id,
        base,
        targets,
        tx: core.sched.callback_sender(),
    })
}
