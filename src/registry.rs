//! Live sub-instance registry and capture queries.
//!
//! An owner instance tracks the sub-instances its hooks created, in creation
//! order. [`Capture`] criteria filter that collection against the subs'
//! *live* current paths — membership is evaluated fresh on every query,
//! never cached, so a sub that navigates between two calls can move in and
//! out of a filtered view.
//!
//! Removal from the registry does not destroy a sub; destroying a sub
//! always removes it from its owner's registry.

use std::fmt;
use std::rc::Rc;

use uuid::Uuid;

use crate::instance::{Instance, InstanceCore, Phase};

/// Criteria for a capture query over an owner's sub-instances.
///
/// # Examples
///
/// ```
/// use trellis::registry::Capture;
///
/// // All tracked subs, creation order.
/// let all = Capture::All;
///
/// // Subs whose current path passes through a state named `item`.
/// let within: Capture = "item".into();
///
/// // Arbitrary predicate over the names on the current path.
/// let deep = Capture::predicate(|path| path.len() > 2);
/// # let _ = (all, within, deep);
/// ```
pub enum Capture {
    /// Every tracked sub, in creation order.
    All,
    /// Subs whose current path contains a state with this name — the state
    /// itself or anywhere within its subtree.
    Within(String),
    /// Subs whose current path (root-to-leaf state names) satisfies the
    /// predicate.
    Predicate(Rc<dyn Fn(&[&str]) -> bool>),
}

impl Capture {
    /// Build a predicate criterion from a closure over the current path.
    pub fn predicate(f: impl Fn(&[&str]) -> bool + 'static) -> Self {
        Capture::Predicate(Rc::new(f))
    }
}

impl Clone for Capture {
    fn clone(&self) -> Self {
        match self {
            Capture::All => Capture::All,
            Capture::Within(name) => Capture::Within(name.clone()),
            Capture::Predicate(f) => Capture::Predicate(Rc::clone(f)),
        }
    }
}

impl fmt::Debug for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capture::All => write!(f, "Capture::All"),
            Capture::Within(name) => write!(f, "Capture::Within({name:?})"),
            Capture::Predicate(_) => write!(f, "Capture::Predicate(..)"),
        }
    }
}

impl From<&str> for Capture {
    fn from(name: &str) -> Self {
        Capture::Within(name.to_string())
    }
}

/// True when `sub`'s live current path satisfies `criteria`.
pub(crate) fn matches(sub: &InstanceCore, criteria: &Capture) -> bool {
    let st = sub.state.borrow();
    if st.phase == Phase::Destroyed {
        return false;
    }
    match criteria {
        Capture::All => true,
        Capture::Within(name) => st
            .path
            .iter()
            .any(|&id| sub.program.node(id).name == *name),
        Capture::Predicate(f) => {
            let names: Vec<&str> = st
                .path
                .iter()
                .map(|&id| sub.program.node(id).name.as_str())
                .collect();
            f(&names)
        }
    }
}

/// Evaluate a capture query against `owner`'s registry.
///
/// Creation order is preserved; the result is stable across calls unless
/// subs are added or removed in between.
pub(crate) fn capture(owner: &InstanceCore, criteria: &Capture) -> Vec<Instance> {
    let subs: Vec<Rc<InstanceCore>> = owner.state.borrow().subs.to_vec();
    subs.into_iter()
        .filter(|sub| matches(sub, criteria))
        .map(Instance::from_core)
        .collect()
}

/// Deregister `ids` from `owner`'s registry without destroying them.
pub(crate) fn remove(owner: &InstanceCore, ids: &[Uuid]) {
    let mut st = owner.state.borrow_mut();
    let before = st.subs.len();
    st.subs.retain(|sub| !ids.contains(&sub.id));
    let removed = before - st.subs.len();
    if removed > 0 {
        tracing::debug!(
            target: "trellis::registry",
            owner = %owner.id,
            removed,
            remaining = st.subs.len(),
            "subs deregistered"
        );
    }
}

/// Deregister a single sub as part of its destruction.
pub(crate) fn deregister_destroyed(owner: &InstanceCore, sub: Uuid) {
    remove(owner, &[sub]);
}
