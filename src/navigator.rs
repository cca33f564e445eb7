//! Transition cascades: resolution, access control, exit/entry hook runs,
//! bypass interception, redirection, and destruction.
//!
//! A request names a destination with a path expression. Driving it:
//!
//! 1. resolve the expression against the request's base state,
//! 2. let bypass-marked states intercept transitions that would skip over
//!    them (the superseded request is retried afterwards),
//! 3. check access control over every state the cascade will cross, before
//!    any hook runs,
//! 4. run exit hooks from the current leaf up to (excluding) the least
//!    common ancestor, then entry hooks down to the target,
//! 5. run the target's on-target action and settle.
//!
//! Exit hooks may redirect the in-flight transition; redirection and bypass
//! interception each consume one hop against [`HOP_LIMIT`]. Requests issued
//! by hooks against the same instance are queued and drained after the
//! running cascade settles; the instance is observable only at rest.

use std::rc::Rc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::hooks::{HookCx, HookPhase};
use crate::instance::{DataFrame, InstanceCore, Phase, TrailEntry};
use crate::path::{self, PathExpr, ResolutionError, ResolvedTarget};
use crate::tree::{Action, CompiledOwner, Directive, NodeId, HOP_LIMIT};

/// How a request treats its destination once reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    /// Full navigation; a no-op request re-runs the leaf's entry action.
    Go,
    /// Full navigation carrying arguments for the destination's on-target
    /// hook; a no-op request runs only that hook.
    Target,
}

/// Who issued a request, relative to the instance being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// No instance cascade was running: host code or a pumped callback.
    External,
    /// Issued from a hook of the identified instance.
    Instance(Uuid),
    /// Owner notification from a sub (the sub may already be destroyed and
    /// deregistered, so it is classified by marker, not by id).
    Sub,
}

/// Caller category resolved against the target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerCategory {
    Own,
    Owner,
    Sub,
    External,
}

impl std::fmt::Display for CallerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallerCategory::Own => "own",
            CallerCategory::Owner => "owner",
            CallerCategory::Sub => "sub",
            CallerCategory::External => "external",
        };
        f.write_str(s)
    }
}

/// A navigation request, parsed and ready to drive.
#[derive(Debug, Clone)]
pub(crate) struct Request {
    pub raw: String,
    pub expr: PathExpr,
    pub kind: RequestKind,
    pub args: Vec<Value>,
    /// Resolution base; `None` means the instance's leaf at drive time.
    pub base: Option<NodeId>,
    pub origin: Origin,
    pub hops: u32,
}

/// Errors that reject a transition request.
///
/// A rejected request runs no hook: the instance rests unchanged at its
/// prior stable path.
#[derive(Debug, Error, Diagnostic)]
pub enum TransitionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolution(#[from] ResolutionError),

    /// An access-controlled state on the cascade route denies the caller.
    #[error("access denied: `{state}` rejects {category} callers")]
    #[diagnostic(
        code(trellis::navigator::access_denied),
        help("the state's access mode excludes this caller category")
    )]
    AccessDenied {
        state: String,
        category: CallerCategory,
    },

    /// Chained bypass interceptions / redirections exceeded the hop bound.
    #[error("transition exceeded the hop limit ({limit})")]
    #[diagnostic(
        code(trellis::navigator::hop_limit),
        help("bypass and redirect markers are looping; check their targets")
    )]
    HopLimit { limit: u32 },

    /// The instance was already destroyed.
    #[error("instance is destroyed")]
    #[diagnostic(code(trellis::navigator::destroyed))]
    Destroyed,
}

/// Parse and run (or queue) a request against `core`.
pub(crate) fn submit(
    core: &Rc<InstanceCore>,
    kind: RequestKind,
    raw: &str,
    args: Vec<Value>,
) -> Result<(), TransitionError> {
    let expr = PathExpr::parse(raw)?;
    let origin = match core.sched.current_cascade() {
        Some(id) => Origin::Instance(id),
        None => Origin::External,
    };
    submit_request(
        core,
        Request {
            raw: raw.to_string(),
            expr,
            kind,
            args,
            base: None,
            origin,
            hops: 0,
        },
    )
}

/// Run (or queue) an already-parsed request against `core`.
pub(crate) fn submit_request(
    core: &Rc<InstanceCore>,
    req: Request,
) -> Result<(), TransitionError> {
    {
        let mut st = core.state.borrow_mut();
        if st.phase == Phase::Destroyed {
            return Err(TransitionError::Destroyed);
        }
        if st.in_cascade {
            tracing::trace!(
                target: "trellis::navigator",
                instance = %core.id,
                expr = %req.raw,
                "request queued behind running cascade"
            );
            st.queued.push_back(req);
            return Ok(());
        }
        st.in_cascade = true;
    }
    core.sched.push_cascade(core.id);

    let result = drive(core, req);

    // Drain requests queued by hooks during the cascade. Their failures do
    // not undo the settled transition; they surface in the log.
    loop {
        let next = {
            let mut st = core.state.borrow_mut();
            if st.phase == Phase::Destroyed {
                st.queued.clear();
            }
            st.queued.pop_front()
        };
        let Some(next) = next else { break };
        let raw = next.raw.clone();
        if let Err(err) = drive(core, next) {
            tracing::warn!(
                target: "trellis::navigator",
                instance = %core.id,
                expr = %raw,
                %err,
                "queued request failed"
            );
        }
    }

    core.sched.pop_cascade();
    let phase = {
        let mut st = core.state.borrow_mut();
        st.in_cascade = false;
        st.phase
    };
    let owner_directive = rest_owner_directive(core);

    // Owner routing once a sub comes to rest. Ignition cascades stay quiet.
    if phase == Phase::Active {
        if let Some((owner, directive)) = owner_directive {
            notify_owner(core, &owner, &directive);
        }
    }
    result
}

/// The innermost owner directive on `core`'s current path, paired with the
/// owner, when routing applies.
fn rest_owner_directive(core: &InstanceCore) -> Option<(Rc<InstanceCore>, Directive)> {
    let st = core.state.borrow();
    let owner = st.owner.upgrade()?;
    let directive = st
        .path
        .iter()
        .rev()
        .find_map(|&id| core.program.node(id).attrs.owner.clone())?;
    match directive {
        CompiledOwner::Notify(d) => Some((owner, d)),
        CompiledOwner::Mute => None,
    }
}

fn notify_owner(sub: &InstanceCore, owner: &Rc<InstanceCore>, directive: &Directive) {
    tracing::debug!(
        target: "trellis::navigator",
        sub = %sub.id,
        owner = %owner.id,
        expr = %directive.raw,
        "routing owner"
    );
    let req = Request {
        raw: directive.raw.clone(),
        expr: directive.expr.clone(),
        kind: RequestKind::Go,
        args: Vec::new(),
        base: None,
        origin: Origin::Sub,
        hops: 0,
    };
    if let Err(err) = submit_request(owner, req) {
        tracing::warn!(
            target: "trellis::navigator",
            owner = %owner.id,
            expr = %directive.raw,
            %err,
            "owner routing failed"
        );
    }
}

/// Drive one request to rest, following bypass interceptions and exit-hook
/// redirections.
fn drive(core: &Rc<InstanceCore>, mut req: Request) -> Result<(), TransitionError> {
    loop {
        if core.state.borrow().phase == Phase::Destroyed {
            return Err(TransitionError::Destroyed);
        }
        if req.hops > HOP_LIMIT {
            return Err(TransitionError::HopLimit { limit: HOP_LIMIT });
        }

        let base = req.base.unwrap_or_else(|| core.leaf());
        let resolved = path::resolve(&core.program, base, &req.expr)?;

        // Terminate sorts before every state for travel-direction purposes.
        let target_order: i64 = match resolved {
            ResolvedTarget::Node(id) => id as i64,
            ResolvedTarget::Terminate => -1,
        };

        if let Some((bnode, directive)) = find_bypass(core, target_order, &resolved) {
            tracing::debug!(
                target: "trellis::navigator",
                instance = %core.id,
                at = core.program.node(bnode).name(),
                expr = %directive.raw,
                superseded = %req.raw,
                "bypass interception"
            );
            let hops = req.hops + 1;
            // The superseded request is retried after the interception.
            {
                let mut st = core.state.borrow_mut();
                req.hops = hops;
                st.queued.push_front(req);
            }
            req = Request {
                raw: directive.raw.clone(),
                expr: directive.expr.clone(),
                kind: RequestKind::Go,
                args: Vec::new(),
                base: Some(bnode),
                origin: Origin::Instance(core.id),
                hops,
            };
            continue;
        }

        match resolved {
            ResolvedTarget::Terminate => return destroy(core, &req),
            ResolvedTarget::Node(target) => match cascade_to(core, &req, target)? {
                Drove::Settled => return Ok(()),
                Drove::Redirected(next) => req = next,
            },
        }
    }
}

enum Drove {
    Settled,
    Redirected(Request),
}

/// Find the bypass-marked state nearest to the current leaf, in travel
/// direction, that this transition would skip over.
fn find_bypass(
    core: &InstanceCore,
    target_order: i64,
    resolved: &ResolvedTarget,
) -> Option<(NodeId, Directive)> {
    let st = core.state.borrow();
    let leaf_order = st.path.last().copied().unwrap_or(core.program.root()) as i64;
    if target_order == leaf_order {
        return None;
    }
    let forward = target_order > leaf_order;
    let (lo, hi) = if forward {
        (leaf_order, target_order)
    } else {
        (target_order, leaf_order)
    };

    let target_chain: Vec<NodeId> = match resolved {
        ResolvedTarget::Node(id) => core.program.chain(*id),
        ResolvedTarget::Terminate => Vec::new(),
    };

    let mut best: Option<(NodeId, Directive)> = None;
    for &bnode in &core.program.bypass_nodes {
        let order = bnode as i64;
        if order <= lo || order >= hi {
            continue;
        }
        // States the cascade passes *through* are entered or exited, not
        // skipped.
        if st.path.contains(&bnode) || target_chain.contains(&bnode) {
            continue;
        }
        let attrs = &core.program.node(bnode).attrs;
        let directive = if forward {
            attrs.bypass_forward.as_ref()
        } else {
            attrs.bypass_backward.as_ref()
        };
        let Some(directive) = directive else { continue };
        // Nearest in travel direction: first encountered leaving the
        // current position.
        let closer = match best {
            None => true,
            Some((b, _)) if forward => bnode < b,
            Some((b, _)) => bnode > b,
        };
        if closer {
            best = Some((bnode, directive.clone()));
        }
    }

    best
}

/// Classify the request's origin relative to `core`.
fn classify(core: &InstanceCore, origin: Origin) -> CallerCategory {
    match origin {
        Origin::External => CallerCategory::External,
        Origin::Sub => CallerCategory::Sub,
        Origin::Instance(id) if id == core.id => CallerCategory::Own,
        Origin::Instance(id) => {
            let st = core.state.borrow();
            if st.owner.upgrade().is_some_and(|o| o.id == id) {
                CallerCategory::Owner
            } else if st.subs.iter().any(|s| s.id == id) {
                CallerCategory::Sub
            } else {
                CallerCategory::External
            }
        }
    }
}

fn check_access(
    core: &InstanceCore,
    category: CallerCategory,
    nodes: &[NodeId],
) -> Result<(), TransitionError> {
    if category == CallerCategory::Own {
        return Ok(());
    }
    for &id in nodes {
        let perms = core.program.node(id).attrs.perms;
        let allowed = match category {
            CallerCategory::Own => true,
            CallerCategory::Owner => perms.owner,
            CallerCategory::Sub => perms.sub,
            CallerCategory::External => perms.external,
        };
        if !allowed {
            return Err(TransitionError::AccessDenied {
                state: core.program.node(id).name().to_string(),
                category,
            });
        }
    }
    Ok(())
}

fn push_trail(core: &InstanceCore, raw: &str) {
    core.state.borrow_mut().trail.push(TrailEntry {
        when: chrono::Utc::now(),
        expr: raw.to_string(),
    });
}

/// Run the exit/entry cascade taking `core` to `target`.
fn cascade_to(
    core: &Rc<InstanceCore>,
    req: &Request,
    target: NodeId,
) -> Result<Drove, TransitionError> {
    let leaf = core.leaf();

    if target == leaf && !core.state.borrow().path.is_empty() {
        // Already resting on the destination.
        check_access(core, classify(core, req.origin), &[target])?;
        // Only an accepted drive supersedes a pending continuation; a
        // rejected request leaves it armed.
        cancel_pend(core);
        push_trail(core, &req.raw);
        match req.kind {
            RequestKind::Go => {
                // A no-op go refreshes the leaf: entry behavior without the
                // exit/entry cascade or the on-target action.
                run_entry_action(core, target);
                let attrs = &core.program.node(target).attrs;
                if attrs.sequence {
                    sequence_walk(core, target);
                } else if attrs.gate {
                    gate_run(core, target);
                }
            }
            RequestKind::Target => {
                run_on_action(core, target, &req.args);
            }
        }
        return Ok(Drove::Settled);
    }

    let target_chain = core.program.chain(target);
    let (exits, entries) = {
        let st = core.state.borrow();
        split_route(&st.path, &target_chain, core.program.root())
    };

    let category = classify(core, req.origin);
    let mut crossed = exits.clone();
    crossed.extend(&entries);
    check_access(core, category, &crossed)?;

    // Only an accepted drive supersedes a pending continuation; a rejected
    // request leaves it armed.
    cancel_pend(core);
    push_trail(core, &req.raw);
    tracing::debug!(
        target: "trellis::navigator",
        instance = %core.id,
        expr = %req.raw,
        to = core.program.node(target).name(),
        exits = exits.len(),
        entries = entries.len(),
        "cascade"
    );

    // Exit phase, leaf upward. Exit hooks may redirect.
    for &node in &exits {
        let outcome = run_action_hook(core, node, HookPhase::Exit, &[]);
        pop_state(core, node);
        if let Some(expr) = outcome.redirect {
            match PathExpr::parse(&expr) {
                Ok(parsed) => {
                    tracing::debug!(
                        target: "trellis::navigator",
                        instance = %core.id,
                        from = core.program.node(node).name(),
                        to = %expr,
                        "exit redirect"
                    );
                    return Ok(Drove::Redirected(Request {
                        raw: expr,
                        expr: parsed,
                        kind: req.kind,
                        args: req.args.clone(),
                        base: None,
                        origin: req.origin,
                        hops: req.hops + 1,
                    }));
                }
                Err(err) => {
                    tracing::warn!(
                        target: "trellis::navigator",
                        instance = %core.id,
                        expr,
                        %err,
                        "unparseable redirect ignored"
                    );
                }
            }
        }
    }

    // Entry phase, downward to the target.
    for &node in &entries {
        push_state(core, node);
        run_entry_action(core, node);

        let attrs = &core.program.node(node).attrs;
        if attrs.sequence {
            sequence_walk(core, node);
        } else if attrs.gate {
            gate_run(core, node);
        }
    }

    // Arrival: the destination's on-target action runs for both request
    // kinds; only a targeted request carries arguments.
    match req.kind {
        RequestKind::Go => run_on_action(core, target, &[]),
        RequestKind::Target => run_on_action(core, target, &req.args),
    }

    Ok(Drove::Settled)
}

/// Split the route into exits (leaf upward, least common ancestor excluded)
/// and entries (downward from below the ancestor to the target).
fn split_route(
    path: &[NodeId],
    target_chain: &[NodeId],
    root: NodeId,
) -> (Vec<NodeId>, Vec<NodeId>) {
    let effective: Vec<NodeId> = if path.is_empty() { vec![root] } else { path.to_vec() };
    let common = effective
        .iter()
        .zip(target_chain.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let exits: Vec<NodeId> = effective[common..].iter().rev().copied().collect();
    let entries: Vec<NodeId> = target_chain[common..].to_vec();
    (exits, entries)
}

struct HookOutcome {
    redirect: Option<String>,
    pend: Option<(std::time::Duration, String)>,
}

/// Run the hook in `node`'s slot for `phase`, when one is declared there.
fn run_action_hook(
    core: &Rc<InstanceCore>,
    node: NodeId,
    phase: HookPhase,
    args: &[Value],
) -> HookOutcome {
    let action = {
        let attrs = &core.program.node(node).attrs;
        match phase {
            HookPhase::Enter => attrs.enter.clone(),
            HookPhase::On => attrs.on.clone(),
            HookPhase::Exit => attrs.exit.clone(),
        }
    };
    let mut outcome = HookOutcome {
        redirect: None,
        pend: None,
    };
    match action {
        None => {}
        Some(Action::Hook(hook)) => {
            let mut cx = HookCx::new(core, node, phase, args);
            hook(&mut cx);
            outcome.redirect = cx.redirect.take();
            outcome.pend = cx.pend.take();
        }
        Some(Action::Go(d)) => enqueue_directive(core, node, RequestKind::Go, &d, Vec::new()),
        Some(Action::Target(d)) => {
            enqueue_directive(core, node, RequestKind::Target, &d, args.to_vec())
        }
    }
    outcome
}

/// Shorthand directives queue a follow-up request resolved from the state
/// that declares them; it runs once the current cascade settles.
fn enqueue_directive(
    core: &InstanceCore,
    node: NodeId,
    kind: RequestKind,
    directive: &Directive,
    args: Vec<Value>,
) {
    core.state.borrow_mut().queued.push_back(Request {
        raw: directive.raw.clone(),
        expr: directive.expr.clone(),
        kind,
        args,
        base: Some(node),
        origin: Origin::Instance(core.id),
        hops: 0,
    });
}

fn run_entry_action(core: &Rc<InstanceCore>, node: NodeId) {
    let outcome = run_action_hook(core, node, HookPhase::Enter, &[]);
    if let Some((after, expr)) = outcome.pend {
        if core.program.node(node).attrs.pendable {
            register_pend(core, node, after, &expr);
        } else {
            tracing::warn!(
                target: "trellis::navigator",
                instance = %core.id,
                state = core.program.node(node).name(),
                "pend on a state without the pendable marker ignored"
            );
        }
    }
}

fn run_on_action(core: &Rc<InstanceCore>, node: NodeId, args: &[Value]) {
    run_action_hook(core, node, HookPhase::On, args);
}

fn push_state(core: &InstanceCore, node: NodeId) {
    let mut st = core.state.borrow_mut();
    st.path.push(node);
    let vars = &core.program.node(node).attrs.vars;
    if !vars.is_empty() {
        st.scopes.push(DataFrame {
            node,
            vars: vars
                .iter()
                .map(|name| (name.clone(), Value::Null))
                .collect(),
        });
    }
}

fn pop_state(core: &InstanceCore, node: NodeId) {
    let mut st = core.state.borrow_mut();
    if st.path.last() == Some(&node) {
        st.path.pop();
    }
    st.scopes.retain(|frame| frame.node != node);
}

/// Depth-first preorder walk of every descendant of `node`, declaration
/// order: enter, on, children, exit per walked state. The instance rests on
/// `node` itself afterwards.
fn sequence_walk(core: &Rc<InstanceCore>, node: NodeId) {
    tracing::trace!(
        target: "trellis::navigator",
        instance = %core.id,
        at = core.program.node(node).name(),
        "sequence walk"
    );
    let children = core.program.node(node).children.clone();
    for child in children {
        walk_one(core, child, true);
    }
}

/// Run each direct child of `node` once, declaration order.
fn gate_run(core: &Rc<InstanceCore>, node: NodeId) {
    tracing::trace!(
        target: "trellis::navigator",
        instance = %core.id,
        at = core.program.node(node).name(),
        "gate run"
    );
    let children = core.program.node(node).children.clone();
    for child in children {
        walk_one(core, child, false);
    }
}

fn walk_one(core: &Rc<InstanceCore>, node: NodeId, recurse: bool) {
    push_state(core, node);
    run_entry_action(core, node);
    run_on_action(core, node, &[]);
    if recurse {
        let children = core.program.node(node).children.clone();
        for child in children {
            walk_one(core, child, recurse);
        }
    }
    // Redirects make no sense mid-walk; drop them.
    let outcome = run_action_hook(core, node, HookPhase::Exit, &[]);
    if outcome.redirect.is_some() {
        tracing::debug!(
            target: "trellis::navigator",
            instance = %core.id,
            state = core.program.node(node).name(),
            "redirect during walk ignored"
        );
    }
    pop_state(core, node);
}

fn cancel_pend(core: &InstanceCore) {
    let cancelled = core.state.borrow_mut().pending.take();
    if let Some(seq) = cancelled {
        core.sched.drop_pend(core.id, seq);
        tracing::trace!(
            target: "trellis::navigator",
            instance = %core.id,
            "pending continuation cancelled"
        );
    }
}

fn register_pend(
    core: &Rc<InstanceCore>,
    node: NodeId,
    after: std::time::Duration,
    raw: &str,
) {
    let expr = match PathExpr::parse(raw) {
        Ok(expr) => expr,
        Err(err) => {
            tracing::warn!(
                target: "trellis::navigator",
                instance = %core.id,
                expr = raw,
                %err,
                "unparseable pend expression dropped"
            );
            return;
        }
    };
    let (seq, superseded) = {
        let mut st = core.state.borrow_mut();
        st.pend_seq += 1;
        let seq = st.pend_seq;
        let superseded = st.pending.replace(seq);
        (seq, superseded)
    };
    if let Some(old) = superseded {
        core.sched.drop_pend(core.id, old);
    }
    core.sched
        .schedule_pend(core.id, seq, node, raw.to_string(), expr, after);
    tracing::debug!(
        target: "trellis::navigator",
        instance = %core.id,
        state = core.program.node(node).name(),
        after_ms = after.as_millis() as u64,
        expr = raw,
        "continuation pended"
    );
}

/// Fire a pended continuation; stale sequences are silently skipped.
pub(crate) fn fire_pend(
    core: &Rc<InstanceCore>,
    seq: u64,
    node: NodeId,
    raw: String,
    expr: PathExpr,
) {
    {
        let mut st = core.state.borrow_mut();
        if st.pending != Some(seq) {
            tracing::trace!(
                target: "trellis::navigator",
                instance = %core.id,
                "stale continuation skipped"
            );
            return;
        }
        st.pending = None;
    }
    let req = Request {
        raw,
        expr,
        kind: RequestKind::Go,
        args: Vec::new(),
        base: Some(node),
        origin: Origin::Instance(core.id),
        hops: 0,
    };
    let raw = req.raw.clone();
    if let Err(err) = submit_request(core, req) {
        tracing::warn!(
            target: "trellis::navigator",
            instance = %core.id,
            expr = %raw,
            %err,
            "pended continuation failed"
        );
    }
}

/// Run the ignition cascade: occupy the root and let its entry action (and
/// queued directives) take the instance to a first stable path.
pub(crate) fn ignite(core: &Rc<InstanceCore>) -> Result<(), TransitionError> {
    {
        let mut st = core.state.borrow_mut();
        st.in_cascade = true;
    }
    core.sched.push_cascade(core.id);

    push_state(core, core.program.root());
    run_entry_action(core, core.program.root());
    let root_attrs = &core.program.node(core.program.root()).attrs;
    if root_attrs.sequence {
        sequence_walk(core, core.program.root());
    } else if root_attrs.gate {
        gate_run(core, core.program.root());
    }

    let mut first_error = None;
    loop {
        let next = {
            let mut st = core.state.borrow_mut();
            if st.phase == Phase::Destroyed {
                st.queued.clear();
            }
            st.queued.pop_front()
        };
        let Some(next) = next else { break };
        let raw = next.raw.clone();
        if let Err(err) = drive(core, next) {
            tracing::warn!(
                target: "trellis::navigator",
                instance = %core.id,
                expr = %raw,
                %err,
                "ignition request failed"
            );
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }

    core.sched.pop_cascade();
    {
        let mut st = core.state.borrow_mut();
        st.in_cascade = false;
        if st.phase != Phase::Destroyed {
            st.phase = Phase::Active;
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Destroy `core`: exit every occupied state, clear it, and deregister.
fn destroy(core: &Rc<InstanceCore>, req: &Request) -> Result<(), TransitionError> {
    let category = classify(core, req.origin);
    let path: Vec<NodeId> = core.state.borrow().path.clone();
    let exits: Vec<NodeId> = path.iter().rev().copied().collect();
    check_access(core, category, &exits)?;

    // Owner routing is captured before the path is torn down.
    let owner_directive = rest_owner_directive(core);

    push_trail(core, &req.raw);
    tracing::debug!(
        target: "trellis::navigator",
        instance = %core.id,
        "destroying"
    );

    for &node in &exits {
        let outcome = run_action_hook(core, node, HookPhase::Exit, &[]);
        if outcome.redirect.is_some() {
            tracing::debug!(
                target: "trellis::navigator",
                instance = %core.id,
                state = core.program.node(node).name(),
                "redirect during destruction ignored"
            );
        }
        pop_state(core, node);
    }

    let owner = {
        let mut st = core.state.borrow_mut();
        st.phase = Phase::Destroyed;
        st.path.clear();
        st.scopes.clear();
        st.pending = None;
        st.queued.clear();
        st.owner.upgrade()
    };

    if let Some(owner) = &owner {
        crate::registry::deregister_destroyed(owner, core.id);
    }
    core.sched.forget(core.id);

    if let Some((owner, directive)) = owner_directive {
        notify_owner(core, &owner, &directive);
    }
    Ok(())
}
