use std::rc::Rc;

use serde_json::json;
use trellis::navigator::TransitionError;
use trellis::program::{Perms, StateSpec};
use trellis::scheduler::Scheduler;
use trellis::tree::Program;

mod common;
use common::{mark, new_log, taken};

#[test]
fn cascade_exits_to_the_common_ancestor_then_enters() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "trunk",
            StateSpec::new()
                .enter(mark(&log, "enter trunk"))
                .exit(mark(&log, "exit trunk"))
                .child(
                    "a",
                    StateSpec::new()
                        .enter(mark(&log, "enter a"))
                        .exit(mark(&log, "exit a"))
                        .child(
                            "a1",
                            StateSpec::new()
                                .enter(mark(&log, "enter a1"))
                                .exit(mark(&log, "exit a1")),
                        ),
                )
                .child(
                    "b",
                    StateSpec::new()
                        .enter(mark(&log, "enter b"))
                        .exit(mark(&log, "exit b"))
                        .child(
                            "b1",
                            StateSpec::new()
                                .enter(mark(&log, "enter b1"))
                                .exit(mark(&log, "exit b1")),
                        ),
                ),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("//trunk/a/a1").unwrap();
    assert_eq!(taken(&log), vec!["enter trunk", "enter a", "enter a1"]);

    // trunk is the common ancestor: it is neither exited nor re-entered.
    inst.go("//trunk/b/b1").unwrap();
    assert_eq!(
        taken(&log),
        vec!["exit a1", "exit a", "enter b", "enter b1"]
    );
}

#[test]
fn noop_go_reruns_only_the_leaf_entry() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "a",
            StateSpec::new()
                .enter(mark(&log, "enter a"))
                .on(mark(&log, "on a"))
                .exit(mark(&log, "exit a")),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("a").unwrap();
    assert_eq!(taken(&log), vec!["enter a", "on a"]);

    // Already resting on `a`: no exit, no on-target, entry only.
    inst.go("@self").unwrap();
    assert_eq!(taken(&log), vec!["enter a"]);
}

#[test]
fn noop_target_runs_only_the_on_hook_with_args() {
    let log = new_log();
    let seen = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "a",
            StateSpec::new().enter(mark(&log, "enter a")).on({
                let seen = Rc::clone(&seen);
                move |cx| {
                    for arg in cx.args() {
                        seen.borrow_mut().push(arg.to_string());
                    }
                }
            }),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("a").unwrap();
    taken(&log);

    inst.target("@self", vec![serde_json::json!("x"), serde_json::json!(7)])
        .unwrap();
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(taken(&seen), vec!["\"x\"", "7"]);
}

#[test]
fn denied_access_runs_no_hook_and_keeps_the_path() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new()
            .child("open", StateSpec::new())
            .child(
                "vault",
                StateSpec::new()
                    .perms(Perms::deny_all())
                    .enter(mark(&log, "enter vault")),
            ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("open").unwrap();

    let err = inst.go("vault").unwrap_err();
    assert!(matches!(err, TransitionError::AccessDenied { .. }));
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(inst.status().path, vec!["program", "open"]);
    // The rejected request is not recorded either.
    assert_eq!(inst.status().trail.len(), 1);
}

#[test]
fn own_hooks_cross_access_controlled_states() {
    let program = Program::compile(
        StateSpec::new()
            .child(
                "relay",
                StateSpec::new().on(|cx| cx.go("/vault")),
            )
            .child("vault", StateSpec::new().perms(Perms::deny_all())),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    // The external request stops at relay; relay's own hook may proceed.
    inst.go("relay").unwrap();
    assert_eq!(inst.status().path, vec!["program", "vault"]);
}

#[test]
fn exit_redirect_abandons_the_original_destination() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new()
            .child(
                "dirty",
                StateSpec::new().exit({
                    let log = Rc::clone(&log);
                    move |cx| {
                        log.borrow_mut().push("exit dirty".into());
                        cx.redirect("/confirm");
                    }
                }),
            )
            .child("save", StateSpec::new().enter(mark(&log, "enter save")))
            .child(
                "confirm",
                StateSpec::new().enter(mark(&log, "enter confirm")),
            ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("dirty").unwrap();
    taken(&log);

    inst.go("save").unwrap();
    assert_eq!(inst.status().path, vec!["program", "confirm"]);
    assert_eq!(taken(&log), vec!["exit dirty", "enter confirm"]);
}

#[test]
fn sequence_walks_descendants_depth_first_in_declaration_order() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "update",
            StateSpec::new()
                .sequence()
                .enter(mark(&log, "enter update"))
                .child(
                    "count",
                    StateSpec::new()
                        .enter(mark(&log, "enter count"))
                        .on(mark(&log, "on count"))
                        .exit(mark(&log, "exit count"))
                        .child("deep", StateSpec::new().on(mark(&log, "on deep"))),
                )
                .child("render", StateSpec::new().on(mark(&log, "on render"))),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("update").unwrap();

    assert_eq!(
        taken(&log),
        vec![
            "enter update",
            "enter count",
            "on count",
            "on deep",
            "exit count",
            "on render",
        ]
    );
    // The walk is transient: the instance rests on the sequence state.
    assert_eq!(inst.status().path, vec!["program", "update"]);
}

#[test]
fn gate_runs_direct_children_once_without_recursing() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "setup",
            StateSpec::new()
                .gate()
                .child(
                    "first",
                    StateSpec::new()
                        .on(mark(&log, "on first"))
                        .child("nested", StateSpec::new().on(mark(&log, "on nested"))),
                )
                .child("second", StateSpec::new().on(mark(&log, "on second"))),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("setup").unwrap();

    assert_eq!(taken(&log), vec!["on first", "on second"]);
    assert_eq!(inst.status().path, vec!["program", "setup"]);
}

#[test]
fn forward_bypass_intercepts_then_retries_the_original_request() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new()
            .child("early", StateSpec::new())
            .child(
                "setup",
                StateSpec::new()
                    .bypass_forward("@self")
                    .enter(mark(&log, "enter setup")),
            )
            .child("late", StateSpec::new().enter(mark(&log, "enter late"))),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("early").unwrap();
    taken(&log);

    // early -> late skips over setup; setup intercepts, runs, and the
    // original request is retried afterwards.
    inst.go("late").unwrap();
    assert_eq!(taken(&log), vec!["enter setup", "enter late"]);
    assert_eq!(inst.status().path, vec!["program", "late"]);
}

#[test]
fn backward_bypass_intercepts_termination() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new()
            .child(
                "teardown",
                StateSpec::new()
                    .bypass_backward("@self")
                    .enter(mark(&log, "enter teardown")),
            )
            .child("work", StateSpec::new()),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("work").unwrap();

    // Destruction travels backward past teardown; teardown runs first.
    inst.go("@null").unwrap();
    assert_eq!(taken(&log), vec!["enter teardown"]);
    assert_eq!(inst.phase(), trellis::instance::Phase::Destroyed);
}

#[test]
fn bypass_does_not_fire_for_states_on_the_route() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new().child(
            "setup",
            StateSpec::new()
                .bypass_forward("@self")
                .enter(mark(&log, "enter setup"))
                .child("inner", StateSpec::new().enter(mark(&log, "enter inner"))),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    // Entering through setup is not skipping over it.
    inst.go("//setup/inner").unwrap();
    assert_eq!(taken(&log), vec!["enter setup", "enter inner"]);
}

#[test]
fn looping_bypass_interceptions_hit_the_hop_limit() {
    // Two bypass markers whose directives keep throwing the transition
    // back and forth across each other.
    let program = Program::compile(
        StateSpec::new()
            .child("home", StateSpec::new())
            .child("gate_a", StateSpec::new().bypass_backward("/far"))
            .child("mid", StateSpec::new())
            .child("gate_b", StateSpec::new().bypass_forward("/home"))
            .child("far", StateSpec::new()),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("mid").unwrap();

    let err = inst.go("/home").unwrap_err();
    assert!(matches!(err, TransitionError::HopLimit { .. }));
    // The loop never cascaded: no state was left.
    assert_eq!(inst.status().path, vec!["program", "mid"]);
}

#[test]
fn requests_issued_mid_cascade_run_after_it_settles() {
    let log = new_log();
    let program = Program::compile(
        StateSpec::new()
            .child(
                "a",
                StateSpec::new()
                    .enter({
                        let log = Rc::clone(&log);
                        move |cx| {
                            log.borrow_mut().push("enter a".into());
                            cx.go("/b");
                            log.borrow_mut().push("after go".into());
                        }
                    })
                    .exit(mark(&log, "exit a")),
            )
            .child("b", StateSpec::new().enter(mark(&log, "enter b"))),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("a").unwrap();

    // The queued request runs only once the first cascade is complete.
    assert_eq!(
        taken(&log),
        vec!["enter a", "after go", "exit a", "enter b"]
    );
    assert_eq!(inst.status().path, vec!["program", "b"]);
}

#[test]
fn inner_variables_shadow_outer_declarations() {
    let program = Program::compile(
        StateSpec::new().child(
            "form",
            StateSpec::new()
                .vars(["text"])
                .enter(|cx| cx.set("text", json!("outer")))
                .child(
                    "edit",
                    StateSpec::new()
                        .vars(["text"])
                        .enter(|cx| cx.set("text", json!("inner"))),
                ),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("//form/edit").unwrap();

    // Reads and writes hit the innermost visible declaration.
    assert_eq!(inst.data().get("text"), Some(json!("inner")));
    inst.data().set("text", json!("edited")).unwrap();
    assert_eq!(inst.data().get("text"), Some(json!("edited")));

    // Exiting the inner state drops its frame and uncovers the outer value.
    inst.go("..").unwrap();
    assert_eq!(inst.data().get("text"), Some(json!("outer")));
}

#[test]
fn entry_directives_queue_a_follow_up_request() {
    let program = Program::compile(
        StateSpec::new().child(
            "list",
            StateSpec::new()
                .root()
                .enter_go("/all")
                .child("all", StateSpec::new()),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("list").unwrap();
    assert_eq!(inst.status().path, vec!["program", "list", "all"]);
}

#[test]
fn on_directives_reroute_arrivals_at_interior_states() {
    let program = Program::compile(
        StateSpec::new().child(
            "list",
            StateSpec::new()
                .root()
                .on_go("all")
                .child("all", StateSpec::new())
                .child("active", StateSpec::new()),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("//list/active").unwrap();

    // Arriving *at* list (not through it) triggers its on-directive.
    inst.go("/").unwrap();
    assert_eq!(inst.status().path, vec!["program", "list", "all"]);
}
