use std::rc::Rc;

use serde_json::json;
use trellis::instance::Phase;
use trellis::program::StateSpec;
use trellis::scheduler::Scheduler;
use trellis::tree::Program;

mod common;
use common::{new_log, taken};

fn toggle_program() -> Rc<Program> {
    Program::compile(
        StateSpec::new()
            .enter_go("pending")
            .child("pending", StateSpec::new())
            .child("done", StateSpec::new()),
    )
    .unwrap()
}

#[test]
fn invoking_a_callback_navigates_on_the_next_pump() {
    let sched = Scheduler::new();
    let inst = sched.create(&toggle_program()).unwrap();
    let cb = inst.bind_callback("done").unwrap();

    cb.invoke(vec![]);
    // Nothing happens until the scheduler pumps.
    assert_eq!(inst.status().path, vec!["program", "pending"]);

    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "done"]);
}

#[test]
fn callback_arguments_reach_the_on_hook() {
    let seen = new_log();
    let sink = Rc::clone(&seen);
    let program = Program::compile(
        StateSpec::new().child(
            "update",
            StateSpec::new().on(move |cx| {
                for arg in cx.args() {
                    sink.borrow_mut().push(arg.to_string());
                }
            }),
        ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    let cb = inst.bind_callback("update").unwrap();

    cb.invoke(vec![json!("text"), json!(true)]);
    sched.pump();
    assert_eq!(taken(&seen), vec!["\"text\"", "true"]);
}

#[test]
fn binding_is_anchored_where_it_was_made() {
    let program = Program::compile(
        StateSpec::new()
            .child(
                "form",
                StateSpec::new()
                    .root()
                    .child("save", StateSpec::new())
                    .child("revert", StateSpec::new()),
            )
            .child(
                "elsewhere",
                // A same-named state closer to `elsewhere` must not win.
                StateSpec::new().child("save", StateSpec::new()),
            ),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("//form").unwrap();
    let cb = inst.bind_callback("save").unwrap();

    // The instance moves on; the binding does not.
    inst.go("//elsewhere").unwrap();
    cb.invoke(vec![]);
    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "form", "save"]);
}

#[test]
fn alternatives_toggle_against_the_current_path() {
    let sched = Scheduler::new();
    let inst = sched.create(&toggle_program()).unwrap();
    let cb = inst.bind_callback("done|pending").unwrap();

    cb.invoke(vec![]);
    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "done"]);

    cb.invoke(vec![]);
    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "pending"]);
}

#[test]
fn invoke_nth_selects_an_alternative_explicitly() {
    let sched = Scheduler::new();
    let inst = sched.create(&toggle_program()).unwrap();
    let cb = inst.bind_callback("done|pending").unwrap();

    cb.invoke_nth(1, vec![]);
    sched.pump();
    // Explicit selection may be a no-op re-target.
    assert_eq!(inst.status().path, vec!["program", "pending"]);

    cb.invoke_nth(0, vec![]);
    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "done"]);
}

#[test]
fn firing_after_destruction_is_a_no_op() {
    let sched = Scheduler::new();
    let inst = sched.create(&toggle_program()).unwrap();
    let cb = inst.bind_callback("done").unwrap();

    inst.go("@null").unwrap();
    cb.invoke(vec![]);
    sched.pump();

    assert_eq!(inst.phase(), Phase::Destroyed);
    assert!(inst.status().path.is_empty());
}

#[test]
fn callbacks_cross_threads() {
    let sched = Scheduler::new();
    let inst = sched.create(&toggle_program()).unwrap();
    let cb = inst.bind_callback("done").unwrap();

    std::thread::spawn(move || {
        cb.invoke(vec![json!("from-elsewhere")]);
    })
    .join()
    .unwrap();

    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "done"]);
}

#[test]
fn hooks_can_bind_callbacks_for_detached_consumers() {
    let handles = new_log();
    let sink = Rc::clone(&handles);
    let slot: Rc<std::cell::RefCell<Option<trellis::callbacks::Callback>>> =
        Rc::new(std::cell::RefCell::new(None));
    let slot_w = Rc::clone(&slot);

    let program = Program::compile(
        StateSpec::new().child(
            "widget",
            StateSpec::new().enter(move |cx| {
                let cb = cx.callbacks("../armed").expect("binding parses");
                sink.borrow_mut().push(format!("{:?}", cb.targets()));
                *slot_w.borrow_mut() = Some(cb);
            }),
        )
        .child("armed", StateSpec::new()),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("widget").unwrap();
    assert_eq!(taken(&handles), vec!["[\"../armed\"]"]);

    let cb = slot.borrow_mut().take().unwrap();
    cb.invoke(vec![]);
    sched.pump();
    assert_eq!(inst.status().path, vec!["program", "armed"]);
}
