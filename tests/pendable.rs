use std::rc::Rc;
use std::time::Duration;

use trellis::program::StateSpec;
use trellis::scheduler::Scheduler;
use trellis::tree::Program;

mod common;
use common::{mark, new_log, taken, Log};

/// `input` pends a flush after five seconds of rest.
fn flush_program(log: &Log) -> Rc<Program> {
    let entry_log = Rc::clone(log);
    Program::compile(
        StateSpec::new()
            .child(
                "input",
                StateSpec::new().pendable().enter(move |cx| {
                    entry_log.borrow_mut().push("enter input".into());
                    cx.pend(Duration::from_secs(5), "/flushed");
                }),
            )
            .child("flushed", StateSpec::new().on(mark(log, "flushed"))),
    )
    .unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pended_continuation_fires_after_the_delay() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    // The entry hook ran synchronously; the continuation has not.
    assert_eq!(taken(&log), vec!["enter input"]);
    assert_eq!(inst.status().path, vec!["program", "input"]);

    sched.run_until_idle().await;
    assert_eq!(taken(&log), vec!["flushed"]);
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn navigating_away_cancels_the_continuation() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    inst.go("/flushed").unwrap();
    taken(&log);

    // The cancelled timer was dropped with the pend; nothing moves.
    sched.run_until_idle().await;
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rejected_requests_leave_the_continuation_armed() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    // Neither failure ran a hook, so neither counts as a drive.
    assert!(inst.go("@missing").is_err());
    assert!(inst.go("//nowhere").is_err());
    taken(&log);

    sched.run_until_idle().await;
    assert_eq!(taken(&log), vec!["flushed"]);
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_continuations_do_not_hold_the_scheduler() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    inst.go("/flushed").unwrap();
    taken(&log);

    // The cancelled timer is dropped outright; idling must not wait out
    // the five-second deadline on the real clock.
    tokio::time::timeout(Duration::from_millis(500), sched.run_until_idle())
        .await
        .expect("scheduler idles immediately");
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn re_entry_supersedes_the_earlier_continuation() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    // Refreshing the state re-pends; the first timer is superseded.
    inst.go("@self").unwrap();
    taken(&log);

    sched.run_until_idle().await;
    // Exactly one continuation fired.
    assert_eq!(taken(&log), vec!["flushed"]);
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn destruction_drops_outstanding_timers() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    inst.go("@null").unwrap();
    taken(&log);

    sched.run_until_idle().await;
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(inst.phase(), trellis::instance::Phase::Destroyed);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pend_without_the_marker_is_ignored() {
    let log = new_log();
    let entry_log = Rc::clone(&log);
    let program = Program::compile(
        StateSpec::new()
            .child(
                "plain",
                StateSpec::new().enter(move |cx| {
                    entry_log.borrow_mut().push("enter plain".into());
                    cx.pend(Duration::from_secs(5), "/flushed");
                }),
            )
            .child("flushed", StateSpec::new().on(mark(&log, "flushed"))),
    )
    .unwrap();

    let sched = Scheduler::new();
    let inst = sched.create(&program).unwrap();
    inst.go("plain").unwrap();
    taken(&log);

    // No marker, no timer: the scheduler is immediately idle.
    sched.run_until_idle().await;
    assert_eq!(taken(&log), Vec::<String>::new());
    assert_eq!(inst.status().path, vec!["program", "plain"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn callbacks_and_timers_interleave_under_run_until_idle() {
    let log = new_log();
    let sched = Scheduler::new();
    let inst = sched.create(&flush_program(&log)).unwrap();

    inst.go("input").unwrap();
    taken(&log);

    // A callback arriving before the deadline moves the instance away,
    // cancelling the pend and dropping its timer.
    let cb = inst.bind_callback("/flushed").unwrap();
    cb.invoke(vec![]);

    sched.run_until_idle().await;
    assert_eq!(taken(&log), vec!["flushed"]);
    assert_eq!(inst.status().path, vec!["program", "flushed"]);
}
