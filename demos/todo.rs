//! Todo: A Headless Todo-List Driven by State Programs
//!
//! This demonstration runs a complete todo-list application as two state
//! programs: a list program that owns the collection, and an item program
//! instantiated once per todo. It covers the runtime surface end to end.
//!
//! What You'll Learn:
//! 1. Program Declaration: specs with aliases, roots, imports and markers
//! 2. Boot via Bypass: a gated setup section that runs exactly once
//! 3. Ownership: spawning item sub-instances and live capture queries
//! 4. Owner Routing: items refreshing the list whenever they settle
//! 5. Filters by Import: `active`/`completed` views sharing one subtree
//! 6. Pendable States: a draft that auto-commits after a quiet period
//! 7. Callbacks: detached handles toggling items from another thread
//!
//! Running This Demo:
//! ```bash
//! cargo run --example todo
//! ```

use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use miette::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use trellis::instance::Instance;
use trellis::program::{Perms, StateSpec};
use trellis::registry::Capture;
use trellis::scheduler::Scheduler;
use trellis::telemetry::StatusFormatter;
use trellis::tree::Program;

/// On-disk shape of one todo.
#[derive(Debug, Serialize, Deserialize)]
struct TodoRecord {
    text: String,
    completed: bool,
}

/// Mutable context shared by the list program's hooks.
struct TodoCtx {
    store: PathBuf,
    /// Draft text waiting for its quiet period to elapse.
    draft: Option<String>,
}

impl TodoCtx {
    fn load(&self) -> Vec<TodoRecord> {
        fs::read(&self.store)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn save(&self, records: &[TodoRecord]) {
        match serde_json::to_vec_pretty(records) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&self.store, bytes) {
                    warn!(store = %self.store.display(), %err, "store write failed");
                }
            }
            Err(err) => warn!(%err, "store serialization failed"),
        }
    }
}

fn record_of(item: &Instance) -> TodoRecord {
    TodoRecord {
        text: item
            .data()
            .get("text")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
        completed: item.status().path.last().map(String::as_str) == Some("completed"),
    }
}

/// One todo. Items route their owner to its branch root whenever they
/// settle (which reruns the owner's update pass), except while being
/// edited.
fn item_program() -> Rc<Program> {
    Program::compile(
        StateSpec::new()
            .vars(["text"])
            .owner_to("/")
            .enter_go("active")
            .child("active", StateSpec::new())
            .child("completed", StateSpec::new())
            .child(
                "edit",
                StateSpec::new()
                    .owner_mute()
                    .vars(["draft"])
                    .enter(|cx| {
                        let current = cx.get("text").unwrap_or(json!(""));
                        cx.set("draft", current);
                    })
                    .child(
                        "commit",
                        StateSpec::new().on(|cx| {
                            if let Some(draft) = cx.get("draft") {
                                cx.set("text", draft);
                            }
                            cx.go("/active");
                        }),
                    )
                    .child("revert", StateSpec::new().on_go("/active")),
            )
            .child("destroy", StateSpec::new().on_target("@null")),
    )
    .unwrap()
}

/// The collection view shared by every filter: an update pass (tally and
/// persist, run as a sequence), plus the verbs that operate on whatever
/// the filter's capture criteria select.
fn all_section(ctx: &Rc<RefCell<TodoCtx>>, item: &Rc<Program>) -> StateSpec {
    let persist_ctx = Rc::clone(ctx);
    let add_ctx = Rc::clone(ctx);
    let add_item = Rc::clone(item);
    let draft_ctx = Rc::clone(ctx);

    StateSpec::new()
        .root()
        .capture(Capture::All)
        .on_go("update")
        .child(
            "update",
            StateSpec::new()
                .sequence()
                .child(
                    "tally",
                    StateSpec::new().on(|cx| {
                        let shown = cx.capture_scoped().len();
                        let total = cx.capture(&Capture::All).len();
                        info!(shown, total, "tally");
                    }),
                )
                .child(
                    "persist",
                    StateSpec::new().on(move |cx| {
                        let records: Vec<TodoRecord> =
                            cx.capture(&Capture::All).iter().map(record_of).collect();
                        persist_ctx.borrow().save(&records);
                    }),
                ),
        )
        .child(
            "mark",
            StateSpec::new().on(|cx| {
                for item in cx.capture_scoped() {
                    if item.status().path.last().map(String::as_str) != Some("completed") {
                        if let Err(err) = item.go("completed") {
                            warn!(item = %item.id(), %err, "mark failed");
                        }
                    }
                }
            }),
        )
        .child(
            "add",
            StateSpec::new().perms(Perms::deny_sub()).on(move |cx| {
                let text = cx
                    .arg(0)
                    .and_then(|v| v.as_str().map(str::to_string))
                    .or_else(|| add_ctx.borrow_mut().draft.take());
                let Some(text) = text else { return };
                info!(%text, "todo added");
                let sub = cx.spawn(&add_item);
                if let Err(err) = sub.data().set("text", json!(text)) {
                    warn!(%err, "new item rejected its text");
                }
                cx.go("/update");
            }),
        )
        .child(
            "draft",
            StateSpec::new()
                .pendable()
                .enter(|cx| {
                    cx.pend(Duration::from_millis(300), "/add");
                })
                .on(move |cx| {
                    if let Some(text) = cx.arg(0).and_then(|v| v.as_str()) {
                        draft_ctx.borrow_mut().draft = Some(text.to_string());
                    }
                }),
        )
}

/// The list. `setup` boots exactly once via forward bypass; `teardown`
/// intercepts destruction to flush the store; `active`/`completed` are
/// imported copies of `all` with narrower capture criteria.
fn list_program(ctx: &Rc<RefCell<TodoCtx>>, item: &Rc<Program>) -> Rc<Program> {
    let restore_ctx = Rc::clone(ctx);
    let restore_item = Rc::clone(item);
    let flush_ctx = Rc::clone(ctx);

    Program::compile(
        StateSpec::new()
            .enter_target("@start")
            .child(
                "setup",
                StateSpec::new()
                    .bypass_forward("@self")
                    .gate()
                    .child("banner", StateSpec::new().on(|_cx| info!("todos ready")))
                    .child(
                        "restore",
                        StateSpec::new().on(move |cx| {
                            for record in restore_ctx.borrow().load() {
                                let sub = cx.spawn(&restore_item);
                                if let Err(err) = sub.data().set("text", json!(record.text)) {
                                    warn!(%err, "restored item rejected its text");
                                }
                                if record.completed {
                                    if let Err(err) = sub.go("completed") {
                                        warn!(%err, "restored item not completable");
                                    }
                                }
                            }
                        }),
                    ),
            )
            .child(
                "teardown",
                StateSpec::new().bypass_backward("@self").enter(move |cx| {
                    let records: Vec<TodoRecord> =
                        cx.capture(&Capture::All).iter().map(record_of).collect();
                    flush_ctx.borrow().save(&records);
                    info!(todos = records.len(), "flushed on shutdown");
                }),
            )
            .child(
                "list",
                StateSpec::new()
                    .alias("start")
                    .root()
                    .capture(Capture::All)
                    .enter_go("/all")
                    .on_go("all")
                    .child("all", all_section(ctx, item))
                    .child(
                        "active",
                        StateSpec::new().import("//list/all").capture("active"),
                    )
                    .child(
                        "completed",
                        StateSpec::new()
                            .import("//list/all")
                            .capture("completed")
                            .child(
                                "purge",
                                StateSpec::new().on(|cx| {
                                    for item in cx.capture(&"completed".into()) {
                                        if let Err(err) = item.go("@null") {
                                            warn!(item = %item.id(), %err, "purge failed");
                                        }
                                    }
                                }),
                            ),
                    ),
            ),
    )
    .unwrap()
}

fn init_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,trellis=info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn init_miette() {
    // Pretty panic reports
    miette::set_panic_hook();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_miette();
    demo().await
}

async fn demo() -> Result<()> {
    let dir = tempfile::tempdir().expect("temp dir");
    let ctx = Rc::new(RefCell::new(TodoCtx {
        store: dir.path().join("todos.json"),
        draft: None,
    }));
    let item = item_program();
    let program = list_program(&ctx, &item);

    let formatter = StatusFormatter::new();
    let sched = Scheduler::new();

    // Boot. The root directive targets @start; crossing over `setup` on the
    // way triggers its forward bypass, so the gate runs exactly once.
    let list = sched.create(&program)?;
    info!(
        "booted: {}",
        formatter
            .render_status(&list.status(), 0)
            .join_lines()
            .trim_end()
    );

    // Add todos, one through the draft's quiet period.
    list.target("add", vec![json!("buy milk")])?;
    list.target("add", vec![json!("write tests")])?;
    list.target("draft", vec![json!("call mom")])?;
    sched.run_until_idle().await;
    info!(todos = list.capture(&Capture::All).len(), "after draft flush");

    // Toggle one item from a detached handle, as a UI event source would.
    let first = list.capture(&Capture::All).remove(0);
    let toggle = first
        .bind_callback("completed|active")
        .expect("binding parses");
    std::thread::spawn(move || toggle.invoke(vec![]))
        .join()
        .expect("toggle thread");
    sched.run_until_idle().await;

    // Filters are imported copies of `all` with narrower capture criteria.
    list.go("//list/active")?;
    list.go("//list/completed")?;

    // Purge completed items, then mark the rest done.
    list.target("purge", vec![])?;
    list.go("//list/all")?;
    list.target("mark", vec![])?;

    info!(
        "resting: {}",
        formatter
            .render_status(&list.status(), 3)
            .join_lines()
            .trim_end()
    );

    // Shutdown travels backward over `teardown`, which flushes the store.
    list.go("@null")?;
    let records = ctx.borrow().load();
    info!(persisted = records.len(), "store after shutdown");

    Ok(())
}
