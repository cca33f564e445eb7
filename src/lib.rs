//! # Trellis: Hierarchical State-Tree Runtime
//!
//! Trellis runs declarative state programs: a tree of named states is
//! compiled once into an immutable [`Program`](tree::Program), and any
//! number of [`Instance`](instance::Instance)s occupy paths through it,
//! navigating with path expressions under run-to-completion semantics.
//!
//! ## Core Concepts
//!
//! - **Programs**: Immutable compiled state trees, shared by instances
//! - **Instances**: One occupation of a program; path, scoped data, trail
//! - **Requests**: `go`/`target` navigation driven as exit/entry cascades
//! - **Ownership**: Instances spawn sub-instances and query them live
//! - **Callbacks**: Detached `Send + Sync` handles with stable binding
//! - **Scheduler**: Pumps callbacks and pended timers between cascades
//!
//! ## Quick Start
//!
//! ### Declaring and running a program
//!
//! ```
//! use trellis::program::StateSpec;
//! use trellis::scheduler::Scheduler;
//! use trellis::tree::Program;
//!
//! let spec = StateSpec::new()
//!     .enter_go("@start")
//!     .child(
//!         "off",
//!         StateSpec::new().alias("start").on(|cx| {
//!             cx.go("/on");
//!         }),
//!     )
//!     .child("on", StateSpec::new());
//!
//! let program = Program::compile(spec).unwrap();
//! let sched = Scheduler::new();
//! let light = sched.create(&program).unwrap();
//! // `off` was the target, so its on-action ran and toggled onward.
//! assert_eq!(light.status().path, vec!["program", "on"]);
//! ```
//!
//! ### Path expressions
//!
//! Requests name destinations with expressions resolved from the current
//! position: absolute (`//list/all`), branch-rooted (`/draft`), relative
//! with nearest-scope search (`complete`), parent (`..`), alias (`@start`),
//! self (`@self`), and the terminate pseudo-target (`@null`).
//!
//! ### Scoped data
//!
//! States declare variables visible only while they are occupied:
//!
//! ```
//! use serde_json::json;
//! use trellis::program::StateSpec;
//! use trellis::scheduler::Scheduler;
//! use trellis::tree::Program;
//!
//! let program = Program::compile(
//!     StateSpec::new().child(
//!         "editing",
//!         StateSpec::new().vars(["draft"]).enter(|cx| {
//!             cx.set("draft", json!("hello"));
//!         }),
//!     ),
//! )
//! .unwrap();
//!
//! let sched = Scheduler::new();
//! let inst = sched.create(&program).unwrap();
//! inst.go("editing").unwrap();
//! assert_eq!(inst.data().get("draft"), Some(json!("hello")));
//! inst.go("@program").unwrap();
//! assert_eq!(inst.data().get("draft"), None);
//! ```
//!
//! ## Module Guide
//!
//! - [`program`] - Declarative state specifications (the builder surface)
//! - [`tree`] - Compiled programs: nodes, imports, aliases
//! - [`path`] - Path expression parsing and resolution
//! - [`instance`] - Instance handles, phases, scoped data, status
//! - [`hooks`] - The context lifecycle hooks run against
//! - [`navigator`] - Cascade semantics: access control, bypass, redirect
//! - [`registry`] - Sub-instance tracking and capture queries
//! - [`callbacks`] - Detached callback handles
//! - [`scheduler`] - Instance creation, event pump, pended timers
//! - [`telemetry`] - Status rendering for demos and log sinks

pub mod callbacks;
pub mod hooks;
pub mod instance;
pub mod navigator;
pub mod path;
pub mod program;
pub mod registry;
pub mod scheduler;
pub mod telemetry;
pub mod tree;
