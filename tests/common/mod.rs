#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use trellis::hooks::HookCx;

/// Shared hook-invocation log, cloned into hook closures.
pub type Log = Rc<RefCell<Vec<String>>>;

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// A hook that appends `tag` to the log.
pub fn mark(log: &Log, tag: &str) -> impl Fn(&mut HookCx<'_>) + 'static {
    let log = Rc::clone(log);
    let tag = tag.to_string();
    move |_cx| log.borrow_mut().push(tag.clone())
}

/// Drain the log into a plain vector.
pub fn taken(log: &Log) -> Vec<String> {
    std::mem::take(&mut *log.borrow_mut())
}
