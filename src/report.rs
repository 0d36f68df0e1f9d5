//! Utilities for structured reporting of experimental results.
//!
//! A thread local reporter collects key/value pairs into a JSON object which is
//! printed to stdout when the guard returned by `enable_reporting` is dropped.
//! Nested contexts map to nested objects. Human readable progress goes to
//! stderr so the JSON on stdout stays machine readable.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::sync::atomic::{compiler_fence, Ordering::SeqCst};
use std::time::{Duration, Instant};

pub use serde_json::json;

#[derive(Debug, Default)]
struct Reporter {
    current: Map<String, Value>,
    context_stack: Vec<(String, Map<String, Value>)>,
}

impl Reporter {
    fn push_context(&mut self, key: String) {
        let parent = std::mem::take(&mut self.current);
        self.context_stack.push((key, parent));
    }

    fn pop_context(&mut self) {
        if let Some((key, mut parent)) = self.context_stack.pop() {
            let child = std::mem::replace(&mut self.current, Map::new());
            parent.insert(key, Value::Object(child));
            self.current = parent;
        }
    }

    fn report(&mut self, key: String, val: Value) {
        self.current.insert(key, val);
    }
}

thread_local! {
    static REPORTER: RefCell<Option<Reporter>> = RefCell::new(None);
}

pub fn report(key: String, val: Value) {
    REPORTER.with(|reporter| {
        if let Some(r) = reporter.borrow_mut().as_mut() {
            r.report(key, val);
        }
    });
}

#[macro_export]
macro_rules! report {
    ($k:expr, $($json:tt)+) => { $crate::report::report($k.to_string(), $crate::report::json!($($json)+)) };
}

/// Opens a nested reporting context. Closed again when the guard is dropped.
#[must_use]
pub struct ContextGuard(());

impl Drop for ContextGuard {
    fn drop(&mut self) {
        REPORTER.with(|reporter| {
            if let Some(r) = reporter.borrow_mut().as_mut() {
                r.pop_context();
            }
        });
    }
}

pub fn push_context(key: &str) -> ContextGuard {
    REPORTER.with(|reporter| {
        if let Some(r) = reporter.borrow_mut().as_mut() {
            r.push_context(key.to_string());
        }
    });
    ContextGuard(())
}

/// Prints the collected JSON object on drop.
#[must_use]
pub struct ReportingGuard(());

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        REPORTER.with(|reporter| {
            if let Some(r) = reporter.borrow_mut().as_mut() {
                assert!(r.context_stack.is_empty());
                let object = std::mem::take(&mut r.current);
                println!("{}", Value::Object(object));
            }
        });
    }
}

pub fn enable_reporting(program: &str) -> ReportingGuard {
    REPORTER.with(|reporter| reporter.replace(Some(Reporter::default())));

    report!("program", program);
    report!("start_time", format!("{}", time::OffsetDateTime::now_utc()));
    report!("args", std::env::args().collect::<Vec<String>>());

    ReportingGuard(())
}

/// This function will measure how long it takes to execute the given lambda,
/// print the time and return the result of the lambda.
pub fn report_time<Out, F: FnOnce() -> Out>(name: &str, f: F) -> Out {
    report_time_with_key(name, "running_time_ms", f)
}

/// This function will measure how long it takes to execute the given lambda,
/// print the time, report it under the given key and return the result of the lambda.
pub fn report_time_with_key<Out, F: FnOnce() -> Out>(name: &str, key: &'static str, f: F) -> Out {
    eprintln!("starting {}", name);
    let (res, time) = measure(f);
    let t_passed = time.as_secs_f64() * 1000.0;
    eprintln!("{} done - took: {}ms", name, t_passed);
    report!(key, t_passed);
    res
}

/// This function will measure how long it takes to execute the given lambda
/// and return a tuple of the result of the lambda and a duration object.
pub fn measure<Out, F: FnOnce() -> Out>(f: F) -> (Out, Duration) {
    compiler_fence(SeqCst);
    let start = Instant::now();
    let res = f();
    let t_passed = start.elapsed();
    compiler_fence(SeqCst);
    (res, t_passed)
}

/// A struct to repeatedly measure the time passed since the timer was started
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Create and start a new `Timer`
    pub fn new() -> Timer {
        Timer { start: Instant::now() }
    }

    /// Reset the `Timer`
    pub fn restart(&mut self) {
        self.start = Instant::now();
    }

    /// Return the number of ms passed since the timer was started
    pub fn get_passed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    /// Return the time passed since the timer was started as a `Duration`
    pub fn get_passed(&self) -> Duration {
        self.start.elapsed()
    }
}
