//! Panic-site stack capture.
//!
//! `catch_unwind` only observes a panic after the stack has unwound, so the
//! collector installs a process-wide panic hook that records the panic-site
//! stack into a thread-local. Catch sites pair it with the payload they
//! recover. The previously installed hook keeps running.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::stacktrace::{self, Frame};

static INSTALL: Once = Once::new();

thread_local! {
    static PANIC_STACK: RefCell<Option<Vec<Frame>>> = const { RefCell::new(None) };
}

/// Installs the stack-recording hook, chaining any previously installed
/// hook. Idempotent.
pub(crate) fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let frames = stacktrace::capture_stack(0);
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(frames));
            previous(info);
        }));
    });
}

/// Takes the stack recorded by the hook for the most recent panic on this
/// thread, if any.
pub fn take_captured_stack() -> Option<Vec<Frame>> {
    PANIC_STACK.with(|slot| slot.borrow_mut().take())
}

/// Runs `f`, swallowing any panic. A panic is reported as an exception
/// event (panic-site stack included) and `None` is returned; otherwise the
/// closure's result comes back in `Some`.
///
/// Intended as the outermost wrapper of code whose panics should be
/// reported rather than crash the task.
pub fn catch_panics<F, T>(f: F) -> Option<T>
where
    F: FnOnce() -> T,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            let frames = take_captured_stack().unwrap_or_default();
            let stack_trace = stacktrace::format_panic_with_stack(payload.as_ref(), &frames);
            crate::api::emit_exception(None, stack_trace);
            None
        }
    }
}
