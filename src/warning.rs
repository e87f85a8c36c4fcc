//! Per-load record of defaulted cells.
//!
//! `record::coerce` stays infallible and side-effect free for callers that do
//! not care; a dataset load wraps coercion in [`collect_warnings`] to learn
//! which cells were replaced by a default.

use std::cell::RefCell;

tokio::task_local! {
    static DEFAULTED: RefCell<Vec<String>>;
}

/// Note a defaulted cell. A no-op unless a [`collect_warnings`] scope is active.
pub fn collect(message: impl Into<String>) {
    let _ = DEFAULTED.try_with(|cells| cells.borrow_mut().push(message.into()));
}

/// Run `f` and hand back its result with every cell noted while it ran.
pub fn collect_warnings<F, T>(f: F) -> (T, Vec<String>)
where
    F: FnOnce() -> T,
{
    DEFAULTED.sync_scope(RefCell::new(Vec::new()), || {
        let result = f();
        let noted = DEFAULTED.with(|cells| cells.take());
        (result, noted)
    })
}

/// `format!`-style shorthand for [`collect`].
#[macro_export]
macro_rules! warn_cell {
    ($($arg:tt)*) => {
        $crate::warning::collect(format!($($arg)*))
    };
}
