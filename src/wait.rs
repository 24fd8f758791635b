//! Bounded polling helpers
//!
//! Every "wait for X" in the codebase (tunnel port up, sync session steady,
//! grace-window reconnect, child exit) goes through `wait_until` so deadlines
//! and poll intervals are handled in one place.

use std::time::{Duration, Instant};

/// Poll `predicate` every `interval` until it returns true or `deadline`
/// elapses. The predicate is always checked at least once. Returns whether
/// the predicate was satisfied within the deadline.
pub fn wait_until<F>(mut predicate: F, interval: Duration, deadline: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if predicate() {
            return true;
        }
        let Some(remaining) = deadline.checked_sub(start.elapsed()) else {
            return false;
        };
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(interval.min(remaining));
    }
}
