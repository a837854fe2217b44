//! Cycle health observer
//!
//! Cycle failures are swallowed by the scheduler. An observer is how callers
//! still see them (metrics, alerting) without being able to stop the loop:
//! every hook is fire-and-forget and returns nothing.

use std::time::Duration;

use crate::error::Error;

pub trait CycleObserver: Send + Sync {
    fn cycle_succeeded(&self, _username: &str, _elapsed: Duration) {}

    /// `username` is `None` when the cycle failed before selecting an identity.
    fn cycle_failed(&self, _username: Option<&str>, _error: &Error) {}

    fn token_acquired(&self, _username: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CycleObserver for NoopObserver {}
