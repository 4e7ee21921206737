// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// A clock that provides the current time. Orchestrator code takes
/// `&dyn Clock` (or a generic `C: Clock`) instead of calling `Utc::now()`
/// directly, so archive-name templating and retention math are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Renders the `{utcnow}` archive-name template token, e.g. `20260728T114500`.
    fn utcnow_token(&self) -> String {
        self.now().format("%Y%m%dT%H%M%S").to_string()
    }
}

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for deterministic tests.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(at)) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.current.lock();
        *guard += delta;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utcnow_token_has_expected_shape() {
        let clock = FakeClock::new("2026-07-28T11:45:00Z".parse().unwrap());
        assert_eq!(clock.utcnow_token(), "20260728T114500");
    }

    #[test]
    fn advance_moves_time_forward() {
        let clock = FakeClock::new("2026-07-28T11:45:00Z".parse().unwrap());
        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.utcnow_token(), "20260728T124500");
    }
}
