// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded exponential backoff with jitter.

use rand::Rng;

use crate::error::{ConfigError, ConfigResult};

/// Exponentially increasing retry delay, capped at a maximum, with optional jitter.
///
/// # Examples
///
/// ```
/// use gcp_iot_core::backoff::Backoff;
///
/// let mut backoff = Backoff::new(100, 10_000, 0).unwrap();
/// assert_eq!(backoff.next_delay(), 100);
/// assert_eq!(backoff.next_delay(), 200);
/// assert_eq!(backoff.next_delay(), 400);
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: u64,
    max: u64,
    jitter: u64,
    current: u64,
}

impl Backoff {
    /// Creates a new backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `initial == 0`, `max == 0`, or `max < initial`.
    pub fn new(initial_ms: u64, max_ms: u64, jitter_ms: u64) -> ConfigResult<Self> {
        if initial_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "initial_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if max_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if max_ms < initial_ms {
            return Err(ConfigError::OutOfRange {
                field: "max_ms",
                reason: "must be greater than or equal to initial_ms".to_string(),
            });
        }

        Ok(Self {
            initial: initial_ms,
            max: max_ms,
            jitter: jitter_ms,
            current: initial_ms,
        })
    }

    /// Returns the next delay in milliseconds and advances `current` toward `max`.
    ///
    /// The returned value is `current` plus a uniformly random jitter in
    /// `[0, jitter)` (no jitter is added when `jitter == 0`).
    pub fn next_delay(&mut self) -> u64 {
        let base = self.current;
        let jittered = if self.jitter == 0 {
            base
        } else {
            base + rand::rng().random_range(0..self.jitter)
        };

        self.current = (self.current.saturating_mul(2)).min(self.max);
        jittered
    }

    /// Resets `current` back to `initial`.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Returns the current interval (before jitter), for inspection in tests.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }
}
