// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Bounded, jittered retry of calls to external dependencies (vault, ledger,
//! release sidecar).  Only errors reporting themselves as transient are
//! retried; verification failures pass straight through.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Errors that can tell whether trying again might help
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits, for tests and one-shot tools
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before attempt `attempt + 1`: exponential, capped, with up to
    /// 50% random jitter added
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_delay_ms);

        let jitter = if exp > 1 {
            rand::thread_rng().gen_range(0..=exp / 2)
        } else {
            0
        };

        Duration::from_millis(exp + jitter)
    }

    /// Run `f` until it succeeds, fails with a permanent error, or the
    /// attempt budget is spent
    pub fn run<T, E, F>(&self, what: &str, mut f: F) -> Result<T, E>
    where
        E: Transient + Display,
        F: FnMut() -> Result<T, E>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < max => {
                    log::warn!("{what} failed (attempt {}/{max}): {e}", attempt + 1);

                    let d = self.delay(attempt);
                    if !d.is_zero() {
                        std::thread::sleep(d);
                    }

                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
