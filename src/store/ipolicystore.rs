// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::joinpolicy::JoinPolicy;

/// A stored value together with the version it was read at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Result of a conditional write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// the write happened; the value now has this version
    Stored(u64),
    /// the stored version was not the expected one; nothing was written
    Conflict,
}

/// Interface to the durable store holding the join policy.  The store's
/// versioning, not any in-process lock, arbitrates concurrent writers.
pub trait IPolicyStore: Send + Sync {
    /// Read the current policy, if any has ever been written
    fn load(&self) -> Result<Option<Versioned<JoinPolicy>>, Error>;

    /// Write `policy` only if the stored version is still `expected`
    /// (`None` meaning "no policy yet")
    fn compare_and_swap(
        &self,
        expected: Option<u64>,
        policy: &JoinPolicy,
    ) -> Result<CasOutcome, Error>;
}
