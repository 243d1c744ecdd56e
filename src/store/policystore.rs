// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::ipolicystore::{CasOutcome, IPolicyStore};
use super::joinpolicy::JoinPolicy;
use crate::attestation::HostData;
use crate::retry::RetryPolicy;
use std::sync::Arc;

/// Bound on read-modify-write rounds lost to concurrent writers
const MAX_CAS_ROUNDS: u32 = 5;

/// Join policy access on top of a durable, versioned [`IPolicyStore`]
#[derive(Clone)]
pub struct PolicyStore {
    backend: Arc<dyn IPolicyStore>,
    retry: RetryPolicy,
}

impl PolicyStore {
    pub fn new(backend: Arc<dyn IPolicyStore>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// The current join policy.  Fails with `PolicyNotSet` if none was
    /// ever configured or if it trusts nothing.
    pub fn get_join_policy(&self) -> Result<JoinPolicy, Error> {
        let v = self
            .retry
            .run("loading join policy", || self.backend.load())?;

        match v {
            Some(v) if !v.value.is_empty() => Ok(v.value),
            Some(_) => Err(Error::PolicyNotSet("join policy is empty".to_string())),
            None => Err(Error::PolicyNotSet(
                "no join policy has been configured".to_string(),
            )),
        }
    }

    /// Seed the policy with the service's own hostData if no policy exists.
    /// Returns whether this call wrote it.
    pub fn bootstrap(&self, own: &HostData) -> Result<bool, Error> {
        if self.retry.run("loading join policy", || self.backend.load())?.is_some() {
            return Ok(false);
        }

        let policy = JoinPolicy::new([*own]);

        let outcome = self.retry.run("bootstrapping join policy", || {
            self.backend.compare_and_swap(None, &policy)
        })?;

        match outcome {
            CasOutcome::Stored(_) => {
                log::info!("join policy bootstrapped with hostData {own}");
                Ok(true)
            }
            CasOutcome::Conflict => {
                log::debug!("join policy bootstrapped concurrently by another instance");
                Ok(false)
            }
        }
    }

    /// Replace the join policy.  The caller's own hostData must remain
    /// trusted by the new policy.
    pub fn set_join_policy(&self, policy: JoinPolicy, caller: &HostData) -> Result<(), Error> {
        if !policy.contains(caller) {
            return Err(Error::SelfLockoutRejected(format!(
                "new policy does not contain the caller's hostData {caller}"
            )));
        }

        for round in 0..MAX_CAS_ROUNDS {
            let current = self
                .retry
                .run("loading join policy", || self.backend.load())?;

            let expected = current.map(|v| v.version);

            let outcome = self.retry.run("storing join policy", || {
                self.backend.compare_and_swap(expected, &policy)
            })?;

            match outcome {
                CasOutcome::Stored(version) => {
                    log::info!(
                        "join policy updated to version {version} ({} hostData values)",
                        policy.len()
                    );
                    return Ok(());
                }
                CasOutcome::Conflict => {
                    log::debug!("join policy changed underneath us (round {round}), retrying");
                }
            }
        }

        Err(Error::Conflict(format!(
            "join policy update lost {MAX_CAS_ROUNDS} consecutive races"
        )))
    }
}
