// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::{poisoned, Error};
use super::ipolicystore::{CasOutcome, IPolicyStore, Versioned};
use super::joinpolicy::JoinPolicy;
use std::sync::RwLock;

/// In-memory policy store with version counting
#[derive(Debug, Default)]
pub struct MemoPolicyStore {
    p: RwLock<Option<Versioned<JoinPolicy>>>,
}

impl MemoPolicyStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Replace the stored policy with the one in the given JSON document
    pub fn load_json(&self, j: &str) -> Result<(), Error> {
        let policy = JoinPolicy::from_json(j.as_bytes())?;

        let mut g = self.p.write().map_err(poisoned)?;
        let version = g.as_ref().map(|v| v.version + 1).unwrap_or(1);
        *g = Some(Versioned {
            version,
            value: policy,
        });

        Ok(())
    }
}

impl IPolicyStore for MemoPolicyStore {
    fn load(&self) -> Result<Option<Versioned<JoinPolicy>>, Error> {
        Ok(self.p.read().map_err(poisoned)?.clone())
    }

    fn compare_and_swap(
        &self,
        expected: Option<u64>,
        policy: &JoinPolicy,
    ) -> Result<CasOutcome, Error> {
        let mut g = self.p.write().map_err(poisoned)?;

        let current = g.as_ref().map(|v| v.version);
        if current != expected {
            return Ok(CasOutcome::Conflict);
        }

        let version = current.map(|v| v + 1).unwrap_or(1);
        *g = Some(Versioned {
            version,
            value: policy.clone(),
        });

        Ok(CasOutcome::Stored(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::HostData;

    #[test]
    fn cas_sequence() {
        let s = MemoPolicyStore::new();
        let p = JoinPolicy::new([HostData([1; 32])]);

        assert_eq!(s.load().unwrap(), None);
        assert_eq!(s.compare_and_swap(Some(1), &p).unwrap(), CasOutcome::Conflict);
        assert_eq!(s.compare_and_swap(None, &p).unwrap(), CasOutcome::Stored(1));
        assert_eq!(s.compare_and_swap(None, &p).unwrap(), CasOutcome::Conflict);
        assert_eq!(s.compare_and_swap(Some(1), &p).unwrap(), CasOutcome::Stored(2));

        let v = s.load().unwrap().unwrap();
        assert_eq!(v.version, 2);
        assert_eq!(v.value, p);
    }

    #[test]
    fn load_json_bumps_version() {
        let s = MemoPolicyStore::new();
        let j = format!(r#"{{"snp":{{"hostData":{{"{}":true}}}}}}"#, "01".repeat(32));

        s.load_json(&j).unwrap();
        s.load_json(&j).unwrap();

        let v = s.load().unwrap().unwrap();
        assert_eq!(v.version, 2);
        assert!(v.value.contains(&HostData([1; 32])));
    }

    #[test]
    fn load_json_malformed() {
        let s = MemoPolicyStore::new();

        let e = s.load_json(r#"{"snp":{"hostData":{"abc":true}}}"#).unwrap_err();

        assert_eq!(e.code(), "PolicyMalformed");
        assert_eq!(s.load().unwrap(), None);
    }
}
