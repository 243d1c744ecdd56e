// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::{poisoned, Error};
use super::ikeyvault::{IKeyVault, ImportKeyRequest, ImportOutcome, VaultKey, IMMUTABLE_POLICY_CONFLICT};
use super::jwk::Jwk;
use super::releasepolicy::ReleasePolicy;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredKey {
    key: Jwk,
    policy: ReleasePolicy,
    immutable: bool,
    exportable: bool,
    tags: BTreeMap<String, String>,
}

/// In-memory managed key vault.  Keys imported under an immutable policy
/// can never be re-imported, and private material is only handed out by
/// [`MemoKeyVault::release`] against a satisfying set of token claims.
#[derive(Debug, Default)]
pub struct MemoKeyVault {
    keys: RwLock<HashMap<String, StoredKey>>,
    secrets: RwLock<HashMap<String, String>>,
    imports: RwLock<HashMap<String, u32>>,
    unavailable: AtomicU32,
}

impl MemoKeyVault {
    pub fn new() -> Self {
        Default::default()
    }

    /// Make the next `n` calls fail as if the vault were unreachable
    pub fn fail_next(&self, n: u32) {
        self.unavailable.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), Error> {
        let took = self
            .unavailable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if took {
            return Err(Error::DependencyUnavailable(
                "vault: service unavailable".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of successful imports for `name`
    pub fn import_count(&self, name: &str) -> Result<u32, Error> {
        Ok(*self
            .imports
            .read()
            .map_err(poisoned)?
            .get(name)
            .unwrap_or(&0))
    }

    /// The release policy attached to `name`
    pub fn release_policy(&self, name: &str) -> Result<ReleasePolicy, Error> {
        self.keys
            .read()
            .map_err(poisoned)?
            .get(name)
            .map(|k| k.policy.clone())
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    /// Release the private key `name` to a holder of a token from
    /// `authority` carrying `claims`
    pub fn release(
        &self,
        name: &str,
        authority: &str,
        claims: &Map<String, Value>,
    ) -> Result<Jwk, Error> {
        self.check_available()?;

        let keys = self.keys.read().map_err(poisoned)?;
        let k = keys
            .get(name)
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))?;

        if !k.exportable {
            return Err(Error::ReleaseDenied(format!("{name} is not exportable")));
        }

        if !k.policy.is_satisfied_by(authority, claims) {
            return Err(Error::ReleaseDenied(format!(
                "token does not satisfy the release policy of {name}"
            )));
        }

        let mut jwk = k.key.clone();
        jwk.kid = Some(name.to_string());
        Ok(jwk)
    }

    /// Store the key; a refusal is reported the way the vault reports it,
    /// as message text
    fn import_locked(
        &self,
        name: &str,
        req: &ImportKeyRequest,
        policy: ReleasePolicy,
    ) -> Result<Result<(), String>, Error> {
        let mut keys = self.keys.write().map_err(poisoned)?;

        if let Some(existing) = keys.get(name) {
            if existing.immutable {
                return Ok(Err(format!(
                    "(Conflict) {IMMUTABLE_POLICY_CONFLICT}. Key: '{name}'"
                )));
            }
        }

        let mut key = req.key.clone();
        key.kty = match key.kty.as_str() {
            "RSA" if req.hsm => "RSA-HSM".to_string(),
            "EC" if req.hsm => "EC-HSM".to_string(),
            other => other.to_string(),
        };

        keys.insert(
            name.to_string(),
            StoredKey {
                key,
                policy,
                immutable: req.release_policy.immutable,
                exportable: req.attributes.exportable,
                tags: req.tags.clone(),
            },
        );

        Ok(Ok(()))
    }
}

impl IKeyVault for MemoKeyVault {
    fn get_key(&self, name: &str) -> Result<Option<VaultKey>, Error> {
        self.check_available()?;

        Ok(self.keys.read().map_err(poisoned)?.get(name).map(|k| {
            let mut key = k.key.to_public();
            key.kid = Some(name.to_string());
            VaultKey {
                name: name.to_string(),
                key,
                tags: k.tags.clone(),
            }
        }))
    }

    fn import_key(&self, name: &str, req: &ImportKeyRequest) -> Result<ImportOutcome, Error> {
        self.check_available()?;

        if !req.key.is_private() {
            return Err(Error::Syntax(
                "key import: key must contain private material".to_string(),
            ));
        }

        let policy = req.policy()?;

        match self.import_locked(name, req, policy)? {
            Ok(()) => {
                *self
                    .imports
                    .write()
                    .map_err(poisoned)?
                    .entry(name.to_string())
                    .or_default() += 1;
                Ok(ImportOutcome::Imported)
            }
            Err(msg) => ImportOutcome::from_vault_error(&msg),
        }
    }

    fn list_keys(&self) -> Result<Vec<String>, Error> {
        self.check_available()?;

        let mut names: Vec<String> = self.keys.read().map_err(poisoned)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn get_secret(&self, name: &str) -> Result<Option<String>, Error> {
        self.check_available()?;

        Ok(self.secrets.read().map_err(poisoned)?.get(name).cloned())
    }

    fn set_secret(&self, name: &str, value: &str) -> Result<(), Error> {
        self.check_available()?;

        self.secrets
            .write()
            .map_err(poisoned)?
            .insert(name.to_string(), value.to_string());

        Ok(())
    }

    fn delete_secret(&self, name: &str) -> Result<(), Error> {
        self.check_available()?;

        self.secrets.write().map_err(poisoned)?.remove(name);

        Ok(())
    }
}
