// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::jwk::Jwk;
use super::releasepolicy::ReleasePolicy;
use crate::attestation::base64;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The vault's message when an import would replace an immutable release
/// policy
pub const IMMUTABLE_POLICY_CONFLICT: &str = "Immutable Key Release Policy cannot be modified";

pub const RELEASE_POLICY_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Outcome of importing a key under an immutable release policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportOutcome {
    /// the key is now stored under the supplied policy
    Imported,
    /// a key with this name already carries an immutable policy; the import
    /// was refused and the existing key is untouched
    PolicyConflict,
}

impl ImportOutcome {
    /// Classify an error message returned by the vault for a refused
    /// import.  The vault signals an immutable policy collision only through
    /// this message text.
    pub fn from_vault_error(msg: &str) -> Result<ImportOutcome, Error> {
        if msg.contains(IMMUTABLE_POLICY_CONFLICT) {
            Ok(ImportOutcome::PolicyConflict)
        } else {
            Err(Error::DependencyUnavailable(format!("key import: {msg}")))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAttributes {
    pub exportable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReleasePolicy {
    #[serde(rename = "contentType")]
    pub content_type: String,
    /// base64url release policy document
    pub data: String,
    pub immutable: bool,
}

/// The import request sent to the managed key vault
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportKeyRequest {
    pub key: Jwk,
    pub hsm: bool,
    pub attributes: KeyAttributes,
    pub release_policy: KeyReleasePolicy,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ImportKeyRequest {
    /// An HSM-protected, exportable import under an immutable `policy`
    pub fn new(
        key: Jwk,
        policy: &ReleasePolicy,
        tags: BTreeMap<String, String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            key,
            hsm: true,
            attributes: KeyAttributes { exportable: true },
            release_policy: KeyReleasePolicy {
                content_type: RELEASE_POLICY_CONTENT_TYPE.to_string(),
                data: base64::encode_url(policy.to_json()?.as_bytes()),
                immutable: true,
            },
            tags,
        })
    }

    /// Decode the embedded release policy document
    pub fn policy(&self) -> Result<ReleasePolicy, Error> {
        let j = base64::decode_url_str(&self.release_policy.data, "release policy")
            .map_err(|e| Error::Syntax(e.to_string()))?;

        ReleasePolicy::from_json(&j)
    }
}

/// A key as published by the vault: public material and tags only
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VaultKey {
    pub name: String,
    pub key: Jwk,
    pub tags: BTreeMap<String, String>,
}

/// Interface to the managed key vault
pub trait IKeyVault: Send + Sync {
    /// Public material of the key `name`, if it exists
    fn get_key(&self, name: &str) -> Result<Option<VaultKey>, Error>;

    /// Import a private key.  A collision with an existing immutable policy
    /// is an outcome, not an error.
    fn import_key(&self, name: &str, req: &ImportKeyRequest) -> Result<ImportOutcome, Error>;

    /// Names of all the keys in the vault
    fn list_keys(&self) -> Result<Vec<String>, Error>;

    fn get_secret(&self, name: &str) -> Result<Option<String>, Error>;

    fn set_secret(&self, name: &str, value: &str) -> Result<(), Error>;

    /// Remove the secret `name`; removing an absent secret is not an error
    fn delete_secret(&self, name: &str) -> Result<(), Error>;
}
