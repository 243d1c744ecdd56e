// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::{crypto, Error};
use crate::attestation::{AttestationEvidence, HostData};
use crate::store::Jwk;
use openssl::ec::EcKey;
use openssl::pkey::{PKey, Private};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag recording the key type on every imported key
pub const TAG_KEY_TYPE: &str = "keyType";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// EC P-384, comes with a self-signed certificate
    Signing,
    /// RSA-2048
    Encryption,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Signing => "signing",
            KeyType::Encryption => "encryption",
        }
    }

    /// Infer the key type from the vault's key material
    pub fn from_jwk(jwk: &Jwk) -> Option<KeyType> {
        if jwk.is_ec() {
            Some(KeyType::Signing)
        } else if jwk.is_rsa() {
            Some(KeyType::Encryption)
        } else {
            None
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public metadata of a managed key, with its provenance re-verified
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub kid: String,
    pub key_type: KeyType,
    /// PEM SubjectPublicKeyInfo
    pub public_key: String,
    /// hex SHA-256 of the DER SubjectPublicKeyInfo
    pub fingerprint: String,
    /// PEM self-signed certificate, signing keys only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// evidence produced by the generating instance over the public key
    pub attestation: AttestationEvidence,
    /// verified hostData of the generating instance
    pub host_data: HostData,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A released private key
pub struct PrivateKeyInfo {
    pub kid: String,
    pub key_type: KeyType,
    pub key: PKey<Private>,
}

impl PrivateKeyInfo {
    pub fn ec_key(&self) -> Result<EcKey<Private>, Error> {
        if self.key_type != KeyType::Signing {
            return Err(Error::InvalidRequest(format!(
                "{} is not a signing key",
                self.kid
            )));
        }

        self.key.ec_key().map_err(crypto)
    }
}

impl fmt::Debug for PrivateKeyInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyInfo")
            .field("kid", &self.kid)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}
