// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use serde::{Deserialize, Serialize};

/// Request to the secure key release sidecar
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub maa_endpoint: String,
    pub akv_endpoint: String,
    pub kid: String,
    pub access_token: String,
}

impl std::fmt::Debug for ReleaseRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseRequest")
            .field("maa_endpoint", &self.maa_endpoint)
            .field("akv_endpoint", &self.akv_endpoint)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// Sidecar response: the released private key as JWK JSON text
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub key: String,
}

/// Interface to the co-located release sidecar.  The sidecar obtains an
/// attestation token for the current environment and presents it to the
/// vault; release succeeds only if the key's policy accepts that token.
pub trait IReleaseSidecar: Send + Sync {
    /// Post `req` to the sidecar listening at `endpoint`
    fn release(&self, endpoint: &str, req: &ReleaseRequest) -> Result<ReleaseResponse, Error>;
}

/// Source of the bearer token used to reach the vault
pub trait ICredential: Send + Sync {
    fn token(&self) -> Result<String, Error>;
}

/// A fixed bearer token
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl ICredential for StaticCredential {
    fn token(&self) -> Result<String, Error> {
        Ok(self.0.clone())
    }
}
