// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::isidecar::{IReleaseSidecar, ReleaseRequest, ReleaseResponse};
use super::memo_keyvault::MemoKeyVault;
use super::releasepolicy::snp_token_claims;
use crate::attestation::HostData;
use serde_json::{Map, Value};
use std::sync::Arc;

/// In-memory release sidecar bound to a [`MemoKeyVault`].  It stands for an
/// environment whose attestation token carries the given claims.
pub struct MemoReleaseSidecar {
    endpoint: String,
    vault: Arc<MemoKeyVault>,
    claims: Map<String, Value>,
    access_token: String,
}

impl MemoReleaseSidecar {
    /// A sidecar answering on `endpoint` only
    pub fn new(
        endpoint: &str,
        vault: Arc<MemoKeyVault>,
        claims: Map<String, Value>,
        access_token: &str,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            vault,
            claims,
            access_token: access_token.to_string(),
        }
    }

    /// A sidecar running in a compliant SEV-SNP UVM with `host_data`
    pub fn for_host_data(
        endpoint: &str,
        vault: Arc<MemoKeyVault>,
        host_data: &HostData,
        access_token: &str,
    ) -> Self {
        Self::new(endpoint, vault, snp_token_claims(host_data), access_token)
    }
}

impl IReleaseSidecar for MemoReleaseSidecar {
    fn release(&self, endpoint: &str, req: &ReleaseRequest) -> Result<ReleaseResponse, Error> {
        if endpoint != self.endpoint {
            return Err(Error::DependencyUnavailable(format!(
                "no release sidecar at {endpoint}"
            )));
        }

        if req.access_token != self.access_token {
            return Err(Error::ReleaseDenied("vault rejected the access token".to_string()));
        }

        let jwk = self.vault.release(&req.kid, &req.maa_endpoint, &self.claims)?;

        let key = serde_json::to_string(&jwk).map_err(|e| Error::Internal(e.to_string()))?;

        Ok(ReleaseResponse { key })
    }
}
