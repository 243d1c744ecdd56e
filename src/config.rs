// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::attestation::{EndorsementPolicy, HostData, AMD_ARK_GENOA_SPKI_SHA256};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

pub const ENV_MAA_ENDPOINT: &str = "RECOVERY_MAA_ENDPOINT";
pub const ENV_AKV_ENDPOINT: &str = "RECOVERY_AKV_ENDPOINT";
pub const ENV_SKR_ENDPOINT: &str = "RECOVERY_SKR_ENDPOINT";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "RECOVERY_RETRY_MAX_ATTEMPTS";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// attestation authority named in key release policies
    pub maa_endpoint: String,
    /// managed key vault
    pub akv_endpoint: String,
    /// secure key release sidecar
    pub skr_endpoint: String,
    /// hex SHA-256 of the SubjectPublicKeyInfo of each pinned AMD root
    pub trusted_amd_roots: Vec<String>,
    pub uvm_endorsement: EndorsementPolicy,
    /// hostData values trusted for key provenance besides the service's own
    pub trusted_host_data: Vec<HostData>,
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            maa_endpoint: "sharedeus.eus.attest.azure.net".to_string(),
            akv_endpoint: String::new(),
            skr_endpoint: "http://localhost:8080/key/release".to_string(),
            trusted_amd_roots: vec![AMD_ARK_GENOA_SPKI_SHA256.to_string()],
            uvm_endorsement: EndorsementPolicy::default(),
            trusted_host_data: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn load_json(j: &str) -> Result<Config, Error> {
        let cfg: Config = serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Apply overrides from the process environment
    pub fn with_env(self) -> Result<Config, Error> {
        self.with_overrides(|k| std::env::var(k).ok())
    }

    fn with_overrides<F>(mut self, get: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get(ENV_MAA_ENDPOINT) {
            self.maa_endpoint = v;
        }

        if let Some(v) = get(ENV_AKV_ENDPOINT) {
            self.akv_endpoint = v;
        }

        if let Some(v) = get(ENV_SKR_ENDPOINT) {
            self.skr_endpoint = v;
        }

        if let Some(v) = get(ENV_RETRY_MAX_ATTEMPTS) {
            self.retry.max_attempts = v
                .parse()
                .map_err(|_| Error::InvalidValue(ENV_RETRY_MAX_ATTEMPTS.to_string(), v))?;
        }

        self.validate()?;

        Ok(self)
    }

    fn validate(&self) -> Result<(), Error> {
        for fp in self.trusted_amd_roots.iter() {
            if fp.len() != 64 || hex::decode(fp).is_err() {
                return Err(Error::InvalidValue(
                    "trustedAmdRoots".to_string(),
                    fp.clone(),
                ));
            }
        }

        if self.skr_endpoint.is_empty() {
            return Err(Error::InvalidValue(
                "skrEndpoint".to_string(),
                String::new(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidValue(
                "retry.maxAttempts".to_string(),
                "0".to_string(),
            ));
        }

        Ok(())
    }
}
