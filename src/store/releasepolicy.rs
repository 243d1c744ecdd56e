// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::HostData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RELEASE_POLICY_VERSION: &str = "1.0.0";

pub const CLAIM_HOST_DATA: &str = "x-ms-sevsnpvm-hostdata";
pub const CLAIM_COMPLIANCE_STATUS: &str = "x-ms-compliance-status";
pub const CLAIM_ATTESTATION_TYPE: &str = "x-ms-attestation-type";

pub const COMPLIANT_UVM: &str = "azure-compliant-uvm";
pub const ATTESTATION_TYPE_SNP: &str = "sevsnpvm";

/// A secure key release policy: the key is released to a requester whose
/// attestation token, issued by one of the listed authorities, satisfies
/// every condition of that authority's rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePolicy {
    pub version: String,
    pub any_of: Vec<AuthorityRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityRule {
    pub authority: String,
    pub all_of: Vec<ClaimCondition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimCondition {
    pub claim: String,
    pub equals: Value,
}

impl ClaimCondition {
    fn text(claim: &str, equals: &str) -> Self {
        Self {
            claim: claim.to_string(),
            equals: Value::String(equals.to_string()),
        }
    }

    fn holds(&self, claims: &Map<String, Value>) -> bool {
        claims.get(&self.claim) == Some(&self.equals)
    }
}

impl ReleasePolicy {
    /// The policy pinning a key to instances running with `host_data` on a
    /// compliant SEV-SNP UVM, as attested by `authority`
    pub fn for_host_data(authority: &str, host_data: &HostData) -> Self {
        Self {
            version: RELEASE_POLICY_VERSION.to_string(),
            any_of: vec![AuthorityRule {
                authority: authority.to_string(),
                all_of: vec![
                    ClaimCondition::text(CLAIM_HOST_DATA, &host_data.to_string()),
                    ClaimCondition::text(CLAIM_COMPLIANCE_STATUS, COMPLIANT_UVM),
                    ClaimCondition::text(CLAIM_ATTESTATION_TYPE, ATTESTATION_TYPE_SNP),
                ],
            }],
        }
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn from_json(j: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(j).map_err(|e| Error::Syntax(format!("release policy: {e}")))
    }

    /// Evaluate the policy against the claims of a token from `authority`
    pub fn is_satisfied_by(&self, authority: &str, claims: &Map<String, Value>) -> bool {
        self.any_of.iter().any(|rule| {
            rule.authority.eq_ignore_ascii_case(authority)
                && !rule.all_of.is_empty()
                && rule.all_of.iter().all(|c| c.holds(claims))
        })
    }

    /// The hostData values this policy releases to
    pub fn host_data(&self) -> Vec<HostData> {
        self.any_of
            .iter()
            .flat_map(|r| r.all_of.iter())
            .filter(|c| c.claim == CLAIM_HOST_DATA)
            .filter_map(|c| c.equals.as_str().and_then(|s| s.parse().ok()))
            .collect()
    }
}

/// The claims an attestation authority would issue for a compliant SEV-SNP
/// UVM running with `host_data`
pub fn snp_token_claims(host_data: &HostData) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert(
        CLAIM_HOST_DATA.to_string(),
        Value::String(host_data.to_string()),
    );
    m.insert(
        CLAIM_COMPLIANCE_STATUS.to_string(),
        Value::String(COMPLIANT_UVM.to_string()),
    );
    m.insert(
        CLAIM_ATTESTATION_TYPE.to_string(),
        Value::String(ATTESTATION_TYPE_SNP.to_string()),
    );
    m
}
