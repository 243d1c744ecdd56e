// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::HostData;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The set of hostData values the network currently trusts.
///
/// The wire form is `{"snp": {"hostData": {"<64 hex>": true, ...}}}`.  Keys
/// mapped to `false` are ignored; any key that is not a 32-byte hex digest
/// makes the whole document malformed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "JoinPolicyDoc", into = "JoinPolicyDoc")]
pub struct JoinPolicy {
    host_data: BTreeSet<HostData>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JoinPolicyDoc {
    pub snp: SnpPolicy,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnpPolicy {
    #[serde(rename = "hostData")]
    pub host_data: BTreeMap<String, bool>,
}

impl TryFrom<JoinPolicyDoc> for JoinPolicy {
    type Error = Error;

    fn try_from(doc: JoinPolicyDoc) -> Result<Self, Error> {
        let mut host_data = BTreeSet::new();

        for (k, trusted) in doc.snp.host_data.iter() {
            let h: HostData = k
                .parse()
                .map_err(|_| Error::PolicyMalformed(format!("invalid hostData {k:?}")))?;

            if *trusted {
                host_data.insert(h);
            }
        }

        Ok(JoinPolicy { host_data })
    }
}

impl From<JoinPolicy> for JoinPolicyDoc {
    fn from(p: JoinPolicy) -> Self {
        JoinPolicyDoc {
            snp: SnpPolicy {
                host_data: p.host_data.iter().map(|h| (h.to_string(), true)).collect(),
            },
        }
    }
}

impl JoinPolicy {
    pub fn new<I: IntoIterator<Item = HostData>>(host_data: I) -> Self {
        Self {
            host_data: host_data.into_iter().collect(),
        }
    }

    /// Parse the wire form, keeping malformed hostData distinct from
    /// malformed JSON
    pub fn from_json(j: &[u8]) -> Result<Self, Error> {
        let doc: JoinPolicyDoc =
            serde_json::from_slice(j).map_err(|e| Error::PolicyMalformed(e.to_string()))?;

        JoinPolicy::try_from(doc)
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn contains(&self, h: &HostData) -> bool {
        self.host_data.contains(h)
    }

    pub fn insert(&mut self, h: HostData) -> bool {
        self.host_data.insert(h)
    }

    pub fn remove(&mut self, h: &HostData) -> bool {
        self.host_data.remove(h)
    }

    pub fn is_empty(&self) -> bool {
        self.host_data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.host_data.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostData> {
        self.host_data.iter()
    }
}
