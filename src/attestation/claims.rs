// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::common::is_valid_host_data;
use super::errors::Error;
use super::report::{SnpReport, TcbVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One attestation submission in its wire form: every field is base64
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationEvidence {
    /// base64 raw SEV-SNP report
    pub evidence: String,
    /// base64 PEM bundle (VCEK, ASK, ARK)
    pub endorsements: String,
    /// base64 COSE Sign1 UVM endorsement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uvm_endorsements: Option<String>,
}

/// The 32-byte hostData digest.  Parsing is case-insensitive and rendering
/// is always lowercase, so two spellings of the same value compare equal.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostData(pub [u8; 32]);

impl FromStr for HostData {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if !is_valid_host_data(s) {
            return Err(Error::Format(format!(
                "host data: expecting 64 hex characters, got {s:?}"
            )));
        }

        let mut v = [0u8; 32];
        hex::decode_to_slice(s, &mut v).map_err(|e| Error::Format(format!("host data: {e}")))?;

        Ok(HostData(v))
    }
}

impl fmt::Display for HostData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for HostData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostData({self})")
    }
}

impl Serialize for HostData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HostData {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;

        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Claims carried by a verified UVM endorsement
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvmClaims {
    pub issuer: String,
    pub feed: String,
    pub launch_measurement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn: Option<String>,
}

/// Verified facts about the reporting instance.  Only a successful
/// [`super::AttestationVerifier::verify`] produces these.
#[serde_with::serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationClaims {
    pub host_data: HostData,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub report_data: [u8; 64],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub launch_measurement: [u8; 48],
    pub debug_allowed: bool,
    pub smt_allowed: bool,
    pub migrate_allowed: bool,
    pub version: u32,
    pub guest_svn: u32,
    pub vmpl: u32,
    pub reported_tcb: TcbVersion,
    pub current_tcb: TcbVersion,
    pub committed_tcb: TcbVersion,
    pub launch_tcb: TcbVersion,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub family_id: [u8; 16],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub image_id: [u8; 16],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub report_id: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub id_key_digest: [u8; 48],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub author_key_digest: [u8; 48],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub chip_id: [u8; 64],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uvm: Option<UvmClaims>,
}

impl AttestationClaims {
    pub(crate) fn from_report(r: &SnpReport, uvm: Option<UvmClaims>) -> Self {
        Self {
            host_data: HostData(r.host_data),
            report_data: r.report_data,
            launch_measurement: r.measurement,
            debug_allowed: r.debug_allowed(),
            smt_allowed: r.smt_allowed(),
            migrate_allowed: r.migrate_allowed(),
            version: r.version,
            guest_svn: r.guest_svn,
            vmpl: r.vmpl,
            reported_tcb: r.reported_tcb,
            current_tcb: r.current_tcb,
            committed_tcb: r.committed_tcb,
            launch_tcb: r.launch_tcb,
            family_id: r.family_id,
            image_id: r.image_id,
            report_id: r.report_id,
            id_key_digest: r.id_key_digest,
            author_key_digest: r.author_key_digest,
            chip_id: r.chip_id,
            uvm,
        }
    }

    /// reportData as lowercase hex
    pub fn report_data_hex(&self) -> String {
        hex::encode(self.report_data)
    }

    /// launch measurement as lowercase hex
    pub fn measurement_hex(&self) -> String {
        hex::encode(self.launch_measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_data_case_insensitive() {
        let a: HostData = "AA".repeat(32).parse().unwrap();
        let b: HostData = "aa".repeat(32).parse().unwrap();

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "aa".repeat(32));
    }

    #[test]
    fn host_data_bad_length() {
        let r = "aa".repeat(16).parse::<HostData>();

        assert_eq!(r.unwrap_err().code(), "FormatError");
    }

    #[test]
    fn host_data_json() {
        let j = format!("\"{}\"", "0F".repeat(32));
        let h: HostData = serde_json::from_str(&j).unwrap();

        assert_eq!(h.0, [0x0f; 32]);
        assert_eq!(serde_json::to_string(&h).unwrap(), format!("\"{}\"", "0f".repeat(32)));
    }

    #[test]
    fn evidence_wire_names() {
        let j = r#"{"evidence":"AA==","endorsements":"BB==","uvmEndorsements":"CC=="}"#;
        let e: AttestationEvidence = serde_json::from_str(j).unwrap();

        assert_eq!(e.uvm_endorsements.as_deref(), Some("CC=="));

        let j = r#"{"evidence":"AA==","endorsements":"BB=="}"#;
        let e: AttestationEvidence = serde_json::from_str(j).unwrap();

        assert!(e.uvm_endorsements.is_none());
    }
}
