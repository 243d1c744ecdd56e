// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::chain::build_chain;
use super::claims::UvmClaims;
use super::errors::Error;
use crate::cose::{CoseSign1, HEADER_X5CHAIN};
use ciborium::Value;
use openssl::hash::{hash, MessageDigest};
use openssl::x509::{X509Ref, X509};
use serde::{Deserialize, Serialize};
use x509_cert::der::Decode;
use x509_cert::ext::pkix::ExtendedKeyUsage;
use x509_cert::Certificate;

/// Issuer of the Azure confidential container UVM endorsements
pub const UVM_ISSUER: &str =
    "did:x509:0:sha256:I__iuL25oXEVFdTP_aBLx_eT1RPHbCQ_ECBQfYZpt9s::eku:1.3.6.1.4.1.311.76.59.1.2";

/// Feed of the Azure confidential container UVM endorsements
pub const UVM_FEED: &str = "ContainerPlat-AMD-UVM";

const HEADER_ISSUER: &str = "iss";
const HEADER_FEED: &str = "feed";

const OID_EXT_KEY_USAGE: &str = "2.5.29.37";

const DID_X509_PREFIX: &str = "did:x509:0:";
const DID_EKU_POLICY: &str = "eku:";

/// The (issuer, feed) pair a UVM endorsement must carry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsementPolicy {
    pub issuer: String,
    pub feed: String,
}

impl Default for EndorsementPolicy {
    fn default() -> Self {
        Self {
            issuer: UVM_ISSUER.to_string(),
            feed: UVM_FEED.to_string(),
        }
    }
}

/// A parsed `did:x509` value restricted to the subset used for UVM
/// endorsements: a CA fingerprint followed by an EKU policy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DidX509 {
    pub hash_alg: String,
    pub ca_fingerprint: Vec<u8>,
    pub eku: String,
}

impl DidX509 {
    pub fn parse(did: &str) -> Result<DidX509, Error> {
        let rest = did.strip_prefix(DID_X509_PREFIX).ok_or_else(|| {
            Error::Endorsement(format!("{did}: not a version 0 did:x509"))
        })?;

        let mut parts = rest.split("::");

        let ca = parts
            .next()
            .ok_or_else(|| Error::Endorsement(format!("{did}: missing CA fingerprint")))?;

        let (hash_alg, fp) = ca
            .split_once(':')
            .ok_or_else(|| Error::Endorsement(format!("{did}: malformed CA fingerprint")))?;

        hash_for(hash_alg)?;

        let ca_fingerprint = base64::decode_url_str(fp, "did:x509 fingerprint")
            .map_err(|e| Error::Endorsement(e.to_string()))?;

        let eku = parts
            .find_map(|p| p.strip_prefix(DID_EKU_POLICY))
            .ok_or_else(|| Error::Endorsement(format!("{did}: missing eku policy")))?;

        Ok(DidX509 {
            hash_alg: hash_alg.to_string(),
            ca_fingerprint,
            eku: eku.to_string(),
        })
    }

    fn matches(&self, cert: &X509Ref) -> bool {
        let Ok(md) = hash_for(&self.hash_alg) else {
            return false;
        };

        cert.to_der()
            .and_then(|der| hash(md, &der))
            .map(|d| d.as_ref() == self.ca_fingerprint.as_slice())
            .unwrap_or(false)
    }
}

fn hash_for(alg: &str) -> Result<MessageDigest, Error> {
    match alg {
        "sha256" => Ok(MessageDigest::sha256()),
        "sha384" => Ok(MessageDigest::sha384()),
        "sha512" => Ok(MessageDigest::sha512()),
        x => Err(Error::Endorsement(format!("did:x509: unknown hash {x}"))),
    }
}

#[derive(Debug, Deserialize)]
struct UvmPayload {
    #[serde(rename = "launchMeasurement", alias = "x-ms-sevsnpvm-launchmeasurement")]
    launch_measurement: String,
    #[serde(default, rename = "svn", alias = "x-ms-sevsnpvm-guestsvn")]
    svn: Option<String>,
}

fn header_text(msg: &CoseSign1, label: &str) -> Result<String, Error> {
    match msg.text_header(label) {
        Some(Value::Text(t)) => Ok(t.clone()),
        Some(_) => Err(Error::Endorsement(format!("{label} MUST be tstr"))),
        None => Err(Error::Endorsement(format!(
            "{label} header parameter not found"
        ))),
    }
}

fn x5chain(msg: &CoseSign1) -> Result<Vec<X509>, Error> {
    let ders: Vec<&Vec<u8>> = match msg.header(HEADER_X5CHAIN) {
        Some(Value::Bytes(b)) => vec![b],
        Some(Value::Array(a)) => a
            .iter()
            .map(|v| match v {
                Value::Bytes(b) => Ok(b),
                _ => Err(Error::Endorsement("x5chain entries MUST be bstr".to_string())),
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(Error::Endorsement(
                "x5chain MUST be bstr or array".to_string(),
            ))
        }
        None => {
            return Err(Error::Endorsement(
                "x5chain header parameter not found".to_string(),
            ))
        }
    };

    ders.into_iter()
        .map(|d| X509::from_der(d).map_err(|e| Error::Endorsement(format!("x5chain: {e}"))))
        .collect()
}

fn leaf_has_eku(leaf: &X509Ref, eku: &str) -> Result<bool, Error> {
    let der = leaf
        .to_der()
        .map_err(|e| Error::Endorsement(format!("leaf certificate: {e}")))?;

    let cert = Certificate::from_der(&der)
        .map_err(|e| Error::Endorsement(format!("leaf certificate: {e}")))?;

    let exts = cert.tbs_certificate.extensions.unwrap_or_default();

    for ext in exts.iter() {
        if ext.extn_id.to_string() != OID_EXT_KEY_USAGE {
            continue;
        }

        let usages = ExtendedKeyUsage::from_der(ext.extn_value.as_bytes())
            .map_err(|e| Error::Endorsement(format!("extended key usage: {e}")))?;

        return Ok(usages.0.iter().any(|oid| oid.to_string() == eku));
    }

    Ok(false)
}

/// Verify a COSE Sign1 UVM endorsement and bind it to the launch measurement
/// found in the hardware report
pub fn verify_uvm_endorsement(
    buf: &[u8],
    policy: &EndorsementPolicy,
    measurement: &[u8; 48],
) -> Result<UvmClaims, Error> {
    let msg = CoseSign1::decode(buf).map_err(|e| Error::Endorsement(e.to_string()))?;

    let iss = header_text(&msg, HEADER_ISSUER)?;
    if iss != policy.issuer {
        return Err(Error::Endorsement(format!("untrusted issuer {iss}")));
    }

    let feed = header_text(&msg, HEADER_FEED)?;
    if feed != policy.feed {
        return Err(Error::Endorsement(format!("untrusted feed {feed}")));
    }

    let did = DidX509::parse(&policy.issuer)?;

    let certs = x5chain(&msg)?;
    let (leaf, rest) = certs
        .split_first()
        .ok_or_else(|| Error::Endorsement("empty x5chain".to_string()))?;

    let (anchors, intermediates): (Vec<X509>, Vec<X509>) =
        rest.iter().cloned().partition(|c| did.matches(c));

    if anchors.is_empty() {
        return Err(Error::Endorsement(
            "x5chain does not contain the pinned CA".to_string(),
        ));
    }

    // endorsement signing certificates are routinely past their validity
    // window; only the path matters
    let chain = build_chain(leaf, &intermediates, &anchors, true)
        .map_err(|e| Error::Endorsement(format!("building x5chain: {e}")))?;

    if !chain.last().map(|r| did.matches(r)).unwrap_or(false) {
        return Err(Error::Endorsement(
            "x5chain does not terminate at the pinned CA".to_string(),
        ));
    }

    if !leaf_has_eku(leaf, &did.eku)? {
        return Err(Error::Endorsement(format!(
            "signing certificate lacks EKU {}",
            did.eku
        )));
    }

    let pkey = leaf
        .public_key()
        .map_err(|e| Error::Endorsement(format!("signing key: {e}")))?;

    let ok = msg
        .verify(&pkey)
        .map_err(|e| Error::Endorsement(e.to_string()))?;
    if !ok {
        return Err(Error::Endorsement("signature verification failed".to_string()));
    }

    let payload: UvmPayload = serde_json::from_slice(&msg.payload)
        .map_err(|e| Error::Endorsement(format!("payload: {e}")))?;

    let expected = hex::encode(measurement);
    if !payload.launch_measurement.eq_ignore_ascii_case(&expected) {
        return Err(Error::Endorsement(format!(
            "launch measurement {} does not match the report ({expected})",
            payload.launch_measurement
        )));
    }

    Ok(UvmClaims {
        issuer: iss,
        feed,
        launch_measurement: expected,
        svn: payload.svn,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestUvm;

    const MEASUREMENT: [u8; 48] = [0x5a; 48];

    #[test]
    fn parse_default_issuer() {
        let d = DidX509::parse(UVM_ISSUER).unwrap();

        assert_eq!(d.hash_alg, "sha256");
        assert_eq!(d.ca_fingerprint.len(), 32);
        assert_eq!(d.eku, "1.3.6.1.4.1.311.76.59.1.2");
    }

    #[test]
    fn parse_bad_did() {
        assert!(DidX509::parse("did:web:example.com").is_err());
        assert!(DidX509::parse("did:x509:0:md5:AAAA::eku:1.2.3").is_err());
        assert!(DidX509::parse("did:x509:0:sha256:AAAA::subject:CN:x").is_err());
    }

    #[test]
    fn endorsement_ok() {
        let u = TestUvm::new();

        let buf = u.endorsement(&MEASUREMENT);
        let c = verify_uvm_endorsement(&buf, &u.policy(), &MEASUREMENT).unwrap();

        assert_eq!(c.launch_measurement, hex::encode(MEASUREMENT));
        assert_eq!(c.feed, u.policy().feed);
        assert_eq!(c.svn.as_deref(), Some("101"));
    }

    #[test]
    fn endorsement_measurement_mismatch() {
        let u = TestUvm::new();

        let buf = u.endorsement(&[0x00; 48]);
        let e = verify_uvm_endorsement(&buf, &u.policy(), &MEASUREMENT).unwrap_err();

        assert_eq!(e.code(), "EndorsementError");
    }

    #[test]
    fn endorsement_wrong_feed() {
        let u = TestUvm::new();

        let mut policy = u.policy();
        policy.feed = "SomethingElse".to_string();

        let buf = u.endorsement(&MEASUREMENT);
        assert!(verify_uvm_endorsement(&buf, &policy, &MEASUREMENT).is_err());
    }

    #[test]
    fn endorsement_unpinned_ca() {
        let u = TestUvm::new();
        let other = TestUvm::new();

        // same issuer string, but chains to a different CA
        let buf = other.endorsement_with_issuer(&MEASUREMENT, &u.policy().issuer);
        let e = verify_uvm_endorsement(&buf, &u.policy(), &MEASUREMENT).unwrap_err();

        assert_eq!(e.code(), "EndorsementError");
    }

    #[test]
    fn endorsement_missing_eku() {
        let u = TestUvm::with_leaf_eku("1.2.3.4");

        let buf = u.endorsement(&MEASUREMENT);
        let e = verify_uvm_endorsement(&buf, &u.policy(), &MEASUREMENT).unwrap_err();

        assert!(e.to_string().contains("EKU"));
    }

    #[test]
    fn endorsement_garbage() {
        let u = TestUvm::new();

        let e = verify_uvm_endorsement(&[0xff, 0x00], &u.policy(), &MEASUREMENT).unwrap_err();

        assert_eq!(e.code(), "EndorsementError");
    }
}
