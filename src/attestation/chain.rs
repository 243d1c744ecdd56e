// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::common::spki_fingerprint;
use super::errors::Error;
use super::report::SnpReport;
use openssl::bn::BigNum;
use openssl::ecdsa::EcdsaSig;
use openssl::sha::sha384;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509Ref, X509StoreContext, X509VerifyResult, X509};
use std::collections::BTreeSet;

/// SHA-256 of the SubjectPublicKeyInfo of the AMD Root Key for Genoa
pub const AMD_ARK_GENOA_SPKI_SHA256: &str =
    "429a69c9422aa258ee4d8db5fcda9c6470ef15f8cd5a9cebd6cbc7d90b863831";

/// The pinned set of AMD root keys, identified by SPKI fingerprint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedRoots {
    fingerprints: BTreeSet<String>,
}

impl Default for TrustedRoots {
    fn default() -> Self {
        Self::new([AMD_ARK_GENOA_SPKI_SHA256])
    }
}

impl TrustedRoots {
    pub fn new<I, S>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fingerprints: fingerprints
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(&fingerprint.to_ascii_lowercase())
    }

    fn is_pinned(&self, cert: &X509Ref) -> bool {
        cert.public_key()
            .ok()
            .and_then(|k| spki_fingerprint(&k).ok())
            .map(|fp| self.contains(&fp))
            .unwrap_or(false)
    }
}

/// Extract every certificate from a PEM bundle, in order
pub fn parse_pem_bundle(pem: &str) -> Result<Vec<X509>, Error> {
    let certs = X509::stack_from_pem(pem.as_bytes())
        .map_err(|e| Error::TrustChain(format!("decoding certificate bundle: {e}")))?;

    if certs.is_empty() {
        return Err(Error::TrustChain("empty certificate bundle".to_string()));
    }

    Ok(certs)
}

pub fn is_self_signed(cert: &X509Ref) -> bool {
    cert.issued(cert) == X509VerifyResult::OK
}

/// Build and validate the path from `leaf` to one of `anchors`, using the
/// `intermediates` as untrusted material.  Returns the built chain, leaf
/// first and anchor last.
pub fn build_chain(
    leaf: &X509Ref,
    intermediates: &[X509],
    anchors: &[X509],
    ignore_time: bool,
) -> Result<Vec<X509>, String> {
    let mut sb = X509StoreBuilder::new().map_err(|e| e.to_string())?;

    for a in anchors.iter() {
        sb.add_cert(a.clone()).map_err(|e| e.to_string())?;
    }

    if ignore_time {
        sb.set_flags(X509VerifyFlags::NO_CHECK_TIME)
            .map_err(|e| e.to_string())?;
    }

    let store = sb.build();

    let mut untrusted = Stack::new().map_err(|e| e.to_string())?;
    for c in intermediates.iter() {
        untrusted.push(c.clone()).map_err(|e| e.to_string())?;
    }

    let mut ctx = X509StoreContext::new().map_err(|e| e.to_string())?;

    let (ok, reason, chain) = ctx
        .init(&store, leaf, &untrusted, |c| {
            let ok = c.verify_cert()?;
            let chain: Vec<X509> = c
                .chain()
                .map(|s| s.iter().map(|x| x.to_owned()).collect())
                .unwrap_or_default();
            Ok((ok, c.error().error_string(), chain))
        })
        .map_err(|e| e.to_string())?;

    if !ok {
        return Err(reason.to_string());
    }

    Ok(chain)
}

/// Validate the VCEK chain found in `bundle` (leaf first) up to a pinned AMD
/// root and return the VCEK
pub fn verify_vcek_chain(bundle: &[X509], roots: &TrustedRoots) -> Result<X509, Error> {
    let (leaf, rest) = bundle
        .split_first()
        .ok_or_else(|| Error::TrustChain("empty certificate bundle".to_string()))?;

    let (anchors, intermediates): (Vec<X509>, Vec<X509>) = rest
        .iter()
        .cloned()
        .partition(|c| is_self_signed(c) && roots.is_pinned(c));

    if anchors.is_empty() {
        return Err(Error::TrustChain(
            "no pinned AMD root key found in the certificate bundle".to_string(),
        ));
    }

    let chain = build_chain(leaf, &intermediates, &anchors, false)
        .map_err(|e| Error::TrustChain(format!("building VCEK chain: {e}")))?;

    match chain.last() {
        Some(root) if roots.is_pinned(root) => Ok(leaf.clone()),
        _ => Err(Error::TrustChain(
            "chain does not terminate at a pinned AMD root key".to_string(),
        )),
    }
}

/// Verify the ECDSA P-384/SHA-384 report signature using the VCEK key
pub fn verify_report_signature(report: &SnpReport, vcek: &X509Ref) -> Result<(), Error> {
    let ec = vcek
        .public_key()
        .and_then(|k| k.ec_key())
        .map_err(|e| Error::Signature(format!("VCEK public key: {e}")))?;

    let r = BigNum::from_slice(&report.signature_r)
        .map_err(|e| Error::Signature(format!("signature R: {e}")))?;
    let s = BigNum::from_slice(&report.signature_s)
        .map_err(|e| Error::Signature(format!("signature S: {e}")))?;

    let sig = EcdsaSig::from_private_components(r, s)
        .map_err(|e| Error::Signature(format!("signature: {e}")))?;

    let digest = sha384(report.signed_bytes());

    let ok = sig
        .verify(&digest, &ec)
        .map_err(|e| Error::Signature(format!("verifying report: {e}")))?;

    if !ok {
        return Err(Error::Signature(
            "report signature does not verify against the VCEK".to_string(),
        ));
    }

    Ok(())
}
