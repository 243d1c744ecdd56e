// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use openssl::pkey::{HasPublic, PKeyRef};
use openssl::sha::sha256;
use openssl::x509::X509Ref;

use super::errors::Error;

/// SHA-256 over the DER SubjectPublicKeyInfo, lowercase hex
pub fn spki_fingerprint<T: HasPublic>(pkey: &PKeyRef<T>) -> Result<String, Error> {
    let der = pkey
        .public_key_to_der()
        .map_err(|e| Error::Internal(format!("encoding SPKI: {e}")))?;

    Ok(hex::encode(sha256(&der)))
}

/// SHA-256 over the DER certificate
pub fn cert_fingerprint(cert: &X509Ref) -> Result<[u8; 32], Error> {
    let der = cert
        .to_der()
        .map_err(|e| Error::Internal(format!("encoding certificate: {e}")))?;

    Ok(sha256(&der))
}

/// AMD stores the ECDSA scalars little-endian; openssl wants them big-endian
pub fn reverse_bytes(v: &[u8]) -> Vec<u8> {
    v.iter().rev().copied().collect()
}

/// A hostData value is a 32-byte digest rendered as 64 hex characters
pub fn is_valid_host_data(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
