// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::{crypto, Error};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKeyRef, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509NameBuilder, X509};

const CERT_VALIDITY_DAYS: u32 = 365;

/// Issue a self-signed certificate with subject `CN=<cn>` for a signing key
pub fn self_signed_cert(cn: &str, key: &PKeyRef<Private>) -> Result<X509, Error> {
    let mut name = X509NameBuilder::new().map_err(crypto)?;
    name.append_entry_by_text("CN", cn).map_err(crypto)?;
    let name = name.build();

    let mut serial = BigNum::new().map_err(crypto)?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false).map_err(crypto)?;
    let serial = serial.to_asn1_integer().map_err(crypto)?;

    let mut b = X509::builder().map_err(crypto)?;
    b.set_version(2).map_err(crypto)?;
    b.set_serial_number(&serial).map_err(crypto)?;
    b.set_subject_name(&name).map_err(crypto)?;
    b.set_issuer_name(&name).map_err(crypto)?;
    b.set_pubkey(key).map_err(crypto)?;
    let not_before = Asn1Time::days_from_now(0).map_err(crypto)?;
    let not_after = Asn1Time::days_from_now(CERT_VALIDITY_DAYS).map_err(crypto)?;
    b.set_not_before(&not_before).map_err(crypto)?;
    b.set_not_after(&not_after).map_err(crypto)?;

    b.append_extension(BasicConstraints::new().critical().build().map_err(crypto)?)
        .map_err(crypto)?;
    b.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .build()
            .map_err(crypto)?,
    )
    .map_err(crypto)?;

    let ski = SubjectKeyIdentifier::new()
        .build(&b.x509v3_context(None, None))
        .map_err(crypto)?;
    b.append_extension(ski).map_err(crypto)?;

    b.sign(key, MessageDigest::sha384()).map_err(crypto)?;

    Ok(b.build())
}
