// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::claims::AttestationClaims;
use super::errors::Error;
use crate::store::JoinPolicy;
use openssl::sha::sha256;

/// The reportData value expected for a caller presenting `public_key_pem`:
/// SHA-256 of the PEM text followed by 32 zero bytes
pub fn report_data_for(public_key_pem: &str) -> [u8; 64] {
    let mut rd = [0u8; 64];
    rd[..32].copy_from_slice(&sha256(public_key_pem.as_bytes()));
    rd
}

/// Check that the attested reportData commits to `public_key_pem`
pub fn verify_report_data_binding(
    claims: &AttestationClaims,
    public_key_pem: &str,
) -> Result<(), Error> {
    let expected = format!(
        "{}{}",
        hex::encode_upper(sha256(public_key_pem.as_bytes())),
        "0".repeat(64)
    );

    let actual = claims.report_data_hex();

    if !actual.eq_ignore_ascii_case(&expected) {
        return Err(Error::ReportDataMismatch(format!(
            "reportData {actual} does not commit to the presented public key"
        )));
    }

    Ok(())
}

/// Check that the attested hostData is one of the values in the join policy
pub fn verify_host_data_trusted(
    claims: &AttestationClaims,
    policy: &JoinPolicy,
) -> Result<(), Error> {
    if !policy.contains(&claims.host_data) {
        return Err(Error::HostDataMismatch(format!(
            "hostData {} is not in the join policy",
            claims.host_data
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::claims::HostData;
    use crate::testutil;
    use hex_literal::hex;

    const PEM: &str = "-----BEGIN PUBLIC KEY-----\nMFkw\n-----END PUBLIC KEY-----\n";

    #[test]
    fn report_data_layout() {
        let rd = report_data_for(PEM);

        assert_eq!(
            rd[..32],
            hex!("e812c735ba78b6f2610ed547abef60b4b2a6413224e369bcc0a5b6d47a9a205d")
        );
        assert_eq!(rd[32..], [0u8; 32]);
    }

    #[test]
    fn report_data_binding_ok() {
        let c = testutil::claims([0x01; 32], report_data_for(PEM));

        verify_report_data_binding(&c, PEM).unwrap();
    }

    #[test]
    fn report_data_binding_other_key() {
        let c = testutil::claims([0x01; 32], report_data_for(PEM));

        let e = verify_report_data_binding(&c, "another key").unwrap_err();

        assert_eq!(e.code(), "ReportDataMismatch");
    }

    #[test]
    fn report_data_binding_needs_zero_padding() {
        let mut rd = report_data_for(PEM);
        rd[63] = 1;
        let c = testutil::claims([0x01; 32], rd);

        assert!(verify_report_data_binding(&c, PEM).is_err());
    }

    #[test]
    fn host_data_trusted() {
        let h: HostData = "AA".repeat(32).parse().unwrap();
        let policy = JoinPolicy::new([h]);

        let c = testutil::claims([0xaa; 32], [0; 64]);
        verify_host_data_trusted(&c, &policy).unwrap();

        let mut one_off = [0xaa; 32];
        one_off[31] = 0xab;
        let c = testutil::claims(one_off, [0; 64]);
        let e = verify_host_data_trusted(&c, &policy).unwrap_err();

        assert_eq!(e.code(), "HostDataMismatch");
    }
}
