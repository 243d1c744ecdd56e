// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::chain::{parse_pem_bundle, verify_report_signature, verify_vcek_chain, TrustedRoots};
use super::claims::{AttestationClaims, AttestationEvidence};
use super::endorsement::{verify_uvm_endorsement, EndorsementPolicy};
use super::errors::Error;
use super::report::SnpReport;
use crate::config::Config;

/// Verifies SEV-SNP attestation evidence against a pinned set of AMD roots
/// and, when present, a UVM endorsement from a pinned issuer
#[derive(Clone, Debug, Default)]
pub struct AttestationVerifier {
    roots: TrustedRoots,
    uvm: EndorsementPolicy,
}

impl AttestationVerifier {
    pub fn new(roots: TrustedRoots, uvm: EndorsementPolicy) -> Self {
        Self { roots, uvm }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            TrustedRoots::new(&cfg.trusted_amd_roots),
            cfg.uvm_endorsement.clone(),
        )
    }

    /// Verify `evidence` and return the claims it carries.  Nothing is
    /// returned unless every check passes.
    pub fn verify(&self, evidence: &AttestationEvidence) -> Result<AttestationClaims, Error> {
        self.verify_inner(evidence).map_err(|e| {
            log::warn!("attestation rejected: {:?}", e);
            e
        })
    }

    fn verify_inner(&self, evidence: &AttestationEvidence) -> Result<AttestationClaims, Error> {
        let raw = base64::decode_str(&evidence.evidence, "evidence")?;
        let report = SnpReport::decode(&raw)?;

        let pem = base64::decode_text(&evidence.endorsements, "endorsements")?;
        let bundle = parse_pem_bundle(&pem)?;
        let vcek = verify_vcek_chain(&bundle, &self.roots)?;

        verify_report_signature(&report, &vcek)?;

        if report.debug_allowed() {
            return Err(Error::DebugMode(
                "guest policy allows debugging".to_string(),
            ));
        }

        let uvm = match &evidence.uvm_endorsements {
            Some(u) => {
                let buf = base64::decode_str(u, "uvmEndorsements")
                    .map_err(|e| Error::Endorsement(e.to_string()))?;

                Some(verify_uvm_endorsement(&buf, &self.uvm, &report.measurement)?)
            }
            None => None,
        };

        let claims = AttestationClaims::from_report(&report, uvm);

        log::debug!(
            "attestation verified: hostData {} measurement {}",
            claims.host_data,
            claims.measurement_hex()
        );

        Ok(claims)
    }
}
