// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::claims::AttestationEvidence;
use super::errors::Error;

/// Interface to the local attestation source, i.e. the SEV-SNP guest device
/// plus the host-provided certificate and endorsement material.
pub trait IAttester: Send + Sync {
    /// Produce evidence whose report carries `report_data`
    fn attest(&self, report_data: &[u8; 64]) -> Result<AttestationEvidence, Error>;
}
