// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The attestation module verifies AMD SEV-SNP evidence: the binary report,
//! the VCEK certificate chain up to a pinned AMD root, the report signature
//! and, optionally, a COSE Sign1 UVM endorsement binding the launch
//! measurement to a trusted software image.
//!
//! A successful [`AttestationVerifier::verify`] yields [`AttestationClaims`];
//! the binding checks in this module then tie those claims to a caller's
//! public key and to the current join policy.

pub use self::binding::{report_data_for, verify_host_data_trusted, verify_report_data_binding};
pub use self::chain::{TrustedRoots, AMD_ARK_GENOA_SPKI_SHA256};
pub use self::claims::{AttestationClaims, AttestationEvidence, HostData, UvmClaims};
pub use self::endorsement::{DidX509, EndorsementPolicy, UVM_FEED, UVM_ISSUER};
pub use self::errors::Error;
pub use self::iattester::IAttester;
pub use self::report::{SnpReport, TcbVersion};
pub use self::verifier::AttestationVerifier;

pub(crate) mod base64;
mod binding;
pub(crate) mod chain;
mod claims;
pub(crate) mod common;
mod endorsement;
mod errors;
mod iattester;
pub(crate) mod report;
mod verifier;
