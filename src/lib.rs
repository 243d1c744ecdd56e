// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! AMD SEV-SNP attestation verification, attestation-gated key management
//! and recovery member workflows for confidential ledger networks.
//!
//! The API allows:
//! * Verifying SEV-SNP evidence (report, VCEK chain up to a pinned AMD root,
//!   optional COSE Sign1 UVM endorsement) into typed claims
//! * Authenticating requests whose signing key is bound to such evidence,
//!   and wrapping responses so only that key can read them
//! * Generating and releasing keys under immutable, hostData-pinned release
//!   policies
//! * Driving recovery members through generation, activation and recovery
//!   share submission
//!
//! For the report format, see the ATTESTATION_REPORT structure in the
//! SEV-SNP firmware [ABI] specification.
//!
//! [ABI]: https://www.amd.com/system/files/TechDocs/56860.pdf

pub mod attestation;
pub mod config;
pub mod cose;
pub mod envelope;
pub mod keystore;
pub mod recovery;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testutil;
