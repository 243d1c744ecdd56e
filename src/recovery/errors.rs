// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::retry::Transient;
use crate::{attestation, cose, envelope, keystore, store};

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Envelope(#[from] envelope::Error),
    #[error(transparent)]
    KeyStore(#[from] keystore::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Attestation(#[from] attestation::Error),
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error("Member not found: {0}")]
    MemberNotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Envelope(e) => e.code(),
            Error::KeyStore(e) => e.code(),
            Error::Store(e) => e.code(),
            Error::Attestation(e) => e.code(),
            Error::Cose(e) => e.code(),
            Error::MemberNotFound(_) => "MemberNotFound",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::InvalidState(_) => "InvalidState",
            Error::LedgerUnavailable(_) => "DependencyUnavailable",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::LedgerUnavailable(_) => true,
            Error::KeyStore(e) => e.is_transient(),
            Error::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Envelope(e) => write!(f, "{:?}", e),
            Error::KeyStore(e) => write!(f, "{:?}", e),
            Error::Store(e) => write!(f, "{:?}", e),
            Error::Attestation(e) => write!(f, "{:?}", e),
            Error::Cose(e) => write!(f, "{:?}", e),
            Error::MemberNotFound(e)
            | Error::InvalidRequest(e)
            | Error::InvalidState(e)
            | Error::LedgerUnavailable(e)
            | Error::Internal(e) => {
                write!(f, "{}: {}", self.code(), e)
            }
        }
    }
}
