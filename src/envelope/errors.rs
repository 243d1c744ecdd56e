// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::attestation;

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Attestation(#[from] attestation::Error),
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unwrap error: {0}")]
    Unwrap(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Attestation(e) => e.code(),
            Error::SignatureMismatch(_) => "SignatureMismatch",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::Unwrap(_) => "UnwrapError",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Attestation(e) => write!(f, "{:?}", e),
            Error::SignatureMismatch(e)
            | Error::InvalidRequest(e)
            | Error::Unwrap(e)
            | Error::Internal(e) => {
                write!(f, "{}: {}", self.code(), e)
            }
        }
    }
}
