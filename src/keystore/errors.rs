// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::attestation;
use crate::retry::Transient;
use crate::store;

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Attestation(#[from] attestation::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Attestation(e) => e.code(),
            Error::Store(e) => e.code(),
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::KeyNotFound(_) => "KeyNotFound",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Attestation(e) => write!(f, "{:?}", e),
            Error::Store(e) => write!(f, "{:?}", e),
            Error::InvalidRequest(e) | Error::KeyNotFound(e) | Error::Internal(e) => {
                write!(f, "{}: {}", self.code(), e)
            }
        }
    }
}

pub(crate) fn crypto(e: openssl::error::ErrorStack) -> Error {
    Error::Internal(e.to_string())
}
