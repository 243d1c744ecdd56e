// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use crate::retry::Transient;

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Join policy not set: {0}")]
    PolicyNotSet(String),
    #[error("Malformed join policy: {0}")]
    PolicyMalformed(String),
    #[error("Join policy update rejected: {0}")]
    SelfLockoutRejected(String),
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    #[error("Secret not found: {0}")]
    SecretNotFound(String),
    #[error("Concurrent modification: {0}")]
    Conflict(String),
    #[error("Key release denied: {0}")]
    ReleaseDenied(String),
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "InvalidRequest",
            Error::PolicyNotSet(_) => "PolicyNotSet",
            Error::PolicyMalformed(_) => "PolicyMalformed",
            Error::SelfLockoutRejected(_) => "SelfLockoutRejected",
            Error::KeyNotFound(_) => "KeyNotFound",
            Error::SecretNotFound(_) => "SecretNotFound",
            Error::Conflict(_) => "ConcurrentModification",
            Error::ReleaseDenied(_) => "ReleaseDenied",
            Error::DependencyUnavailable(_) => "DependencyUnavailable",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        matches!(self, Error::DependencyUnavailable(_))
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(e)
            | Error::PolicyNotSet(e)
            | Error::PolicyMalformed(e)
            | Error::SelfLockoutRejected(e)
            | Error::KeyNotFound(e)
            | Error::SecretNotFound(e)
            | Error::Conflict(e)
            | Error::ReleaseDenied(e)
            | Error::DependencyUnavailable(e)
            | Error::Internal(e) => {
                write!(f, "{}: {}", self.code(), e)
            }
        }
    }
}

pub(crate) fn poisoned<T>(_: T) -> Error {
    Error::Internal("lock poisoned".to_string())
}
