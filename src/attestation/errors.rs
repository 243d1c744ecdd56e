// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Format error: {0}")]
    Format(String),
    #[error("Trust chain error: {0}")]
    TrustChain(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("Debug mode error: {0}")]
    DebugMode(String),
    #[error("Endorsement error: {0}")]
    Endorsement(String),
    #[error("Report data mismatch: {0}")]
    ReportDataMismatch(String),
    #[error("Host data mismatch: {0}")]
    HostDataMismatch(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable, caller-visible error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Format(_) => "FormatError",
            Error::TrustChain(_) => "TrustChainError",
            Error::Signature(_) => "SignatureError",
            Error::DebugMode(_) => "DebugModeError",
            Error::Endorsement(_) => "EndorsementError",
            Error::ReportDataMismatch(_) => "ReportDataMismatch",
            Error::HostDataMismatch(_) => "HostDataMismatch",
            Error::Internal(_) => "InternalError",
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Format(e)
            | Error::TrustChain(e)
            | Error::Signature(e)
            | Error::DebugMode(e)
            | Error::Endorsement(e)
            | Error::ReportDataMismatch(e)
            | Error::HostDataMismatch(e)
            | Error::Internal(e) => {
                write!(f, "{}: {}", self.code(), e)
            }
        }
    }
}
