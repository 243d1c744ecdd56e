// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Authenticated requests and caller-bound responses.
//!
//! A [`SignedEnvelopeRequest`] carries a payload signed with the caller's
//! RSA key together with SEV-SNP evidence whose reportData commits to that
//! key.  Responses are wrapped for the same key with RSA-OAEP and AES key
//! wrap, so only the attested caller can read them.

pub use self::errors::Error;
pub use self::signed::{
    EnvelopeSignature, EnvelopeVerifier, SignedEnvelopeRequest, VerifiedEnvelope,
};
pub use self::wrap::{
    oaep_decrypt, oaep_encrypt, unwrap_message, unwrap_response, wrap_for_caller,
    wrap_response, WrappedResponse,
};

mod errors;
mod signed;
mod wrap;
