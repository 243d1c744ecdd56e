// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::{
    base64, verify_host_data_trusted, verify_report_data_binding, AttestationClaims,
    AttestationEvidence, AttestationVerifier,
};
use crate::cose::{verify_with_alg, ALG_PS256};
use crate::store::JoinPolicy;
use openssl::pkey::{Id, PKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Signature block of an authenticated request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSignature {
    /// base64 RSA-PSS signature over the decoded `data` bytes
    pub signature: String,
    /// base64 PEM public key of the caller
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// An authenticated request: a payload signed by a key that the embedded
/// attestation commits to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEnvelopeRequest {
    /// base64 JSON payload
    pub data: String,
    pub sign: EnvelopeSignature,
    pub attestation: AttestationEvidence,
}

/// What a successful verification establishes about a request
#[derive(Clone, Debug)]
pub struct VerifiedEnvelope<T> {
    /// PEM public key of the caller; responses are wrapped for it
    pub caller_public_key: String,
    pub claims: AttestationClaims,
    pub payload: T,
}

/// Authenticates [`SignedEnvelopeRequest`]s
#[derive(Clone, Debug, Default)]
pub struct EnvelopeVerifier {
    verifier: AttestationVerifier,
}

impl EnvelopeVerifier {
    pub fn new(verifier: AttestationVerifier) -> Self {
        Self { verifier }
    }

    /// Verify `env` and decode its payload as JSON into `T`
    pub fn verify<T: DeserializeOwned>(
        &self,
        env: &SignedEnvelopeRequest,
        policy: &JoinPolicy,
    ) -> Result<VerifiedEnvelope<T>, Error> {
        let v = self.verify_bytes(env, policy)?;

        let payload = serde_json::from_slice(&v.payload)
            .map_err(|e| Error::InvalidRequest(format!("payload: {e}")))?;

        Ok(VerifiedEnvelope {
            caller_public_key: v.caller_public_key,
            claims: v.claims,
            payload,
        })
    }

    /// Verify `env` and return its raw payload bytes.  The checks run in
    /// order: attestation, reportData binding to the caller key, hostData
    /// membership in `policy`, payload signature.
    pub fn verify_bytes(
        &self,
        env: &SignedEnvelopeRequest,
        policy: &JoinPolicy,
    ) -> Result<VerifiedEnvelope<Vec<u8>>, Error> {
        let claims = self.verifier.verify(&env.attestation)?;

        let pem = base64::decode_text(&env.sign.public_key, "publicKey")?;
        verify_report_data_binding(&claims, &pem)?;

        verify_host_data_trusted(&claims, policy)?;

        let key = PKey::public_key_from_pem(pem.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("publicKey: {e}")))?;
        if key.id() != Id::RSA {
            return Err(Error::InvalidRequest(
                "publicKey: expecting an RSA key".to_string(),
            ));
        }

        let data = base64::decode_str(&env.data, "data")?;
        let sig = base64::decode_str(&env.sign.signature, "signature")?;

        let ok = verify_with_alg(ALG_PS256, &key, &data, &sig)
            .map_err(|e| Error::Internal(e.to_string()))?;
        if !ok {
            log::warn!(
                "envelope from hostData {} rejected: bad payload signature",
                claims.host_data
            );
            return Err(Error::SignatureMismatch(
                "payload signature does not verify with the presented key".to_string(),
            ));
        }

        Ok(VerifiedEnvelope {
            caller_public_key: pem,
            claims,
            payload: data,
        })
    }
}
