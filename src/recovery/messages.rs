// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::{AttestationEvidence, HostData};
use crate::cose::{CoseSign1, HEADER_KID};
use ciborium::Value;
use openssl::ec::EcKeyRef;
use openssl::pkey::Private;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HEADER_MSG_TYPE: &str = "ccf.gov.msg.type";
pub const HEADER_MSG_CREATED_AT: &str = "ccf.gov.msg.created_at";

/// Payload of a generate-member request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateMemberRequest {
    pub name: String,
}

/// Payload of the first activation step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateMemberRequest {
    pub name: String,
}

/// Payload of the last activation step, relaying the ledger's digest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateMemberAckRequest {
    pub name: String,
    pub state_digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRecoveryShareRequest {
    pub name: String,
    /// base64 share as held by the ledger, encrypted to the member's
    /// encryption key
    pub encrypted_share: String,
}

/// Public identity of a recovery member
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberIdentity {
    pub name: String,
    /// hex SHA-256 of the DER signing certificate
    pub member_id: String,
    /// PEM
    pub certificate: String,
    /// PEM, the key recovery shares are encrypted to
    pub encryption_public_key: String,
    /// evidence over the signing key, produced by the generating instance
    pub attestation: AttestationEvidence,
}

/// What the service says about itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReport {
    pub attestation: AttestationEvidence,
    pub host_data: HostData,
}

/// Member status as derived at call time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// no keys exist for the name
    NotFound,
    /// keys exist, the ledger does not know the member yet
    Generated,
    /// known to the ledger, activation not completed
    AwaitingActivation,
    Active,
    /// the ledger holds the member's recovery share
    Recovered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovMessageType {
    StateDigest,
    Ack,
    RecoveryShare,
}

impl GovMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovMessageType::StateDigest => "state_digest",
            GovMessageType::Ack => "ack",
            GovMessageType::RecoveryShare => "recovery_share",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "state_digest" => Some(GovMessageType::StateDigest),
            "ack" => Some(GovMessageType::Ack),
            "recovery_share" => Some(GovMessageType::RecoveryShare),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckPayload {
    pub state_digest: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySharePayload {
    /// base64
    pub share: String,
}

/// A governance message submitted to the ledger on a member's behalf
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovMessage {
    pub kind: GovMessageType,
    pub member_id: String,
    /// seconds since the Unix epoch
    pub created_at: u64,
    pub payload: Vec<u8>,
}

fn now() -> Result<u64, Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::Internal(format!("system clock: {e}")))
}

impl GovMessage {
    /// A message created now
    pub fn new(kind: GovMessageType, member_id: &str, payload: Vec<u8>) -> Result<Self, Error> {
        Ok(GovMessage {
            kind,
            member_id: member_id.to_string(),
            created_at: now()?,
            payload,
        })
    }

    /// COSE Sign1 (ES384) encoding, signed with the member's signing key
    pub fn sign(&self, key: &EcKeyRef<Private>) -> Result<Vec<u8>, Error> {
        let protected = vec![
            (
                Value::Integer((HEADER_KID as i64).into()),
                Value::Bytes(self.member_id.as_bytes().to_vec()),
            ),
            (
                Value::Text(HEADER_MSG_TYPE.to_string()),
                Value::Text(self.kind.as_str().to_string()),
            ),
            (
                Value::Text(HEADER_MSG_CREATED_AT.to_string()),
                Value::Integer(self.created_at.into()),
            ),
        ];

        let msg = CoseSign1::sign_es384(protected, self.payload.clone(), key)?;

        Ok(msg.encode()?)
    }

    /// Decode a signed governance message.  The signature is not checked;
    /// see [`CoseSign1::verify`].
    pub fn decode(buf: &[u8]) -> Result<(GovMessage, CoseSign1), Error> {
        let cose = CoseSign1::decode(buf)?;

        let member_id = match cose.header(HEADER_KID) {
            Some(Value::Bytes(b)) => String::from_utf8(b.clone())
                .map_err(|e| Error::InvalidRequest(format!("kid: {e}")))?,
            _ => return Err(Error::InvalidRequest("kid missing".to_string())),
        };

        let kind = match cose.text_header(HEADER_MSG_TYPE) {
            Some(Value::Text(t)) => GovMessageType::parse(t)
                .ok_or_else(|| Error::InvalidRequest(format!("unknown message type {t}")))?,
            _ => return Err(Error::InvalidRequest("message type missing".to_string())),
        };

        let created_at = match cose.text_header(HEADER_MSG_CREATED_AT) {
            Some(Value::Integer(i)) => u64::try_from(*i)
                .map_err(|_| Error::InvalidRequest("created_at out of range".to_string()))?,
            _ => return Err(Error::InvalidRequest("created_at missing".to_string())),
        };

        let msg = GovMessage {
            kind,
            member_id,
            created_at,
            payload: cose.payload.clone(),
        };

        Ok((msg, cose))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose::ALG_ES384;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::nid::Nid;
    use openssl::pkey::PKey;

    fn key() -> EcKey<Private> {
        let g = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
        EcKey::generate(&g).unwrap()
    }

    #[test]
    fn sign_and_decode() {
        let k = key();
        let pk = PKey::from_ec_key(k.clone()).unwrap();

        let payload = serde_json::to_vec(&AckPayload {
            state_digest: "abcd".to_string(),
        })
        .unwrap();
        let m = GovMessage::new(GovMessageType::Ack, "m1", payload).unwrap();

        let buf = m.sign(&k).unwrap();
        let (d, cose) = GovMessage::decode(&buf).unwrap();

        assert_eq!(d, m);
        assert_eq!(cose.alg().unwrap(), ALG_ES384);
        assert!(cose.verify(&pk).unwrap());
        assert_eq!(d.payload, br#"{"state_digest":"abcd"}"#);
    }

    #[test]
    fn state_digest_has_empty_payload() {
        let k = key();

        let m = GovMessage::new(GovMessageType::StateDigest, "m1", Vec::new()).unwrap();
        let (d, _) = GovMessage::decode(&m.sign(&k).unwrap()).unwrap();

        assert_eq!(d.kind, GovMessageType::StateDigest);
        assert!(d.payload.is_empty());
    }

    #[test]
    fn rejects_unknown_type() {
        let k = key();

        let protected = vec![
            (Value::Integer(4.into()), Value::Bytes(b"m1".to_vec())),
            (
                Value::Text(HEADER_MSG_TYPE.to_string()),
                Value::Text("proposal".to_string()),
            ),
        ];
        let buf = CoseSign1::sign_es384(protected, Vec::new(), &k)
            .unwrap()
            .encode()
            .unwrap();

        assert_eq!(
            GovMessage::decode(&buf).unwrap_err().code(),
            "InvalidRequest"
        );
    }

    #[test]
    fn request_wire_names() {
        let r: SubmitRecoveryShareRequest =
            serde_json::from_str(r#"{"name":"alice","encryptedShare":"AAEC"}"#).unwrap();
        assert_eq!(r.encrypted_share, "AAEC");

        let r: ActivateMemberAckRequest =
            serde_json::from_str(r#"{"name":"alice","stateDigest":"00ff"}"#).unwrap();
        assert_eq!(r.state_digest, "00ff");
    }
}
