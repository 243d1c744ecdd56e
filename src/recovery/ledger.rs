// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::messages::{AckPayload, GovMessage, GovMessageType, RecoverySharePayload};
use crate::attestation::base64;
use crate::attestation::common::cert_fingerprint;
use openssl::sha::sha256;
use openssl::x509::X509;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

/// Member status as tracked by the ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerMemberStatus {
    Accepted,
    Active,
    /// the member's recovery share has been accepted
    Recovered,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerMember {
    pub member_id: String,
    pub status: LedgerMemberStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Opening,
    Open,
    WaitingForRecoveryShares,
    Recovering,
}

/// Read access to the ledger's governance state
pub trait ILedgerClient: Send + Sync {
    fn member(&self, member_id: &str) -> Result<Option<LedgerMember>, Error>;
    fn service_state(&self) -> Result<ServiceState, Error>;
}

struct Member {
    cert: X509,
    status: LedgerMemberStatus,
    digest: Option<String>,
    encrypted_share: Option<Vec<u8>>,
    submitted_share: Option<Vec<u8>>,
}

struct LedgerState {
    state: ServiceState,
    members: BTreeMap<String, Member>,
}

/// In-memory ledger.  Besides [`ILedgerClient`] it models the governance
/// endpoint recovery agents submit signed messages to.
pub struct MemoLedger {
    inner: RwLock<LedgerState>,
    failures: AtomicU32,
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal("lock poisoned".to_string())
}

impl Default for MemoLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState {
                state: ServiceState::Open,
                members: BTreeMap::new(),
            }),
            failures: AtomicU32::new(0),
        }
    }

    /// Make the next `n` reads fail with a transient error
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), Error> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::LedgerUnavailable("injected failure".to_string()));
        }

        Ok(())
    }

    /// Accept a member by its signing certificate.  Returns the member id.
    pub fn register_member(&self, cert_pem: &str) -> Result<String, Error> {
        let cert = X509::from_pem(cert_pem.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("member certificate: {e}")))?;
        let id = hex::encode(cert_fingerprint(&cert)?);

        let mut g = self.inner.write().map_err(poisoned)?;
        g.members.entry(id.clone()).or_insert(Member {
            cert,
            status: LedgerMemberStatus::Accepted,
            digest: None,
            encrypted_share: None,
            submitted_share: None,
        });

        Ok(id)
    }

    pub fn set_state(&self, state: ServiceState) -> Result<(), Error> {
        self.inner.write().map_err(poisoned)?.state = state;
        Ok(())
    }

    /// Hand `member_id` its encrypted recovery share
    pub fn set_encrypted_share(&self, member_id: &str, share: Vec<u8>) -> Result<(), Error> {
        let mut g = self.inner.write().map_err(poisoned)?;
        let m = g
            .members
            .get_mut(member_id)
            .ok_or_else(|| Error::MemberNotFound(member_id.to_string()))?;

        m.encrypted_share = Some(share);
        Ok(())
    }

    pub fn encrypted_share(&self, member_id: &str) -> Result<Option<Vec<u8>>, Error> {
        let g = self.inner.read().map_err(poisoned)?;
        Ok(g.members.get(member_id).and_then(|m| m.encrypted_share.clone()))
    }

    /// The decrypted share `member_id` submitted, if any
    pub fn submitted_share(&self, member_id: &str) -> Result<Option<Vec<u8>>, Error> {
        let g = self.inner.read().map_err(poisoned)?;
        Ok(g.members.get(member_id).and_then(|m| m.submitted_share.clone()))
    }

    /// Governance endpoint.  Verifies the message against the signing
    /// member's certificate and applies it; a `state_digest` request
    /// returns the member's current state digest.
    pub fn submit(&self, buf: &[u8]) -> Result<Option<String>, Error> {
        let (msg, cose) = GovMessage::decode(buf)?;

        let mut g = self.inner.write().map_err(poisoned)?;
        let state = g.state;

        let m = g
            .members
            .get_mut(&msg.member_id)
            .ok_or_else(|| Error::MemberNotFound(msg.member_id.clone()))?;

        let pk = m
            .cert
            .public_key()
            .map_err(|e| Error::Internal(e.to_string()))?;
        if !cose.verify(&pk)? {
            return Err(Error::InvalidRequest(format!(
                "{} message from {} has a bad signature",
                msg.kind.as_str(),
                msg.member_id
            )));
        }

        match msg.kind {
            GovMessageType::StateDigest => {
                let mut seed = msg.member_id.as_bytes().to_vec();
                seed.extend(msg.created_at.to_be_bytes());
                let digest = hex::encode(sha256(&seed));

                m.digest = Some(digest.clone());
                Ok(Some(digest))
            }
            GovMessageType::Ack => {
                let ack: AckPayload = serde_json::from_slice(&msg.payload)
                    .map_err(|e| Error::InvalidRequest(format!("ack: {e}")))?;

                if m.digest.as_deref() != Some(ack.state_digest.as_str()) {
                    return Err(Error::InvalidRequest("stale state digest".to_string()));
                }

                if m.status == LedgerMemberStatus::Accepted {
                    m.status = LedgerMemberStatus::Active;
                }
                Ok(None)
            }
            GovMessageType::RecoveryShare => {
                if state != ServiceState::WaitingForRecoveryShares {
                    return Err(Error::InvalidState(format!(
                        "ledger is {state:?}, not accepting shares"
                    )));
                }
                match m.status {
                    LedgerMemberStatus::Active => {}
                    LedgerMemberStatus::Recovered => {
                        return Err(Error::InvalidState(format!(
                            "member {} already submitted its share",
                            msg.member_id
                        )));
                    }
                    LedgerMemberStatus::Accepted => {
                        return Err(Error::InvalidState(format!(
                            "member {} is not active",
                            msg.member_id
                        )));
                    }
                }

                let p: RecoverySharePayload = serde_json::from_slice(&msg.payload)
                    .map_err(|e| Error::InvalidRequest(format!("recovery_share: {e}")))?;

                m.submitted_share = Some(base64::decode_str(&p.share, "share")?);
                m.status = LedgerMemberStatus::Recovered;
                Ok(None)
            }
        }
    }
}

impl ILedgerClient for MemoLedger {
    fn member(&self, member_id: &str) -> Result<Option<LedgerMember>, Error> {
        self.maybe_fail()?;

        let g = self.inner.read().map_err(poisoned)?;

        Ok(g.members.get(member_id).map(|m| LedgerMember {
            member_id: member_id.to_string(),
            status: m.status,
        }))
    }

    fn service_state(&self) -> Result<ServiceState, Error> {
        self.maybe_fail()?;

        Ok(self.inner.read().map_err(poisoned)?.state)
    }
}
