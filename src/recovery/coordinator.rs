// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use super::ledger::{ILedgerClient, LedgerMember, LedgerMemberStatus, ServiceState};
use super::messages::{
    AckPayload, ActivateMemberAckRequest, ActivateMemberRequest, GenerateMemberRequest,
    GovMessage, GovMessageType, MemberIdentity, MemberStatus, RecoverySharePayload,
    ServiceReport, SubmitRecoveryShareRequest,
};
use crate::attestation::base64;
use crate::attestation::common::cert_fingerprint;
use crate::envelope::{
    oaep_decrypt, wrap_response, EnvelopeVerifier, SignedEnvelopeRequest, VerifiedEnvelope,
    WrappedResponse,
};
use crate::keystore::{self, KeyInfo, KeyStore, KeyType};
use crate::retry::RetryPolicy;
use crate::store::{JoinPolicy, PolicyStore};
use openssl::x509::X509;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

const MAX_NAME_LEN: usize = 64;

/// Tag naming the member a key belongs to
pub const TAG_MEMBER: &str = "member";

pub fn signing_kid(name: &str) -> String {
    format!("{name}-signing")
}

pub fn encryption_kid(name: &str) -> String {
    format!("{name}-encryption")
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(Error::InvalidRequest(format!("invalid member name {name:?}")));
    }

    Ok(())
}

/// Hex SHA-256 of the DER form of a PEM certificate
fn member_id(cert_pem: &str) -> Result<String, Error> {
    let cert = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| Error::Internal(format!("member certificate: {e}")))?;

    Ok(hex::encode(cert_fingerprint(&cert)?))
}

/// Drives recovery members through generation, activation and share
/// submission.  Holds no member state: every call derives it from the key
/// store and the ledger.
pub struct RecoveryCoordinator {
    keys: KeyStore,
    policy: PolicyStore,
    envelopes: EnvelopeVerifier,
    ledger: Arc<dyn ILedgerClient>,
    retry: RetryPolicy,
}

impl RecoveryCoordinator {
    /// Seeds the join policy with this instance's own hostData if none has
    /// been configured yet
    pub fn new(
        keys: KeyStore,
        policy: PolicyStore,
        ledger: Arc<dyn ILedgerClient>,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        policy.bootstrap(&keys.own_host_data())?;

        let envelopes = EnvelopeVerifier::new(keys.verifier().clone());

        Ok(Self {
            keys,
            policy,
            envelopes,
            ledger,
            retry,
        })
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    fn authenticate<T: DeserializeOwned>(
        &self,
        env: &SignedEnvelopeRequest,
    ) -> Result<VerifiedEnvelope<T>, Error> {
        let policy = self.policy.get_join_policy()?;

        Ok(self.envelopes.verify(env, &policy)?)
    }

    /// Create (or return the existing) signing and encryption keys of a
    /// member
    pub fn generate_member(&self, env: &SignedEnvelopeRequest) -> Result<MemberIdentity, Error> {
        let req: VerifiedEnvelope<GenerateMemberRequest> = self.authenticate(env)?;
        let name = req.payload.name.as_str();
        validate_name(name)?;

        let tags = BTreeMap::from([(TAG_MEMBER.to_string(), name.to_string())]);

        let signing = self
            .keys
            .generate_key(&signing_kid(name), KeyType::Signing, tags.clone())?;
        let encryption = self
            .keys
            .generate_key(&encryption_kid(name), KeyType::Encryption, tags)?;

        let id = identity(name, signing, encryption)?;

        log::info!(
            "member {name} ({}) generated for hostData {}",
            id.member_id,
            req.claims.host_data
        );

        Ok(id)
    }

    /// Public identity of an existing member
    pub fn member_identity(&self, name: &str) -> Result<MemberIdentity, Error> {
        validate_name(name)?;

        let signing = self.member_key(name, &signing_kid(name))?;
        let encryption = self.member_key(name, &encryption_kid(name))?;

        identity(name, signing, encryption)
    }

    /// Step 1 of activation: a signed `state_digest` request for the agent
    /// to submit to the ledger
    pub fn activate_member_digest_request(
        &self,
        env: &SignedEnvelopeRequest,
    ) -> Result<WrappedResponse, Error> {
        let req: VerifiedEnvelope<ActivateMemberRequest> = self.authenticate(env)?;
        let name = req.payload.name.as_str();
        validate_name(name)?;

        let id = self.pending_member(name)?;

        let msg = GovMessage::new(GovMessageType::StateDigest, &id, Vec::new())?;
        let signed = self.sign_as(name, &msg)?;

        log::info!("issued state digest request for member {name}");

        Ok(wrap_response(&signed, &req.caller_public_key)?)
    }

    /// Step 3 of activation: a signed `ack` of the digest the ledger
    /// returned in step 2
    pub fn activate_member_ack(
        &self,
        env: &SignedEnvelopeRequest,
    ) -> Result<WrappedResponse, Error> {
        let req: VerifiedEnvelope<ActivateMemberAckRequest> = self.authenticate(env)?;
        let name = req.payload.name.as_str();
        validate_name(name)?;

        if req.payload.state_digest.is_empty() {
            return Err(Error::InvalidRequest("empty state digest".to_string()));
        }

        let id = self.pending_member(name)?;

        let payload = serde_json::to_vec(&AckPayload {
            state_digest: req.payload.state_digest.clone(),
        })
        .map_err(|e| Error::Internal(e.to_string()))?;

        let msg = GovMessage::new(GovMessageType::Ack, &id, payload)?;
        let signed = self.sign_as(name, &msg)?;

        log::info!("issued activation ack for member {name}");

        Ok(wrap_response(&signed, &req.caller_public_key)?)
    }

    /// Decrypt a member's share and return it as a signed `recovery_share`
    /// submission
    pub fn submit_recovery_share(
        &self,
        env: &SignedEnvelopeRequest,
    ) -> Result<WrappedResponse, Error> {
        let req: VerifiedEnvelope<SubmitRecoveryShareRequest> = self.authenticate(env)?;
        let name = req.payload.name.as_str();
        validate_name(name)?;

        let signing = self.member_key(name, &signing_kid(name))?;
        let id = member_id(&member_cert(&signing)?)?;

        match self.ledger_member(&id)? {
            Some(LedgerMember {
                status: LedgerMemberStatus::Active,
                ..
            }) => {}
            Some(LedgerMember {
                status: LedgerMemberStatus::Recovered,
                ..
            }) => {
                return Err(Error::InvalidState(format!(
                    "member {name} already submitted its recovery share"
                )));
            }
            Some(_) => {
                return Err(Error::InvalidState(format!("member {name} is not active")));
            }
            None => {
                return Err(Error::MemberNotFound(format!(
                    "{name} is not known to the ledger"
                )));
            }
        }

        let state = self
            .retry
            .run("reading service state", || self.ledger.service_state())?;
        if state != ServiceState::WaitingForRecoveryShares {
            return Err(Error::InvalidState(format!(
                "service is {state:?}, not waiting for recovery shares"
            )));
        }

        let encrypted = base64::decode_str(&req.payload.encrypted_share, "encryptedShare")?;

        let key = self.keys.release_key(&encryption_kid(name))?;
        let share = oaep_decrypt(&key.key, &encrypted)?;

        let payload = serde_json::to_vec(&RecoverySharePayload {
            share: base64::encode(&share),
        })
        .map_err(|e| Error::Internal(e.to_string()))?;

        let msg = GovMessage::new(GovMessageType::RecoveryShare, &id, payload)?;
        let signed = self.sign_as(name, &msg)?;

        log::info!("issued recovery share submission for member {name}");

        Ok(wrap_response(&signed, &req.caller_public_key)?)
    }

    /// Status of `name`, derived from the key store and the ledger
    pub fn member_status(&self, name: &str) -> Result<MemberStatus, Error> {
        validate_name(name)?;

        let signing = match self.keys.get_key(&signing_kid(name)) {
            Ok(k) => k,
            Err(keystore::Error::KeyNotFound(_)) => return Ok(MemberStatus::NotFound),
            Err(e) => return Err(e.into()),
        };

        let id = member_id(&member_cert(&signing)?)?;

        let status = match self.ledger_member(&id)? {
            None => MemberStatus::Generated,
            Some(m) => match m.status {
                LedgerMemberStatus::Accepted => MemberStatus::AwaitingActivation,
                LedgerMemberStatus::Active => MemberStatus::Active,
                LedgerMemberStatus::Recovered => MemberStatus::Recovered,
            },
        };

        Ok(status)
    }

    /// Replace the join policy.  The envelope must come from an instance
    /// trusted by the current policy, and that instance must remain
    /// trusted by the new one.
    pub fn set_join_policy(&self, env: &SignedEnvelopeRequest) -> Result<(), Error> {
        let current = self.policy.get_join_policy()?;

        let req = self.envelopes.verify_bytes(env, &current)?;
        let new = JoinPolicy::from_json(&req.payload)?;

        self.policy.set_join_policy(new, &req.claims.host_data)?;

        Ok(())
    }

    pub fn join_policy(&self) -> Result<JoinPolicy, Error> {
        Ok(self.policy.get_join_policy()?)
    }

    /// Fresh evidence for this instance together with its verified hostData
    pub fn report(&self) -> Result<ServiceReport, Error> {
        let attestation = self.keys.attester().attest(&[0u8; 64])?;
        let claims = self.keys.verifier().verify(&attestation)?;

        Ok(ServiceReport {
            attestation,
            host_data: claims.host_data,
        })
    }

    fn member_key(&self, name: &str, kid: &str) -> Result<KeyInfo, Error> {
        self.keys.get_key(kid).map_err(|e| match e {
            keystore::Error::KeyNotFound(_) => Error::MemberNotFound(name.to_string()),
            e => e.into(),
        })
    }

    fn ledger_member(&self, id: &str) -> Result<Option<LedgerMember>, Error> {
        self.retry
            .run("reading ledger member", || self.ledger.member(id))
    }

    /// Member id of `name`, which the ledger must know but not yet consider
    /// active
    fn pending_member(&self, name: &str) -> Result<String, Error> {
        let signing = self.member_key(name, &signing_kid(name))?;
        let id = member_id(&member_cert(&signing)?)?;

        match self.ledger_member(&id)? {
            None => Err(Error::MemberNotFound(format!(
                "{name} is not known to the ledger"
            ))),
            Some(m) if m.status == LedgerMemberStatus::Accepted => Ok(id),
            Some(_) => Err(Error::InvalidState(format!(
                "member {name} is already active"
            ))),
        }
    }

    fn sign_as(&self, name: &str, msg: &GovMessage) -> Result<Vec<u8>, Error> {
        let key = self.keys.release_key(&signing_kid(name))?;

        let ec_key = key.ec_key()?;
        msg.sign(&ec_key)
    }
}

fn member_cert(k: &KeyInfo) -> Result<String, Error> {
    k.certificate
        .clone()
        .ok_or_else(|| Error::Internal(format!("{} has no certificate", k.kid)))
}

fn identity(name: &str, signing: KeyInfo, encryption: KeyInfo) -> Result<MemberIdentity, Error> {
    let certificate = member_cert(&signing)?;

    Ok(MemberIdentity {
        name: name.to_string(),
        member_id: member_id(&certificate)?,
        certificate,
        encryption_public_key: encryption.public_key,
        attestation: signing.attestation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{oaep_encrypt, unwrap_response};
    use crate::attestation::HostData;
    use crate::testutil::{self, TestCaller, TestWorld};
    use openssl::pkey::PKey;
    use serde::Serialize;

    struct Agent {
        caller: TestCaller,
        host: [u8; 32],
    }

    impl Agent {
        fn new(w: &TestWorld) -> Self {
            Self {
                caller: TestCaller::new(),
                host: w.host,
            }
        }

        fn at(host: [u8; 32]) -> Self {
            Self {
                caller: TestCaller::new(),
                host,
            }
        }

        fn env<T: Serialize>(&self, w: &TestWorld, payload: &T) -> SignedEnvelopeRequest {
            self.caller.envelope(&w.platform, &self.host, payload)
        }

        fn open(&self, r: &WrappedResponse) -> Vec<u8> {
            unwrap_response(r, &self.caller.key).unwrap()
        }
    }

    fn named(name: &str) -> GenerateMemberRequest {
        GenerateMemberRequest {
            name: name.to_string(),
        }
    }

    fn activate(name: &str) -> ActivateMemberRequest {
        ActivateMemberRequest {
            name: name.to_string(),
        }
    }

    fn activate_fully(w: &TestWorld, c: &RecoveryCoordinator, a: &Agent, name: &str) -> String {
        let id = c.member_identity(name).unwrap();
        w.ledger.register_member(&id.certificate).unwrap();

        let r = c
            .activate_member_digest_request(&a.env(w, &activate(name)))
            .unwrap();
        let digest = w.ledger.submit(&a.open(&r)).unwrap().unwrap();

        let ack = ActivateMemberAckRequest {
            name: name.to_string(),
            state_digest: digest,
        };
        let r = c.activate_member_ack(&a.env(w, &ack)).unwrap();
        assert!(w.ledger.submit(&a.open(&r)).unwrap().is_none());

        id.member_id
    }

    #[test]
    fn generate_member_is_idempotent() {
        testutil::init_logger();
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let first = c.generate_member(&a.env(&w, &named("alice"))).unwrap();
        let again = c.generate_member(&a.env(&w, &named("alice"))).unwrap();

        assert_eq!(first.certificate, again.certificate);
        assert_eq!(first.member_id, again.member_id);
        assert_eq!(w.vault.import_count(&signing_kid("alice")).unwrap(), 1);
        assert_eq!(w.vault.import_count(&encryption_kid("alice")).unwrap(), 1);

        let cert = X509::from_pem(first.certificate.as_bytes()).unwrap();
        assert_eq!(hex::encode(cert_fingerprint(&cert).unwrap()), first.member_id);
    }

    #[test]
    fn generate_member_requires_trusted_caller() {
        let w = TestWorld::new();
        let c = w.coordinator();

        let e = c
            .generate_member(&Agent::at([0x01; 32]).env(&w, &named("alice")))
            .unwrap_err();

        assert_eq!(e.code(), "HostDataMismatch");
        assert_eq!(c.member_status("alice").unwrap(), MemberStatus::NotFound);
    }

    #[test]
    fn invalid_member_name() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let long = "x".repeat(65);

        for name in ["", "a b", long.as_str()] {
            let e = c.generate_member(&a.env(&w, &named(name))).unwrap_err();
            assert_eq!(e.code(), "InvalidRequest");
        }
    }

    #[test]
    fn status_follows_ledger() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        assert_eq!(c.member_status("bob").unwrap(), MemberStatus::NotFound);

        let id = c.generate_member(&a.env(&w, &named("bob"))).unwrap();
        assert_eq!(c.member_status("bob").unwrap(), MemberStatus::Generated);

        w.ledger.register_member(&id.certificate).unwrap();
        assert_eq!(
            c.member_status("bob").unwrap(),
            MemberStatus::AwaitingActivation
        );

        activate_fully(&w, &c, &a, "bob");
        assert_eq!(c.member_status("bob").unwrap(), MemberStatus::Active);
    }

    #[test]
    fn activation_handshake() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        c.generate_member(&a.env(&w, &named("alice"))).unwrap();
        let id = activate_fully(&w, &c, &a, "alice");

        assert_eq!(
            w.ledger.member(&id).unwrap().unwrap().status,
            LedgerMemberStatus::Active
        );

        // a second activation is refused
        let e = c
            .activate_member_digest_request(&a.env(&w, &activate("alice")))
            .unwrap_err();
        assert_eq!(e.code(), "InvalidState");
    }

    #[test]
    fn activation_of_unregistered_member() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let e = c
            .activate_member_digest_request(&a.env(&w, &activate("ghost")))
            .unwrap_err();
        assert_eq!(e.code(), "MemberNotFound");

        c.generate_member(&a.env(&w, &named("carol"))).unwrap();
        let e = c
            .activate_member_digest_request(&a.env(&w, &activate("carol")))
            .unwrap_err();
        assert_eq!(e.code(), "MemberNotFound");
    }

    #[test]
    fn response_is_readable_only_by_the_caller() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);
        let eve = Agent::new(&w);

        let id = c.generate_member(&a.env(&w, &named("dave"))).unwrap();
        w.ledger.register_member(&id.certificate).unwrap();

        let r = c
            .activate_member_digest_request(&a.env(&w, &activate("dave")))
            .unwrap();

        assert!(unwrap_response(&r, &eve.caller.key).is_err());
        assert!(unwrap_response(&r, &a.caller.key).is_ok());
    }

    #[test]
    fn empty_digest_rejected() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let ack = ActivateMemberAckRequest {
            name: "alice".to_string(),
            state_digest: String::new(),
        };
        let e = c.activate_member_ack(&a.env(&w, &ack)).unwrap_err();

        assert_eq!(e.code(), "InvalidRequest");
    }

    fn encrypted_share_for(id: &MemberIdentity, share: &[u8]) -> Vec<u8> {
        let pk = PKey::public_key_from_pem(id.encryption_public_key.as_bytes()).unwrap();
        oaep_encrypt(&pk, share).unwrap()
    }

    #[test]
    fn recovery_share_submission() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let id = c.generate_member(&a.env(&w, &named("erin"))).unwrap();
        activate_fully(&w, &c, &a, "erin");

        w.ledger
            .set_encrypted_share(&id.member_id, encrypted_share_for(&id, b"share of erin"))
            .unwrap();
        w.ledger
            .set_state(ServiceState::WaitingForRecoveryShares)
            .unwrap();

        let held = w.ledger.encrypted_share(&id.member_id).unwrap().unwrap();
        let req = SubmitRecoveryShareRequest {
            name: "erin".to_string(),
            encrypted_share: base64::encode(&held),
        };

        let r = c.submit_recovery_share(&a.env(&w, &req)).unwrap();
        w.ledger.submit(&a.open(&r)).unwrap();

        assert_eq!(
            w.ledger.submitted_share(&id.member_id).unwrap().unwrap(),
            b"share of erin"
        );
        assert_eq!(c.member_status("erin").unwrap(), MemberStatus::Recovered);

        let e = c.submit_recovery_share(&a.env(&w, &req)).unwrap_err();
        assert_eq!(e.code(), "InvalidState");
    }

    #[test]
    fn recovery_share_needs_recovery_state() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let id = c.generate_member(&a.env(&w, &named("frank"))).unwrap();
        activate_fully(&w, &c, &a, "frank");

        let req = SubmitRecoveryShareRequest {
            name: "frank".to_string(),
            encrypted_share: base64::encode(&encrypted_share_for(&id, b"s")),
        };

        let e = c.submit_recovery_share(&a.env(&w, &req)).unwrap_err();
        assert_eq!(e.code(), "InvalidState");
    }

    #[test]
    fn recovery_share_needs_active_member() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let id = c.generate_member(&a.env(&w, &named("gina"))).unwrap();
        w.ledger.register_member(&id.certificate).unwrap();
        w.ledger
            .set_state(ServiceState::WaitingForRecoveryShares)
            .unwrap();

        let req = SubmitRecoveryShareRequest {
            name: "gina".to_string(),
            encrypted_share: base64::encode(&encrypted_share_for(&id, b"s")),
        };

        let e = c.submit_recovery_share(&a.env(&w, &req)).unwrap_err();
        assert_eq!(e.code(), "InvalidState");
    }

    #[test]
    fn garbled_share_is_rejected() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        c.generate_member(&a.env(&w, &named("hank"))).unwrap();
        activate_fully(&w, &c, &a, "hank");
        w.ledger
            .set_state(ServiceState::WaitingForRecoveryShares)
            .unwrap();

        let req = SubmitRecoveryShareRequest {
            name: "hank".to_string(),
            encrypted_share: base64::encode(&[0u8; 256]),
        };

        let e = c.submit_recovery_share(&a.env(&w, &req)).unwrap_err();
        assert_eq!(e.code(), "UnwrapError");
    }

    #[test]
    fn ledger_outages_are_retried() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        c.generate_member(&a.env(&w, &named("ivy"))).unwrap();

        w.ledger.fail_next(1);
        assert_eq!(c.member_status("ivy").unwrap(), MemberStatus::Generated);

        w.ledger.fail_next(10);
        let e = c.member_status("ivy").unwrap_err();
        assert_eq!(e.code(), "DependencyUnavailable");
    }

    #[test]
    fn join_policy_bootstrapped_with_own_host_data() {
        let w = TestWorld::new();
        let c = w.coordinator();

        let p = c.join_policy().unwrap();

        assert_eq!(p.len(), 1);
        assert!(p.contains(&HostData(w.host)));
    }

    #[test]
    fn join_policy_update() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let next = JoinPolicy::new([HostData(w.host), HostData([0xaa; 32])]);
        let doc: serde_json::Value = serde_json::from_str(&next.to_json().unwrap()).unwrap();

        c.set_join_policy(&a.env(&w, &doc)).unwrap();
        assert_eq!(c.join_policy().unwrap(), next);

        // an instance admitted by the new policy may now call in
        let b = Agent::at([0xaa; 32]);
        c.generate_member(&b.env(&w, &named("judy"))).unwrap();
    }

    #[test]
    fn join_policy_self_lockout() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let next = JoinPolicy::new([HostData([0xaa; 32])]);
        let doc: serde_json::Value = serde_json::from_str(&next.to_json().unwrap()).unwrap();

        let e = c.set_join_policy(&a.env(&w, &doc)).unwrap_err();

        assert_eq!(e.code(), "SelfLockoutRejected");
        assert!(c.join_policy().unwrap().contains(&HostData(w.host)));
    }

    #[test]
    fn join_policy_malformed() {
        let w = TestWorld::new();
        let c = w.coordinator();
        let a = Agent::new(&w);

        let doc = serde_json::json!({ "snp": { "hostData": { "abcd": true } } });
        let e = c.set_join_policy(&a.env(&w, &doc)).unwrap_err();

        assert_eq!(e.code(), "PolicyMalformed");
    }

    #[test]
    fn service_report() {
        let w = TestWorld::new();
        let c = w.coordinator();

        let r = c.report().unwrap();

        assert_eq!(r.host_data, HostData(w.host));
        assert_eq!(c.key_store().own_host_data(), r.host_data);
    }

    #[test]
    fn identity_of_unknown_member() {
        let w = TestWorld::new();
        let c = w.coordinator();

        assert_eq!(
            c.member_identity("nobody").unwrap_err().code(),
            "MemberNotFound"
        );
    }
}
