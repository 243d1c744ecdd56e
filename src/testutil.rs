// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! A synthetic trust world for tests: an AMD-like certificate hierarchy that
//! signs SEV-SNP reports, a UVM endorsement CA, attested callers and the
//! in-memory collaborators of the key store and the recovery coordinator.

use crate::attestation::base64;
use crate::attestation::common::spki_fingerprint;
use crate::attestation::report::{encode_scalar, RawReport, SIGNED_LEN, SIG_ALGO_ECDSA_P384_SHA384};
use crate::attestation::{
    report_data_for, AttestationClaims, AttestationEvidence, AttestationVerifier,
    EndorsementPolicy, Error, HostData, IAttester, TcbVersion, TrustedRoots, UVM_FEED,
};
use crate::config::Config;
use crate::cose::{CoseSign1, HEADER_X5CHAIN};
use crate::envelope::{EnvelopeSignature, SignedEnvelopeRequest};
use crate::keystore::{KeyStore, KeyStoreBackends};
use crate::recovery::{MemoLedger, RecoveryCoordinator};
use crate::retry::RetryPolicy;
use crate::store::{MemoKeyVault, MemoPolicyStore, MemoReleaseSidecar, PolicyStore, StaticCredential};
use ciborium::Value;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sha::{sha256, sha384};
use openssl::sign::{RsaPssSaltlen, Signer};
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromZeros, IntoBytes};

/// EKU of the UVM endorsement signing certificates
pub const UVM_EKU: &str = "1.3.6.1.4.1.311.76.59.1.2";

/// Launch measurement of the synthetic UVM
pub const MEASUREMENT: [u8; 48] = [0x4d; 48];

const TOKEN: &str = "test-access-token";

/// guest policy bits every synthetic report carries: ABI 0.0, bit 17 set
const POLICY_BASE: u64 = 0x30000;

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::max())
        .try_init();
}

fn p384() -> PKey<Private> {
    let g = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    PKey::from_ec_key(EcKey::generate(&g).unwrap()).unwrap()
}

static SERIAL: AtomicU32 = AtomicU32::new(1);

/// A certificate for `key` named `cn`, issued by `issuer` (self-signed if
/// `None`)
fn certificate(
    cn: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
    eku: Option<&str>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut b = X509Builder::new().unwrap();
    b.set_version(2).unwrap();

    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::SeqCst))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    b.set_serial_number(&serial).unwrap();

    b.set_subject_name(&name).unwrap();
    match issuer {
        Some((c, _)) => b.set_issuer_name(c.subject_name()).unwrap(),
        None => b.set_issuer_name(&name).unwrap(),
    }

    b.set_pubkey(key).unwrap();

    let not_before = Asn1Time::days_from_now(0).unwrap();
    let not_after = Asn1Time::days_from_now(365).unwrap();
    b.set_not_before(&not_before).unwrap();
    b.set_not_after(&not_after).unwrap();

    if ca {
        b.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        b.append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .unwrap(),
        )
        .unwrap();
    } else {
        b.append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .build()
                .unwrap(),
        )
        .unwrap();
    }

    if let Some(oid) = eku {
        b.append_extension(ExtendedKeyUsage::new().other(oid).build().unwrap())
            .unwrap();
    }

    let signer = issuer.map(|(_, k)| k).unwrap_or(key);
    b.sign(signer, MessageDigest::sha384()).unwrap();

    b.build()
}

fn pem(c: &X509) -> String {
    String::from_utf8(c.to_pem().unwrap()).unwrap()
}

/// An AMD-like ARK -> ASK -> VCEK hierarchy that signs SEV-SNP reports
pub struct TestPlatform {
    pub ark_cert: X509,
    pub ask_cert: X509,
    pub vcek_cert: X509,
    ark_key: PKey<Private>,
    vcek_key: PKey<Private>,
}

impl TestPlatform {
    pub fn new() -> Self {
        let ark_key = p384();
        let ask_key = p384();
        let vcek_key = p384();

        let ark_cert = certificate("ARK-Genoa", &ark_key, None, true, None);
        let ask_cert = certificate("SEV-Genoa", &ask_key, Some((&ark_cert, &ark_key)), true, None);
        let vcek_cert = certificate("SEV-VCEK", &vcek_key, Some((&ask_cert, &ask_key)), false, None);

        Self {
            ark_cert,
            ask_cert,
            vcek_cert,
            ark_key,
            vcek_key,
        }
    }

    /// SPKI fingerprint of the ARK
    pub fn ark_fingerprint(&self) -> String {
        spki_fingerprint(&self.ark_key).unwrap()
    }

    pub fn roots(&self) -> TrustedRoots {
        TrustedRoots::new([self.ark_fingerprint()])
    }

    /// VCEK, ASK and ARK, in that order
    pub fn bundle_pem(&self) -> String {
        [&self.vcek_cert, &self.ask_cert, &self.ark_cert]
            .iter()
            .map(|c| pem(c))
            .collect()
    }

    /// A binary report signed by the VCEK
    pub fn report(
        &self,
        host_data: &[u8; 32],
        report_data: &[u8; 64],
        measurement: &[u8; 48],
        policy_bits: u64,
    ) -> Vec<u8> {
        let mut r = RawReport::new_zeroed();
        r.version = U32::new(3);
        r.guest_svn = U32::new(101);
        r.policy = U64::new(POLICY_BASE | policy_bits);
        r.signature_algo = U32::new(SIG_ALGO_ECDSA_P384_SHA384);
        r.report_data = *report_data;
        r.measurement = *measurement;
        r.host_data = *host_data;
        r.reported_tcb = U64::new(u64::from_le_bytes([4, 0, 0, 0, 0, 0, 22, 213]));
        r.current_tcb = r.reported_tcb;
        r.committed_tcb = r.reported_tcb;
        r.launch_tcb = r.reported_tcb;
        r.chip_id = [0xc1; 64];

        let digest = sha384(&r.as_bytes()[..SIGNED_LEN]);
        let ec = self.vcek_key.ec_key().unwrap();
        let sig = EcdsaSig::sign(&digest, &ec).unwrap();

        r.signature_r = encode_scalar(&sig.r().to_vec());
        r.signature_s = encode_scalar(&sig.s().to_vec());

        r.as_bytes().to_vec()
    }

    pub fn evidence(
        &self,
        host_data: &[u8; 32],
        report_data: &[u8; 64],
        measurement: &[u8; 48],
        policy_bits: u64,
        uvm: Option<Vec<u8>>,
    ) -> AttestationEvidence {
        AttestationEvidence {
            evidence: base64::encode(&self.report(host_data, report_data, measurement, policy_bits)),
            endorsements: base64::encode(self.bundle_pem().as_bytes()),
            uvm_endorsements: uvm.map(|u| base64::encode(&u)),
        }
    }
}

/// A UVM endorsement CA with one signing certificate
pub struct TestUvm {
    root_cert: X509,
    leaf_cert: X509,
    leaf_key: PKey<Private>,
}

impl TestUvm {
    pub fn new() -> Self {
        Self::with_leaf_eku(UVM_EKU)
    }

    /// A UVM CA whose signing certificate carries `eku` instead of the
    /// UVM signing EKU
    pub fn with_leaf_eku(eku: &str) -> Self {
        let root_key = p384();
        let leaf_key = p384();

        let root_cert = certificate("UVM Root CA", &root_key, None, true, None);
        let leaf_cert = certificate(
            "UVM Signing",
            &leaf_key,
            Some((&root_cert, &root_key)),
            false,
            Some(eku),
        );

        Self {
            root_cert,
            leaf_cert,
            leaf_key,
        }
    }

    /// The did:x509 issuer pinning this CA
    pub fn issuer(&self) -> String {
        let fp = sha256(&self.root_cert.to_der().unwrap());

        format!(
            "did:x509:0:sha256:{}::eku:{UVM_EKU}",
            base64::encode_url(&fp)
        )
    }

    pub fn policy(&self) -> EndorsementPolicy {
        EndorsementPolicy {
            issuer: self.issuer(),
            feed: UVM_FEED.to_string(),
        }
    }

    pub fn endorsement(&self, measurement: &[u8; 48]) -> Vec<u8> {
        self.endorsement_with_issuer(measurement, &self.issuer())
    }

    /// An endorsement signed by this CA that claims to come from `issuer`
    pub fn endorsement_with_issuer(&self, measurement: &[u8; 48], issuer: &str) -> Vec<u8> {
        let protected = vec![
            (
                Value::Text("iss".to_string()),
                Value::Text(issuer.to_string()),
            ),
            (
                Value::Text("feed".to_string()),
                Value::Text(UVM_FEED.to_string()),
            ),
            (
                Value::Integer((HEADER_X5CHAIN as i64).into()),
                Value::Array(vec![
                    Value::Bytes(self.leaf_cert.to_der().unwrap()),
                    Value::Bytes(self.root_cert.to_der().unwrap()),
                ]),
            ),
        ];

        let payload = serde_json::json!({
            "x-ms-sevsnpvm-launchmeasurement": hex::encode(measurement),
            "x-ms-sevsnpvm-guestsvn": "101",
        });

        let ec = self.leaf_key.ec_key().unwrap();

        CoseSign1::sign_es384(protected, serde_json::to_vec(&payload).unwrap(), &ec)
            .unwrap()
            .encode()
            .unwrap()
    }
}

/// An attester for an instance running the synthetic UVM with `host_data`
pub struct TestAttester {
    platform: Arc<TestPlatform>,
    uvm: Arc<TestUvm>,
    host_data: [u8; 32],
}

impl TestAttester {
    pub fn new(platform: Arc<TestPlatform>, uvm: Arc<TestUvm>, host_data: [u8; 32]) -> Self {
        Self {
            platform,
            uvm,
            host_data,
        }
    }
}

impl IAttester for TestAttester {
    fn attest(&self, report_data: &[u8; 64]) -> Result<AttestationEvidence, Error> {
        Ok(self.platform.evidence(
            &self.host_data,
            report_data,
            &MEASUREMENT,
            0,
            Some(self.uvm.endorsement(&MEASUREMENT)),
        ))
    }
}

/// Claims as if verified, for tests of the checks that consume them
pub fn claims(host_data: [u8; 32], report_data: [u8; 64]) -> AttestationClaims {
    AttestationClaims {
        host_data: HostData(host_data),
        report_data,
        launch_measurement: MEASUREMENT,
        debug_allowed: false,
        smt_allowed: true,
        migrate_allowed: false,
        version: 3,
        guest_svn: 101,
        vmpl: 0,
        reported_tcb: TcbVersion::default(),
        current_tcb: TcbVersion::default(),
        committed_tcb: TcbVersion::default(),
        launch_tcb: TcbVersion::default(),
        family_id: [0; 16],
        image_id: [0; 16],
        report_id: [0; 32],
        id_key_digest: [0; 48],
        author_key_digest: [0; 48],
        chip_id: [0; 64],
        uvm: None,
    }
}

/// A caller holding an RSA key, able to produce signed envelopes
pub struct TestCaller {
    pub key: PKey<Private>,
    /// PEM public key
    pub pem: String,
}

impl TestCaller {
    pub fn new() -> Self {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let pem = String::from_utf8(key.public_key_to_pem().unwrap()).unwrap();

        Self { key, pem }
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut s = Signer::new(MessageDigest::sha256(), &self.key).unwrap();
        s.set_rsa_padding(Padding::PKCS1_PSS).unwrap();
        s.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH).unwrap();
        s.set_rsa_mgf1_md(MessageDigest::sha256()).unwrap();
        s.update(data).unwrap();
        s.sign_to_vec().unwrap()
    }

    /// `payload` signed by this caller, attested from an instance with
    /// `host_data`
    pub fn envelope<T: Serialize>(
        &self,
        p: &TestPlatform,
        host_data: &[u8; 32],
        payload: &T,
    ) -> SignedEnvelopeRequest {
        self.envelope_with_policy(p, host_data, 0, None, payload)
    }

    /// As [`TestCaller::envelope`], with guest policy bits and an optional
    /// UVM endorsement carried in the attestation
    pub fn envelope_with_policy<T: Serialize>(
        &self,
        p: &TestPlatform,
        host_data: &[u8; 32],
        policy_bits: u64,
        uvm: Option<Vec<u8>>,
        payload: &T,
    ) -> SignedEnvelopeRequest {
        let data = serde_json::to_vec(payload).unwrap();

        SignedEnvelopeRequest {
            data: base64::encode(&data),
            sign: EnvelopeSignature {
                signature: base64::encode(&self.sign(&data)),
                public_key: base64::encode(self.pem.as_bytes()),
            },
            attestation: p.evidence(
                host_data,
                &report_data_for(&self.pem),
                &MEASUREMENT,
                policy_bits,
                uvm,
            ),
        }
    }
}

/// The service's environment: one platform, one UVM CA, and in-memory
/// vault, policy store and ledger shared by every instance built from it
pub struct TestWorld {
    pub platform: Arc<TestPlatform>,
    pub uvm: Arc<TestUvm>,
    pub vault: Arc<MemoKeyVault>,
    pub policies: Arc<MemoPolicyStore>,
    pub ledger: Arc<MemoLedger>,
    /// hostData of the service instance
    pub host: [u8; 32],
    pub config: Config,
}

impl TestWorld {
    pub fn new() -> Self {
        let platform = Arc::new(TestPlatform::new());
        let uvm = Arc::new(TestUvm::new());

        let config = Config {
            akv_endpoint: "https://vault.test".to_string(),
            trusted_amd_roots: vec![platform.ark_fingerprint()],
            uvm_endorsement: uvm.policy(),
            retry: RetryPolicy::immediate(3),
            ..Default::default()
        };

        Self {
            platform,
            uvm,
            vault: Arc::new(MemoKeyVault::new()),
            policies: Arc::new(MemoPolicyStore::new()),
            ledger: Arc::new(MemoLedger::new()),
            host: [0x3c; 32],
            config,
        }
    }

    pub fn verifier(&self) -> AttestationVerifier {
        AttestationVerifier::from_config(&self.config)
    }

    pub fn attester(&self) -> Arc<dyn IAttester> {
        self.attester_at(self.host)
    }

    pub fn attester_at(&self, host_data: [u8; 32]) -> Arc<dyn IAttester> {
        Arc::new(TestAttester::new(
            self.platform.clone(),
            self.uvm.clone(),
            host_data,
        ))
    }

    /// Backends of an instance with `host_data`
    pub fn backends_at(&self, host_data: [u8; 32]) -> KeyStoreBackends {
        KeyStoreBackends {
            vault: self.vault.clone(),
            sidecar: Arc::new(MemoReleaseSidecar::for_host_data(
                &self.config.skr_endpoint,
                self.vault.clone(),
                &HostData(host_data),
                TOKEN,
            )),
            credential: Arc::new(StaticCredential::new(TOKEN)),
            attester: self.attester_at(host_data),
        }
    }

    pub fn keystore(&self) -> KeyStore {
        self.keystore_at(self.host)
    }

    pub fn keystore_at(&self, host_data: [u8; 32]) -> KeyStore {
        self.keystore_with(&self.config, host_data)
    }

    pub fn keystore_with(&self, cfg: &Config, host_data: [u8; 32]) -> KeyStore {
        KeyStore::new(
            cfg,
            AttestationVerifier::from_config(cfg),
            self.backends_at(host_data),
        )
        .unwrap()
    }

    pub fn coordinator(&self) -> RecoveryCoordinator {
        RecoveryCoordinator::new(
            self.keystore(),
            PolicyStore::new(self.policies.clone(), self.config.retry),
            self.ledger.clone(),
            self.config.retry,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_is_self_consistent() {
        let w = TestWorld::new();

        let ev = w.attester().attest(&[0x01; 64]).unwrap();
        let c = w.verifier().verify(&ev).unwrap();

        assert_eq!(c.host_data, HostData(w.host));
        assert_eq!(c.guest_svn, 101);
        assert_eq!(c.uvm.unwrap().svn.as_deref(), Some("101"));
    }
}
