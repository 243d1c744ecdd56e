// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::cert::self_signed_cert;
use super::errors::{crypto, Error};
use super::types::{KeyInfo, KeyType, PrivateKeyInfo, TAG_KEY_TYPE};
use crate::attestation::common::spki_fingerprint;
use crate::attestation::{
    report_data_for, verify_host_data_trusted, verify_report_data_binding, AttestationClaims,
    AttestationEvidence, AttestationVerifier, HostData, IAttester,
};
use crate::config::Config;
use crate::retry::RetryPolicy;
use crate::store::{
    self, ICredential, IKeyVault, IReleaseSidecar, ImportKeyRequest, ImportOutcome, JoinPolicy,
    Jwk, ReleasePolicy, ReleaseRequest,
};
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use std::collections::BTreeMap;
use std::sync::Arc;

const RSA_BITS: u32 = 2048;
const MAX_KID_LEN: usize = 127;

/// The external collaborators a [`KeyStore`] drives
#[derive(Clone)]
pub struct KeyStoreBackends {
    pub vault: Arc<dyn IKeyVault>,
    pub sidecar: Arc<dyn IReleaseSidecar>,
    pub credential: Arc<dyn ICredential>,
    pub attester: Arc<dyn IAttester>,
}

/// Generates, publishes and releases signing and encryption keys whose
/// release is pinned to the hostData of the generating instance
pub struct KeyStore {
    b: KeyStoreBackends,
    verifier: AttestationVerifier,
    maa_endpoint: String,
    akv_endpoint: String,
    skr_endpoint: String,
    own_host_data: HostData,
    trusted: JoinPolicy,
    retry: RetryPolicy,
}

pub fn report_secret_name(fingerprint: &str) -> String {
    format!("report-{fingerprint}")
}

pub fn cert_secret_name(fingerprint: &str) -> String {
    format!("cert-{fingerprint}")
}

fn validate_kid(kid: &str) -> Result<(), Error> {
    if kid.is_empty()
        || kid.len() > MAX_KID_LEN
        || !kid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(Error::InvalidRequest(format!("invalid key name {kid:?}")));
    }

    Ok(())
}

fn to_pem(v: Vec<u8>) -> Result<String, Error> {
    String::from_utf8(v).map_err(|e| Error::Internal(e.to_string()))
}

fn generate(key_type: KeyType) -> Result<PKey<Private>, Error> {
    match key_type {
        KeyType::Encryption => PKey::from_rsa(Rsa::generate(RSA_BITS).map_err(crypto)?),
        KeyType::Signing => {
            let g = EcGroup::from_curve_name(Nid::SECP384R1).map_err(crypto)?;
            PKey::from_ec_key(EcKey::generate(&g).map_err(crypto)?)
        }
    }
    .map_err(crypto)
}

impl KeyStore {
    /// Attest the current instance and set up a key store trusting its own
    /// hostData plus the configured extra values
    pub fn new(
        cfg: &Config,
        verifier: AttestationVerifier,
        b: KeyStoreBackends,
    ) -> Result<KeyStore, Error> {
        let evidence = b.attester.attest(&[0u8; 64])?;
        let claims = verifier.verify(&evidence)?;

        let own_host_data = claims.host_data;

        let mut trusted = JoinPolicy::new(cfg.trusted_host_data.iter().copied());
        trusted.insert(own_host_data);

        log::info!(
            "key store ready: own hostData {own_host_data}, {} trusted values",
            trusted.len()
        );

        Ok(KeyStore {
            b,
            verifier,
            maa_endpoint: cfg.maa_endpoint.clone(),
            akv_endpoint: cfg.akv_endpoint.clone(),
            skr_endpoint: cfg.skr_endpoint.clone(),
            own_host_data,
            trusted,
            retry: cfg.retry,
        })
    }

    /// The verified hostData of this instance
    pub fn own_host_data(&self) -> HostData {
        self.own_host_data
    }

    pub fn attester(&self) -> &Arc<dyn IAttester> {
        &self.b.attester
    }

    pub fn verifier(&self) -> &AttestationVerifier {
        &self.verifier
    }

    /// Generate the key `kid` unless it already exists.  Either way the
    /// published key is returned; concurrent callers all observe the same
    /// key.
    pub fn generate_key(
        &self,
        kid: &str,
        key_type: KeyType,
        mut tags: BTreeMap<String, String>,
    ) -> Result<KeyInfo, Error> {
        validate_kid(kid)?;

        if let Some(existing) = self.lookup(kid)? {
            log::debug!("key {kid} already exists");
            return Ok(existing);
        }

        let key = generate(key_type)?;
        let pem = to_pem(key.public_key_to_pem().map_err(crypto)?)?;
        let fp = spki_fingerprint(&key)?;

        let evidence = self.b.attester.attest(&report_data_for(&pem))?;
        let report = serde_json::to_string(&evidence).map_err(|e| Error::Internal(e.to_string()))?;

        let vault = &self.b.vault;

        let mut written = vec![report_secret_name(&fp)];
        self.retry.run("storing attestation report", || {
            vault.set_secret(&written[0], &report)
        })?;

        if key_type == KeyType::Signing {
            let cert = self_signed_cert(kid, &key)?;
            let cert_pem = to_pem(cert.to_pem().map_err(crypto)?)?;

            let name = cert_secret_name(&fp);
            self.retry.run("storing certificate", || {
                vault.set_secret(&name, &cert_pem)
            })?;
            written.push(name);
        }

        tags.insert(TAG_KEY_TYPE.to_string(), key_type.as_str().to_string());

        let req = ImportKeyRequest::new(
            Jwk::from_private_key(&key)?,
            &ReleasePolicy::for_host_data(&self.maa_endpoint, &self.own_host_data),
            tags,
        )?;

        match self
            .retry
            .run("importing key", || vault.import_key(kid, &req))?
        {
            ImportOutcome::Imported => {
                log::info!("generated {key_type} key {kid} ({fp})");
            }
            ImportOutcome::PolicyConflict => {
                log::debug!("key {kid} was imported concurrently, using the published one");

                for name in written.iter() {
                    if let Err(e) = self
                        .retry
                        .run("removing unused secret", || vault.delete_secret(name))
                    {
                        log::warn!("could not remove {name}: {e:?}");
                    }
                }
            }
        }

        self.get_key(kid)
    }

    /// Public metadata of `kid`
    pub fn get_key(&self, kid: &str) -> Result<KeyInfo, Error> {
        self.lookup(kid)?
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))
    }

    /// Public metadata of every key of the given type whose provenance
    /// checks out.  Keys failing the provenance check are skipped.
    pub fn list_keys(&self, key_type: Option<KeyType>) -> Result<Vec<KeyInfo>, Error> {
        let names = self
            .retry
            .run("listing keys", || self.b.vault.list_keys())?;

        let mut out = Vec::new();

        for name in names.iter() {
            match self.lookup(name) {
                Ok(Some(k)) if key_type.map_or(true, |t| t == k.key_type) => out.push(k),
                Ok(_) => {}
                Err(Error::Attestation(e)) => {
                    log::warn!("skipping key {name}: {:?}", e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }

    /// Release the private half of `kid` through the release sidecar
    pub fn release_key(&self, kid: &str) -> Result<PrivateKeyInfo, Error> {
        validate_kid(kid)?;

        let req = ReleaseRequest {
            maa_endpoint: self.maa_endpoint.clone(),
            akv_endpoint: self.akv_endpoint.clone(),
            kid: kid.to_string(),
            access_token: self.b.credential.token()?,
        };

        let resp = self
            .retry
            .run("releasing key", || {
                self.b.sidecar.release(&self.skr_endpoint, &req)
            })
            .map_err(|e| match e {
                store::Error::KeyNotFound(_) => Error::KeyNotFound(kid.to_string()),
                e => e.into(),
            })?;

        let jwk: Jwk = serde_json::from_str(&resp.key)
            .map_err(|e| store::Error::Syntax(format!("released key: {e}")))?;

        let key_type = KeyType::from_jwk(&jwk)
            .ok_or_else(|| Error::Internal(format!("released key has kty {}", jwk.kty)))?;

        let key = jwk.to_private_key()?;

        log::info!("released {key_type} key {kid}");

        Ok(PrivateKeyInfo {
            kid: kid.to_string(),
            key_type,
            key,
        })
    }

    /// Check that `evidence` was produced by an instance this key store
    /// trusts, over `public_key_pem`
    pub fn verify_key_imported_by_service(
        &self,
        evidence: &AttestationEvidence,
        public_key_pem: &str,
    ) -> Result<AttestationClaims, Error> {
        let claims = self.verifier.verify(evidence)?;

        verify_report_data_binding(&claims, public_key_pem)?;
        verify_host_data_trusted(&claims, &self.trusted)?;

        Ok(claims)
    }

    fn lookup(&self, kid: &str) -> Result<Option<KeyInfo>, Error> {
        let vault = &self.b.vault;

        let Some(vk) = self.retry.run("reading key", || vault.get_key(kid))? else {
            return Ok(None);
        };

        let key_type = KeyType::from_jwk(&vk.key)
            .ok_or_else(|| Error::Internal(format!("{kid} has kty {}", vk.key.kty)))?;

        let public = vk.key.to_public_key()?;
        let pem = to_pem(public.public_key_to_pem().map_err(crypto)?)?;
        let fp = spki_fingerprint(&public)?;

        let report_name = report_secret_name(&fp);
        let report = self
            .retry
            .run("reading attestation report", || vault.get_secret(&report_name))?
            .ok_or_else(|| store::Error::SecretNotFound(report_name.clone()))?;

        let evidence: AttestationEvidence = serde_json::from_str(&report)
            .map_err(|e| Error::Internal(format!("{report_name}: {e}")))?;

        let claims = self.verify_key_imported_by_service(&evidence, &pem)?;

        let certificate = match key_type {
            KeyType::Signing => {
                let cert_name = cert_secret_name(&fp);
                let cert_pem = self
                    .retry
                    .run("reading certificate", || vault.get_secret(&cert_name))?
                    .ok_or_else(|| store::Error::SecretNotFound(cert_name.clone()))?;

                let cert = X509::from_pem(cert_pem.as_bytes()).map_err(crypto)?;
                if !cert.public_key().map_err(crypto)?.public_eq(&public) {
                    return Err(Error::Internal(format!(
                        "{cert_name} does not certify the key {kid}"
                    )));
                }

                Some(cert_pem)
            }
            KeyType::Encryption => None,
        };

        Ok(Some(KeyInfo {
            kid: kid.to_string(),
            key_type,
            public_key: pem,
            fingerprint: fp,
            certificate,
            attestation: evidence,
            host_data: claims.host_data,
            tags: vk.tags,
        }))
    }
}
