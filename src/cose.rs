// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Minimal COSE Sign1 (RFC 9052) support: decoding, signature verification
//! for the ECDSA, RSASSA-PSS and RSASSA-PKCS1 families, and ES384 signing.

use ciborium::de::from_reader;
use ciborium::ser::into_writer;
use ciborium::Value;
use openssl::bn::BigNum;
use openssl::ec::EcKeyRef;
use openssl::ecdsa::EcdsaSig;
use openssl::hash::{hash, MessageDigest};
use openssl::pkey::{HasPublic, PKeyRef, Private};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};

pub const COSE_SIGN1_TAG: u64 = 18;

pub const HEADER_ALG: i128 = 1;
pub const HEADER_KID: i128 = 4;
pub const HEADER_X5CHAIN: i128 = 33;

pub const ALG_ES256: i64 = -7;
pub const ALG_ES384: i64 = -35;
pub const ALG_ES512: i64 = -36;
pub const ALG_PS256: i64 = -37;
pub const ALG_PS384: i64 = -38;
pub const ALG_PS512: i64 = -39;
pub const ALG_RS256: i64 = -257;
pub const ALG_RS384: i64 = -258;
pub const ALG_RS512: i64 = -259;

const SIGNATURE1_CONTEXT: &str = "Signature1";

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("COSE syntax error: {0}")]
    Syntax(String),
    #[error("unsupported COSE algorithm {0}")]
    UnsupportedAlg(i64),
    #[error("COSE crypto error: {0}")]
    Crypto(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Syntax(_) => "FormatError",
            Error::UnsupportedAlg(_) => "SignatureError",
            Error::Crypto(_) => "InternalError",
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Syntax(e) | Error::Crypto(e) => write!(f, "{}: {}", self.code(), e),
            Error::UnsupportedAlg(a) => write!(f, "{}: unsupported algorithm {}", self.code(), a),
        }
    }
}

/// A decoded COSE_Sign1 message
#[derive(Clone, Debug)]
pub struct CoseSign1 {
    /// serialized protected header bucket, as signed
    pub protected_raw: Vec<u8>,
    pub protected: Vec<(Value, Value)>,
    pub unprotected: Vec<(Value, Value)>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

enum SigFamily {
    Ecdsa,
    Pss,
    Pkcs1,
}

fn alg_params(alg: i64) -> Result<(SigFamily, MessageDigest), Error> {
    let p = match alg {
        ALG_ES256 => (SigFamily::Ecdsa, MessageDigest::sha256()),
        ALG_ES384 => (SigFamily::Ecdsa, MessageDigest::sha384()),
        ALG_ES512 => (SigFamily::Ecdsa, MessageDigest::sha512()),
        ALG_PS256 => (SigFamily::Pss, MessageDigest::sha256()),
        ALG_PS384 => (SigFamily::Pss, MessageDigest::sha384()),
        ALG_PS512 => (SigFamily::Pss, MessageDigest::sha512()),
        ALG_RS256 => (SigFamily::Pkcs1, MessageDigest::sha256()),
        ALG_RS384 => (SigFamily::Pkcs1, MessageDigest::sha384()),
        ALG_RS512 => (SigFamily::Pkcs1, MessageDigest::sha512()),
        x => return Err(Error::UnsupportedAlg(x)),
    };

    Ok(p)
}

fn crypto(e: openssl::error::ErrorStack) -> Error {
    Error::Crypto(e.to_string())
}

/// Verify `sig` over `data` with the signature scheme named by the COSE
/// algorithm identifier `alg`.  ECDSA signatures are the raw `r || s`
/// concatenation.
pub fn verify_with_alg<T: HasPublic>(
    alg: i64,
    pkey: &PKeyRef<T>,
    data: &[u8],
    sig: &[u8],
) -> Result<bool, Error> {
    let (family, md) = alg_params(alg)?;

    match family {
        SigFamily::Ecdsa => {
            let ec = pkey.ec_key().map_err(crypto)?;

            if sig.is_empty() || sig.len() % 2 != 0 {
                return Ok(false);
            }

            let (r, s) = sig.split_at(sig.len() / 2);
            let sig = EcdsaSig::from_private_components(
                BigNum::from_slice(r).map_err(crypto)?,
                BigNum::from_slice(s).map_err(crypto)?,
            )
            .map_err(crypto)?;

            let digest = hash(md, data).map_err(crypto)?;

            sig.verify(&digest, &ec).map_err(crypto)
        }
        SigFamily::Pss | SigFamily::Pkcs1 => {
            let mut v = Verifier::new(md, pkey).map_err(crypto)?;

            if let SigFamily::Pss = family {
                v.set_rsa_padding(Padding::PKCS1_PSS).map_err(crypto)?;
                v.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)
                    .map_err(crypto)?;
                v.set_rsa_mgf1_md(md).map_err(crypto)?;
            } else {
                v.set_rsa_padding(Padding::PKCS1).map_err(crypto)?;
            }

            v.update(data).map_err(crypto)?;

            // openssl reports a malformed signature as an error rather than
            // a mismatch
            Ok(v.verify(sig).unwrap_or(false))
        }
    }
}

/// Produce a raw `r || s` ECDSA signature, each scalar padded to `len` bytes
pub fn sign_ecdsa(
    md: MessageDigest,
    key: &EcKeyRef<Private>,
    data: &[u8],
    len: i32,
) -> Result<Vec<u8>, Error> {
    let digest = hash(md, data).map_err(crypto)?;
    let sig = EcdsaSig::sign(&digest, key).map_err(crypto)?;

    let mut out = sig.r().to_vec_padded(len).map_err(crypto)?;
    out.extend(sig.s().to_vec_padded(len).map_err(crypto)?);

    Ok(out)
}

fn to_bytes(v: Value, what: &str) -> Result<Vec<u8>, Error> {
    match v {
        Value::Bytes(b) => Ok(b),
        _ => Err(Error::Syntax(format!("{what} MUST be bstr"))),
    }
}

fn to_header_map(v: Value, what: &str) -> Result<Vec<(Value, Value)>, Error> {
    match v {
        Value::Map(m) => Ok(m),
        _ => Err(Error::Syntax(format!("{what} MUST be map"))),
    }
}

fn cbor_encode(v: &Value) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    into_writer(v, &mut buf).map_err(|e| Error::Syntax(e.to_string()))?;
    Ok(buf)
}

impl CoseSign1 {
    /// Decode a (possibly tagged) CBOR encoded COSE_Sign1
    pub fn decode(buf: &[u8]) -> Result<CoseSign1, Error> {
        let v: Value = from_reader(buf).map_err(|e| Error::Syntax(e.to_string()))?;

        let v = match v {
            Value::Tag(t, inner) => {
                if t != COSE_SIGN1_TAG {
                    return Err(Error::Syntax(format!(
                        "expecting tag {COSE_SIGN1_TAG}, got {t}"
                    )));
                }
                *inner
            }
            other => other,
        };

        let items = match v {
            Value::Array(a) if a.len() == 4 => a,
            _ => {
                return Err(Error::Syntax(
                    "expecting array with 4 elements".to_string(),
                ))
            }
        };

        let mut it = items.into_iter();
        let (p, u, pl, s) = match (it.next(), it.next(), it.next(), it.next()) {
            (Some(p), Some(u), Some(pl), Some(s)) => (p, u, pl, s),
            _ => return Err(Error::Syntax("truncated COSE_Sign1".to_string())),
        };

        let protected_raw = to_bytes(p, "protected header")?;
        let protected = if protected_raw.is_empty() {
            Vec::new()
        } else {
            let pv: Value = from_reader(protected_raw.as_slice())
                .map_err(|e| Error::Syntax(format!("protected header: {e}")))?;
            to_header_map(pv, "protected header")?
        };

        let unprotected = to_header_map(u, "unprotected header")?;

        let payload = match pl {
            Value::Bytes(b) => b,
            Value::Null => {
                return Err(Error::Syntax("detached payload not supported".to_string()))
            }
            _ => return Err(Error::Syntax("payload MUST be bstr".to_string())),
        };

        let signature = to_bytes(s, "signature")?;

        Ok(CoseSign1 {
            protected_raw,
            protected,
            unprotected,
            payload,
            signature,
        })
    }

    /// Sign `payload` with ES384 under the given protected header entries.
    /// The algorithm header is added automatically.
    pub fn sign_es384(
        mut protected: Vec<(Value, Value)>,
        payload: Vec<u8>,
        key: &EcKeyRef<Private>,
    ) -> Result<CoseSign1, Error> {
        protected.insert(
            0,
            (
                Value::Integer((HEADER_ALG as i64).into()),
                Value::Integer(ALG_ES384.into()),
            ),
        );

        let protected_raw = cbor_encode(&Value::Map(protected.clone()))?;

        let mut msg = CoseSign1 {
            protected_raw,
            protected,
            unprotected: Vec::new(),
            payload,
            signature: Vec::new(),
        };

        let tbs = msg.to_be_signed()?;
        msg.signature = sign_ecdsa(MessageDigest::sha384(), key, &tbs, 48)?;

        Ok(msg)
    }

    /// The Sig_structure covered by the signature
    pub fn to_be_signed(&self) -> Result<Vec<u8>, Error> {
        let s = Value::Array(vec![
            Value::Text(SIGNATURE1_CONTEXT.to_string()),
            Value::Bytes(self.protected_raw.clone()),
            Value::Bytes(Vec::new()),
            Value::Bytes(self.payload.clone()),
        ]);

        cbor_encode(&s)
    }

    /// Tagged CBOR encoding
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let v = Value::Tag(
            COSE_SIGN1_TAG,
            Box::new(Value::Array(vec![
                Value::Bytes(self.protected_raw.clone()),
                Value::Map(self.unprotected.clone()),
                Value::Bytes(self.payload.clone()),
                Value::Bytes(self.signature.clone()),
            ])),
        );

        cbor_encode(&v)
    }

    /// Lookup a protected header parameter with an integer label
    pub fn header(&self, label: i128) -> Option<&Value> {
        self.protected.iter().find_map(|(k, v)| match k {
            Value::Integer(i) if i128::from(*i) == label => Some(v),
            _ => None,
        })
    }

    /// Lookup a protected header parameter with a text label
    pub fn text_header(&self, label: &str) -> Option<&Value> {
        self.protected.iter().find_map(|(k, v)| match k {
            Value::Text(t) if t == label => Some(v),
            _ => None,
        })
    }

    pub fn alg(&self) -> Result<i64, Error> {
        match self.header(HEADER_ALG) {
            Some(Value::Integer(i)) => i64::try_from(i128::from(*i))
                .map_err(|_| Error::Syntax("alg out of range".to_string())),
            Some(_) => Err(Error::Syntax("alg MUST be int".to_string())),
            None => Err(Error::Syntax(
                "alg header parameter not found".to_string(),
            )),
        }
    }

    /// Verify the signature using the algorithm in the protected header
    pub fn verify<T: HasPublic>(&self, pkey: &PKeyRef<T>) -> Result<bool, Error> {
        let alg = self.alg()?;
        let tbs = self.to_be_signed()?;

        verify_with_alg(alg, pkey, &tbs, &self.signature)
    }
}
