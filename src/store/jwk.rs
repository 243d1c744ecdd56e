// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::base64;
use openssl::bn::{BigNum, BigNumContext, BigNumRef};
use openssl::ec::{EcGroup, EcKey};
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Private, Public};
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};

/// A JSON Web Key as exchanged with the managed key vault and the release
/// sidecar.  Vault key types carry an `-HSM` suffix.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,

    // RSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,

    // EC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    // private exponent (RSA) or scalar (EC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
}

impl std::fmt::Debug for Jwk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("crv", &self.crv)
            .field("private", &self.d.is_some())
            .finish()
    }
}

fn crypto(e: openssl::error::ErrorStack) -> Error {
    Error::Internal(e.to_string())
}

fn b64(n: &BigNumRef) -> String {
    base64::encode_url(&n.to_vec())
}

fn b64_padded(n: &BigNumRef, len: i32) -> Result<String, Error> {
    Ok(base64::encode_url(&n.to_vec_padded(len).map_err(crypto)?))
}

fn bn(v: &Option<String>, what: &str) -> Result<BigNum, Error> {
    let s = v
        .as_deref()
        .ok_or_else(|| Error::Syntax(format!("JWK: missing {what}")))?;

    let b = base64::decode_url_str(s, what).map_err(|e| Error::Syntax(e.to_string()))?;

    BigNum::from_slice(&b).map_err(crypto)
}

fn curve(crv: &str) -> Result<(Nid, i32), Error> {
    match crv {
        "P-256" => Ok((Nid::X9_62_PRIME256V1, 32)),
        "P-384" => Ok((Nid::SECP384R1, 48)),
        "P-521" => Ok((Nid::SECP521R1, 66)),
        x => Err(Error::Syntax(format!("JWK: unsupported curve {x}"))),
    }
}

fn curve_name(nid: Nid) -> Result<&'static str, Error> {
    match nid {
        Nid::X9_62_PRIME256V1 => Ok("P-256"),
        Nid::SECP384R1 => Ok("P-384"),
        Nid::SECP521R1 => Ok("P-521"),
        _ => Err(Error::Syntax("JWK: unsupported curve".to_string())),
    }
}

impl Jwk {
    pub fn is_rsa(&self) -> bool {
        matches!(self.kty.as_str(), "RSA" | "RSA-HSM")
    }

    pub fn is_ec(&self) -> bool {
        matches!(self.kty.as_str(), "EC" | "EC-HSM")
    }

    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Private JWK for an RSA or EC key
    pub fn from_private_key(key: &PKeyRef<Private>) -> Result<Jwk, Error> {
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa().map_err(crypto)?;

                let opt = |v: Option<&BigNumRef>, what: &str| {
                    v.map(b64)
                        .ok_or_else(|| Error::Internal(format!("RSA key lacks {what}")))
                };

                Ok(Jwk {
                    kty: "RSA".to_string(),
                    n: Some(b64(rsa.n())),
                    e: Some(b64(rsa.e())),
                    d: Some(b64(rsa.d())),
                    p: Some(opt(rsa.p(), "p")?),
                    q: Some(opt(rsa.q(), "q")?),
                    dp: Some(opt(rsa.dmp1(), "dp")?),
                    dq: Some(opt(rsa.dmq1(), "dq")?),
                    qi: Some(opt(rsa.iqmp(), "qi")?),
                    ..Default::default()
                })
            }
            Id::EC => {
                let ec = key.ec_key().map_err(crypto)?;
                let mut j = Self::ec_public(&ec)?;
                let (_, len) = curve(j.crv.as_deref().unwrap_or_default())?;
                j.d = Some(b64_padded(ec.private_key(), len)?);
                Ok(j)
            }
            _ => Err(Error::Syntax("JWK: unsupported key type".to_string())),
        }
    }

    fn ec_public<T: openssl::pkey::HasPublic>(ec: &EcKey<T>) -> Result<Jwk, Error> {
        let group = ec.group();
        let nid = group
            .curve_name()
            .ok_or_else(|| Error::Syntax("JWK: unnamed curve".to_string()))?;
        let crv = curve_name(nid)?;
        let (_, len) = curve(crv)?;

        let mut ctx = BigNumContext::new().map_err(crypto)?;
        let mut x = BigNum::new().map_err(crypto)?;
        let mut y = BigNum::new().map_err(crypto)?;
        ec.public_key()
            .affine_coordinates(group, &mut x, &mut y, &mut ctx)
            .map_err(crypto)?;

        Ok(Jwk {
            kty: "EC".to_string(),
            crv: Some(crv.to_string()),
            x: Some(b64_padded(&x, len)?),
            y: Some(b64_padded(&y, len)?),
            ..Default::default()
        })
    }

    /// The same key with every private parameter removed
    pub fn to_public(&self) -> Jwk {
        Jwk {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            key_ops: self.key_ops.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            crv: self.crv.clone(),
            x: self.x.clone(),
            y: self.y.clone(),
            ..Default::default()
        }
    }

    pub fn to_public_key(&self) -> Result<PKey<Public>, Error> {
        if self.is_rsa() {
            let rsa = Rsa::from_public_components(bn(&self.n, "n")?, bn(&self.e, "e")?)
                .map_err(crypto)?;
            PKey::from_rsa(rsa).map_err(crypto)
        } else if self.is_ec() {
            let ec = self.ec_public_key()?;
            PKey::from_ec_key(ec).map_err(crypto)
        } else {
            Err(Error::Syntax(format!("JWK: unsupported kty {}", self.kty)))
        }
    }

    fn ec_public_key(&self) -> Result<EcKey<Public>, Error> {
        let (nid, _) = curve(
            self.crv
                .as_deref()
                .ok_or_else(|| Error::Syntax("JWK: missing crv".to_string()))?,
        )?;
        let group = EcGroup::from_curve_name(nid).map_err(crypto)?;

        let x = bn(&self.x, "x")?;
        let y = bn(&self.y, "y")?;
        EcKey::from_public_key_affine_coordinates(&group, &x, &y)
            .map_err(crypto)
    }

    pub fn to_private_key(&self) -> Result<PKey<Private>, Error> {
        if self.is_rsa() {
            let rsa = Rsa::from_private_components(
                bn(&self.n, "n")?,
                bn(&self.e, "e")?,
                bn(&self.d, "d")?,
                bn(&self.p, "p")?,
                bn(&self.q, "q")?,
                bn(&self.dp, "dp")?,
                bn(&self.dq, "dq")?,
                bn(&self.qi, "qi")?,
            )
            .map_err(crypto)?;
            PKey::from_rsa(rsa).map_err(crypto)
        } else if self.is_ec() {
            let public = self.ec_public_key()?;
            let d = bn(&self.d, "d")?;
            let ec = EcKey::from_private_components(
                public.group(),
                &d,
                public.public_key(),
            )
            .map_err(crypto)?;
            ec.check_key().map_err(crypto)?;
            PKey::from_ec_key(ec).map_err(crypto)
        } else {
            Err(Error::Syntax(format!("JWK: unsupported kty {}", self.kty)))
        }
    }
}
