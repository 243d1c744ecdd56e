// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use crate::attestation::base64;
use openssl::cipher::{Cipher, CipherRef};
use openssl::cipher_ctx::{CipherCtx, CipherCtxFlags};
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, Id, PKey, PKeyRef, Private};
use openssl::rsa::Padding;
use serde::{Deserialize, Serialize};

const KEK_LEN: usize = 32;

/// AES key wrap output is at most one semiblock of integrity check value
/// plus one semiblock of padding longer than the input
const KWP_OVERHEAD: usize = 16;

/// A response readable only by the holder of the caller's private key
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedResponse {
    /// base64 `RSA-OAEP(k) || AES-KWP_k(message)`
    pub message: String,
}

fn crypto(e: openssl::error::ErrorStack) -> Error {
    Error::Internal(e.to_string())
}

fn kwp(key: &[u8], input: &[u8], encrypt: bool) -> Result<Vec<u8>, openssl::error::ErrorStack> {
    let cipher: &CipherRef = Cipher::aes_256_wrap_pad();

    let mut ctx = CipherCtx::new()?;
    ctx.set_flags(CipherCtxFlags::FLAG_WRAP_ALLOW);

    if encrypt {
        ctx.encrypt_init(Some(cipher), Some(key), None)?;
    } else {
        ctx.decrypt_init(Some(cipher), Some(key), None)?;
    }

    let mut out = vec![0u8; input.len() + KWP_OVERHEAD];
    let n = ctx.cipher_update(input, Some(&mut out))?;
    out.truncate(n);

    Ok(out)
}

/// RSA-OAEP (SHA-256) encryption, the scheme of member recovery shares
pub fn oaep_encrypt<T: HasPublic>(key: &PKeyRef<T>, input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut enc = Encrypter::new(key).map_err(crypto)?;
    enc.set_rsa_padding(Padding::PKCS1_OAEP).map_err(crypto)?;
    enc.set_rsa_oaep_md(MessageDigest::sha256()).map_err(crypto)?;
    enc.set_rsa_mgf1_md(MessageDigest::sha256()).map_err(crypto)?;

    let mut out = vec![0u8; enc.encrypt_len(input).map_err(crypto)?];
    let n = enc.encrypt(input, &mut out).map_err(crypto)?;
    out.truncate(n);

    Ok(out)
}

/// Inverse of [`oaep_encrypt`]
pub fn oaep_decrypt(key: &PKeyRef<Private>, input: &[u8]) -> Result<Vec<u8>, Error> {
    let mut dec = Decrypter::new(key).map_err(crypto)?;
    dec.set_rsa_padding(Padding::PKCS1_OAEP).map_err(crypto)?;
    dec.set_rsa_oaep_md(MessageDigest::sha256()).map_err(crypto)?;
    dec.set_rsa_mgf1_md(MessageDigest::sha256()).map_err(crypto)?;

    let mut out = vec![0u8; dec.decrypt_len(input).map_err(crypto)?];
    let n = dec
        .decrypt(input, &mut out)
        .map_err(|e| Error::Unwrap(format!("RSA-OAEP: {e}")))?;
    out.truncate(n);

    Ok(out)
}

/// Wrap `msg` for the holder of the RSA key `caller_public_pem`
pub fn wrap_for_caller(msg: &[u8], caller_public_pem: &str) -> Result<Vec<u8>, Error> {
    let key = PKey::public_key_from_pem(caller_public_pem.as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("caller key: {e}")))?;

    if key.id() != Id::RSA {
        return Err(Error::InvalidRequest(
            "caller key: expecting an RSA key".to_string(),
        ));
    }

    let mut kek = [0u8; KEK_LEN];
    openssl::rand::rand_bytes(&mut kek).map_err(crypto)?;

    let mut out = oaep_encrypt(&key, &kek)?;
    out.extend(kwp(&kek, msg, true).map_err(crypto)?);

    Ok(out)
}

/// [`wrap_for_caller`] in its wire form
pub fn wrap_response(msg: &[u8], caller_public_pem: &str) -> Result<WrappedResponse, Error> {
    Ok(WrappedResponse {
        message: base64::encode(&wrap_for_caller(msg, caller_public_pem)?),
    })
}

/// Recover the message wrapped by [`wrap_for_caller`]
pub fn unwrap_message(wrapped: &[u8], key: &PKeyRef<Private>) -> Result<Vec<u8>, Error> {
    let rsa_len = key.size();

    if wrapped.len() <= rsa_len {
        return Err(Error::Unwrap(format!(
            "expecting more than {rsa_len} bytes, got {}",
            wrapped.len()
        )));
    }

    let (head, body) = wrapped.split_at(rsa_len);

    let kek = oaep_decrypt(key, head)?;
    if kek.len() != KEK_LEN {
        return Err(Error::Unwrap(format!(
            "unexpected key encryption key length {}",
            kek.len()
        )));
    }

    kwp(&kek, body, false).map_err(|e| Error::Unwrap(format!("AES-KWP: {e}")))
}

/// [`unwrap_message`] from the wire form
pub fn unwrap_response(resp: &WrappedResponse, key: &PKeyRef<Private>) -> Result<Vec<u8>, Error> {
    let wrapped = base64::decode_str(&resp.message, "message")?;

    unwrap_message(&wrapped, key)
}
