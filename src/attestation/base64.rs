// SPDX-License-Identifier: Apache-2.0

use base64::{self, engine::general_purpose, Engine as _};

use super::errors::Error;

/// decodes bytes from a standard base64-encoded string
pub fn decode_str(v: &str, what: &str) -> Result<Vec<u8>, Error> {
    general_purpose::STANDARD
        .decode(v.trim())
        .map_err(|e| Error::Format(format!("{what}: {e}")))
}

/// decodes bytes from a base64url-encoded string without padding
pub fn decode_url_str(v: &str, what: &str) -> Result<Vec<u8>, Error> {
    general_purpose::URL_SAFE_NO_PAD
        .decode(v.trim())
        .map_err(|e| Error::Format(format!("{what}: {e}")))
}

/// decodes a base64-encoded UTF-8 text, e.g. a PEM bundle
pub fn decode_text(v: &str, what: &str) -> Result<String, Error> {
    let b = decode_str(v, what)?;

    String::from_utf8(b).map_err(|e| Error::Format(format!("{what}: {e}")))
}

pub fn encode(v: &[u8]) -> String {
    general_purpose::STANDARD.encode(v)
}

pub fn encode_url(v: &[u8]) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(v)
}
