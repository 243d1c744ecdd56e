// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Policy-gated key management.
//!
//! Every key is generated inside an attested instance, imported into the
//! managed vault under an immutable release policy naming that instance's
//! hostData, and published together with evidence binding the public key to
//! the generating instance.  That evidence is re-verified whenever the key
//! is read back.

pub use self::cert::self_signed_cert;
pub use self::errors::Error;
pub use self::keys::{cert_secret_name, report_secret_name, KeyStore, KeyStoreBackends};
pub use self::types::{KeyInfo, KeyType, PrivateKeyInfo, TAG_KEY_TYPE};

mod cert;
mod errors;
mod keys;
mod types;
