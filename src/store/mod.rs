// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The store module holds the interfaces to the durable collaborators of the
//! recovery service (the join policy store, the managed key vault and the
//! secure key release sidecar) together with in-memory implementations.

pub use self::errors::Error;
pub use self::ikeyvault::{
    IKeyVault, ImportKeyRequest, ImportOutcome, KeyAttributes, KeyReleasePolicy, VaultKey,
    IMMUTABLE_POLICY_CONFLICT,
};
pub use self::ipolicystore::{CasOutcome, IPolicyStore, Versioned};
pub use self::isidecar::{ICredential, IReleaseSidecar, ReleaseRequest, ReleaseResponse, StaticCredential};
pub use self::joinpolicy::{JoinPolicy, JoinPolicyDoc};
pub use self::jwk::Jwk;
pub use self::memo_keyvault::MemoKeyVault;
pub use self::memo_policystore::MemoPolicyStore;
pub use self::memo_sidecar::MemoReleaseSidecar;
pub use self::policystore::PolicyStore;
pub use self::releasepolicy::{snp_token_claims, ReleasePolicy};

mod errors;
mod ikeyvault;
mod ipolicystore;
mod isidecar;
mod joinpolicy;
mod jwk;
mod memo_keyvault;
mod memo_policystore;
mod memo_sidecar;
mod policystore;
mod releasepolicy;

pub(crate) use self::errors::poisoned;
