// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Recovery member workflows.
//!
//! A recovery agent running in an attested instance asks the
//! [`RecoveryCoordinator`] to generate a member, then to produce the signed
//! governance messages that activate it and, after a disaster, submit its
//! recovery share.  Each request is a signed envelope and each response is
//! wrapped for the requesting agent's key; the agent relays the messages to
//! the ledger itself.

pub use self::coordinator::{encryption_kid, signing_kid, RecoveryCoordinator, TAG_MEMBER};
pub use self::errors::Error;
pub use self::ledger::{ILedgerClient, LedgerMember, LedgerMemberStatus, MemoLedger, ServiceState};
pub use self::messages::{
    AckPayload, ActivateMemberAckRequest, ActivateMemberRequest, GenerateMemberRequest,
    GovMessage, GovMessageType, MemberIdentity, MemberStatus, RecoverySharePayload,
    ServiceReport, SubmitRecoveryShareRequest, HEADER_MSG_CREATED_AT, HEADER_MSG_TYPE,
};

mod coordinator;
mod errors;
mod ledger;
mod messages;
