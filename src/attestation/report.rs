// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::common::reverse_bytes;
use super::errors::Error;
use bitmask::*;
use zerocopy::byteorder::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of an ABI v2+ SEV-SNP attestation report
pub const REPORT_SIZE: usize = 1184;

/// Offset of the signature field; everything before it is signed
pub const SIGNED_LEN: usize = 0x2A0;

/// The only signature algorithm defined so far: ECDSA P-384 with SHA-384
pub const SIG_ALGO_ECDSA_P384_SHA384: u32 = 1;

const MIN_REPORT_VERSION: u32 = 2;

/// R and S each occupy 72 bytes, of which the first 48 carry the value
const SIG_COMPONENT_LEN: usize = 72;
const SIG_SCALAR_LEN: usize = 48;

pub const POLICY_SMT_ALLOWED: u64 = 0x10000;
pub const POLICY_MIGRATE_MA_ALLOWED: u64 = 0x40000;
pub const POLICY_DEBUG_ALLOWED: u64 = 0x80000;

bitmask! {
    #[derive(Debug)]
    mask GuestPolicy: u64 where flags PolicyFlags {
        SmtAllowed     = 0x10000,
        MigrateAllowed = 0x40000,
        DebugAllowed   = 0x80000,
    }
}

/// Wire layout of the report as produced by the AMD Secure Processor.  See
/// Table 21 "ATTESTATION_REPORT Structure" of the SEV-SNP firmware ABI.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RawReport {
    pub version: U32,               // 0x000
    pub guest_svn: U32,             // 0x004
    pub policy: U64,                // 0x008
    pub family_id: [u8; 16],        // 0x010
    pub image_id: [u8; 16],         // 0x020
    pub vmpl: U32,                  // 0x030
    pub signature_algo: U32,        // 0x034
    pub current_tcb: U64,           // 0x038
    pub platform_info: U64,         // 0x040
    pub flags: U32,                 // 0x048
    pub reserved0: U32,             // 0x04C
    pub report_data: [u8; 64],      // 0x050
    pub measurement: [u8; 48],      // 0x090
    pub host_data: [u8; 32],        // 0x0C0
    pub id_key_digest: [u8; 48],    // 0x0E0
    pub author_key_digest: [u8; 48], // 0x110
    pub report_id: [u8; 32],        // 0x140
    pub report_id_ma: [u8; 32],     // 0x160
    pub reported_tcb: U64,          // 0x180
    pub reserved1: [u8; 24],        // 0x188
    pub chip_id: [u8; 64],          // 0x1A0
    pub committed_tcb: U64,         // 0x1E0
    pub current_version: [u8; 4],   // 0x1E8
    pub committed_version: [u8; 4], // 0x1EC
    pub launch_tcb: U64,            // 0x1F0
    pub reserved2: [u8; 168],       // 0x1F8
    pub signature_r: [u8; 72],      // 0x2A0
    pub signature_s: [u8; 72],      // 0x2E8
    pub reserved3: [u8; 368],       // 0x330
}

/// Security patch levels packed into a TCB_VERSION
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcbVersion {
    pub bootloader: u8,
    pub tee: u8,
    pub snp: u8,
    pub microcode: u8,
}

impl From<u64> for TcbVersion {
    fn from(v: u64) -> Self {
        let b = v.to_le_bytes();

        Self {
            bootloader: b[0],
            tee: b[1],
            snp: b[6],
            microcode: b[7],
        }
    }
}

/// A decoded SEV-SNP attestation report.  Decoding only checks syntax: the
/// signature is not verified here.
#[derive(Debug)]
pub struct SnpReport {
    pub version: u32,
    pub guest_svn: u32,
    pub policy: GuestPolicy,
    pub family_id: [u8; 16],
    pub image_id: [u8; 16],
    pub vmpl: u32,
    pub current_tcb: TcbVersion,
    pub report_data: [u8; 64],
    pub measurement: [u8; 48],
    pub host_data: [u8; 32],
    pub id_key_digest: [u8; 48],
    pub author_key_digest: [u8; 48],
    pub report_id: [u8; 32],
    pub reported_tcb: TcbVersion,
    pub chip_id: [u8; 64],
    pub committed_tcb: TcbVersion,
    pub launch_tcb: TcbVersion,
    /// big-endian R component
    pub signature_r: Vec<u8>,
    /// big-endian S component
    pub signature_s: Vec<u8>,

    signed: Vec<u8>,
}

impl SnpReport {
    /// Decode a raw, binary SEV-SNP attestation report
    pub fn decode(buf: &[u8]) -> Result<SnpReport, Error> {
        if buf.len() != REPORT_SIZE {
            return Err(Error::Format(format!(
                "report: expecting {REPORT_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let raw = RawReport::read_from_bytes(buf)
            .map_err(|_| Error::Format("report: layout mismatch".to_string()))?;

        let version = raw.version.get();
        if version < MIN_REPORT_VERSION {
            return Err(Error::Format(format!(
                "report: unsupported version {version}"
            )));
        }

        let sig_algo = raw.signature_algo.get();
        if sig_algo != SIG_ALGO_ECDSA_P384_SHA384 {
            return Err(Error::Format(format!(
                "report: unknown signature algorithm {sig_algo}"
            )));
        }

        if raw.signature_r.iter().all(|b| *b == 0) || raw.signature_s.iter().all(|b| *b == 0) {
            return Err(Error::Format("report: empty signature".to_string()));
        }

        Ok(SnpReport {
            version,
            guest_svn: raw.guest_svn.get(),
            policy: decode_policy(raw.policy.get()),
            family_id: raw.family_id,
            image_id: raw.image_id,
            vmpl: raw.vmpl.get(),
            current_tcb: raw.current_tcb.get().into(),
            report_data: raw.report_data,
            measurement: raw.measurement,
            host_data: raw.host_data,
            id_key_digest: raw.id_key_digest,
            author_key_digest: raw.author_key_digest,
            report_id: raw.report_id,
            reported_tcb: raw.reported_tcb.get().into(),
            chip_id: raw.chip_id,
            committed_tcb: raw.committed_tcb.get().into(),
            launch_tcb: raw.launch_tcb.get().into(),
            signature_r: reverse_bytes(&raw.signature_r[..SIG_SCALAR_LEN]),
            signature_s: reverse_bytes(&raw.signature_s[..SIG_SCALAR_LEN]),
            signed: buf[..SIGNED_LEN].to_vec(),
        })
    }

    /// The bytes covered by the report signature
    pub fn signed_bytes(&self) -> &[u8] {
        &self.signed
    }

    pub fn debug_allowed(&self) -> bool {
        self.policy.contains(PolicyFlags::DebugAllowed)
    }

    pub fn smt_allowed(&self) -> bool {
        self.policy.contains(PolicyFlags::SmtAllowed)
    }

    pub fn migrate_allowed(&self) -> bool {
        self.policy.contains(PolicyFlags::MigrateAllowed)
    }
}

fn decode_policy(raw: u64) -> GuestPolicy {
    let mut p = GuestPolicy::none();

    let known = [
        (POLICY_SMT_ALLOWED, PolicyFlags::SmtAllowed),
        (POLICY_MIGRATE_MA_ALLOWED, PolicyFlags::MigrateAllowed),
        (POLICY_DEBUG_ALLOWED, PolicyFlags::DebugAllowed),
    ];

    for (bit, flag) in known.iter() {
        if raw & bit != 0 {
            p.set(*flag);
        }
    }

    p
}

/// Place a big-endian ECDSA scalar into its little-endian, zero-padded slot
pub fn encode_scalar(be: &[u8]) -> [u8; SIG_COMPONENT_LEN] {
    let mut slot = [0u8; SIG_COMPONENT_LEN];
    let le = reverse_bytes(be);
    slot[..le.len()].copy_from_slice(&le);
    slot
}
