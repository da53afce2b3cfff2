//! NAS Security Functions
//!
//! NAS COUNT bookkeeping, NAS algorithm negotiation and NAS key derivation
//! for the EPS security context (3GPP TS 33.401).

use ogs_crypt::{ogs_kdf_nas_eps, KdfError, OGS_KDF_NAS_ENC_ALG, OGS_KDF_NAS_INT_ALG};
use ogs_nas::common::types::SecurityAlgorithms;

use crate::context::{AUTH_KASME_SIZE, AUTH_KNAS_SIZE, OGS_MAX_NUM_OF_ALGORITHM};

// ============================================================================
// NAS COUNT
// ============================================================================

/// NAS COUNT (TS 24.301 Section 4.4.3.1): 16-bit overflow, 8-bit sequence
/// number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NasCount {
    /// Overflow counter
    pub overflow: u16,
    /// Sequence number
    pub seq_num: u8,
}

impl NasCount {
    pub fn new(overflow: u16, seq_num: u8) -> Self {
        Self { overflow, seq_num }
    }

    /// 32-bit COUNT input to the NAS ciphers: `0x00 || overflow || sqn`
    pub fn to_u32(&self) -> u32 {
        ((self.overflow as u32) << 8) | (self.seq_num as u32)
    }

    pub fn from_u32(value: u32) -> Self {
        Self {
            overflow: ((value >> 8) & 0xffff) as u16,
            seq_num: (value & 0xff) as u8,
        }
    }

    /// Advance by one message, carrying into the overflow counter.
    pub fn increment(&mut self) {
        let (seq_num, wrapped) = self.seq_num.overflowing_add(1);
        self.seq_num = seq_num;
        if wrapped {
            self.overflow = self.overflow.wrapping_add(1);
        }
    }
}

// ============================================================================
// Algorithm negotiation
// ============================================================================

/// First algorithm of `preference` that the UE advertises in `ue_bitmap`.
///
/// Bit 8 of the bitmap is algorithm 0, bit 7 algorithm 1 and so on. Only the
/// first [`OGS_MAX_NUM_OF_ALGORITHM`] preferences are considered; the null
/// algorithm is chosen when nothing matches.
pub fn select_algorithm(ue_bitmap: u8, preference: &[u8]) -> u8 {
    preference
        .iter()
        .take(OGS_MAX_NUM_OF_ALGORITHM)
        .copied()
        .find(|&alg| alg < 8 && ue_bitmap & (0x80 >> alg) != 0)
        .unwrap_or(0)
}

/// Negotiate NAS integrity and ciphering from the UE EIA/EEA bitmaps.
pub fn select_nas_algorithms(
    ue_eia: u8,
    ue_eea: u8,
    integrity_order: &[u8],
    ciphering_order: &[u8],
) -> SecurityAlgorithms {
    SecurityAlgorithms::new(
        select_algorithm(ue_eea, ciphering_order),
        select_algorithm(ue_eia, integrity_order),
    )
}

// ============================================================================
// Key derivation
// ============================================================================

/// NAS keys derived from KASME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NasKeys {
    pub knas_int: [u8; AUTH_KNAS_SIZE],
    pub knas_enc: [u8; AUTH_KNAS_SIZE],
}

/// Key derivation used by Security Mode Control
pub trait NasKdf: Send + Sync {
    fn derive_nas_keys(
        &self,
        kasme: &[u8; AUTH_KASME_SIZE],
        algorithms: SecurityAlgorithms,
    ) -> Result<NasKeys, KdfError>;
}

/// TS 33.401 Annex A.7 derivation backed by `ogs-crypt`
#[derive(Debug, Clone, Copy, Default)]
pub struct OgsNasKdf;

impl NasKdf for OgsNasKdf {
    fn derive_nas_keys(
        &self,
        kasme: &[u8; AUTH_KASME_SIZE],
        algorithms: SecurityAlgorithms,
    ) -> Result<NasKeys, KdfError> {
        Ok(NasKeys {
            knas_int: ogs_kdf_nas_eps(OGS_KDF_NAS_INT_ALG, algorithms.integrity, kasme)?,
            knas_enc: ogs_kdf_nas_eps(OGS_KDF_NAS_ENC_ALG, algorithms.ciphering, kasme)?,
        })
    }
}
