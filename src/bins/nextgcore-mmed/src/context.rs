//! MME EMM Context
//!
//! Per-UE EPS mobility management data: identities, capabilities, the
//! authentication vector cache, the current EPS security context and the
//! registry of running EMM procedures.

use std::fmt;

use bytes::Bytes;
use ogs_nas::common::types::{PlmnId, SecurityAlgorithms};
use ogs_nas::eps::{
    EmmCause, Imei, Imeisv, Imsi, MsNetworkCapability, UeAdditionalSecurityCapability,
    UeNetworkCapability,
};
use ogs_nas::NasResult;

use crate::emm_proc::EmmProcedures;
use crate::nas_security::NasCount;

// ============================================================================
// Constants
// ============================================================================

/// MME UE S1AP ID
pub type MmeUeId = u64;

/// Number of cached EPS authentication vectors
pub const MAX_EPS_AUTH_VECTORS: usize = 5;
/// Largest assignable eKSI
pub const EKSI_MAX_VALUE: u8 = 6;
/// eKSI value meaning "no key available"
pub const KSI_NO_KEY_AVAILABLE: u8 = 7;

pub const AUTH_RAND_SIZE: usize = 16;
pub const AUTH_AUTN_SIZE: usize = 16;
pub const AUTH_AUTS_SIZE: usize = 14;
pub const AUTH_XRES_SIZE: usize = 16;
pub const AUTH_KASME_SIZE: usize = 32;
pub const AUTH_KNAS_SIZE: usize = 16;
/// RAND || AUTS
pub const RESYNC_PARAM_SIZE: usize = AUTH_RAND_SIZE + AUTH_AUTS_SIZE;

/// Maximum length of an MME algorithm preference list
pub const OGS_MAX_NUM_OF_ALGORITHM: usize = 8;

/// Next eKSI after `eksi`, wrapping over 0..=EKSI_MAX_VALUE.
pub fn next_eksi(eksi: u8) -> u8 {
    if eksi < KSI_NO_KEY_AVAILABLE {
        (eksi + 1) % (EKSI_MAX_VALUE + 1)
    } else {
        0
    }
}

// ============================================================================
// Context members
// ============================================================================

pub const EMM_CTXT_MEMBER_IMSI: u32 = 1 << 0;
pub const EMM_CTXT_MEMBER_IMEI: u32 = 1 << 1;
pub const EMM_CTXT_MEMBER_IMEISV: u32 = 1 << 2;
pub const EMM_CTXT_MEMBER_SECURITY: u32 = 1 << 3;
pub const EMM_CTXT_MEMBER_AUTH_VECTORS: u32 = 1 << 4;
pub const EMM_CTXT_MEMBER_UE_NETWORK_CAPABILITY: u32 = 1 << 5;
pub const EMM_CTXT_MEMBER_MS_NETWORK_CAPABILITY: u32 = 1 << 6;
pub const EMM_CTXT_MEMBER_UE_ADDITIONAL_SECURITY_CAPABILITY: u32 = 1 << 7;
/// Slot `i` is valid when bit `EMM_CTXT_MEMBER_AUTH_VECTOR0 << i` is set
pub const EMM_CTXT_MEMBER_AUTH_VECTOR0: u32 = 1 << 16;

/// Presence and validity bits of the EMM context members.
///
/// "Present" means the value was received; "valid" means it was confirmed
/// (IMSI by authentication or identification, security by SMC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmmMembers {
    present: u32,
    valid: u32,
}

impl EmmMembers {
    pub fn is_present(&self, member: u32) -> bool {
        self.present & member == member
    }

    pub fn is_valid(&self, member: u32) -> bool {
        self.valid & member == member
    }

    pub fn set_present(&mut self, member: u32) {
        self.present |= member;
    }

    pub fn set_valid(&mut self, member: u32) {
        self.present |= member;
        self.valid |= member;
    }

    pub fn clear_present(&mut self, member: u32) {
        self.present &= !member;
        self.valid &= !member;
    }

    pub fn clear_valid(&mut self, member: u32) {
        self.valid &= !member;
    }
}

// ============================================================================
// Authentication vectors
// ============================================================================

/// EPS authentication vector received from the HSS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthVector {
    /// KASME
    pub kasme: [u8; AUTH_KASME_SIZE],
    /// Random challenge
    pub rand: [u8; AUTH_RAND_SIZE],
    /// Authentication token
    pub autn: [u8; AUTH_AUTN_SIZE],
    /// Expected response
    pub xres: [u8; AUTH_XRES_SIZE],
    /// Significant bytes of `xres`
    pub xres_size: usize,
}

impl AuthVector {
    pub fn xres(&self) -> &[u8] {
        &self.xres[..self.xres_size.min(AUTH_XRES_SIZE)]
    }
}

// ============================================================================
// EPS security context
// ============================================================================

/// Type of the current EPS security context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityContextType {
    #[default]
    NotAvailable,
    PartialNative,
    FullNative,
    Mapped,
}

/// Current EPS security context (TS 33.401 Section 3.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmmSecurityContext {
    /// Context type
    pub sc_type: SecurityContextType,
    /// Key set identifier of the active vector
    pub eksi: u8,
    /// Vector the NAS keys are derived from
    pub vector_index: Option<usize>,
    /// NAS integrity key
    pub knas_int: [u8; AUTH_KNAS_SIZE],
    /// NAS ciphering key
    pub knas_enc: [u8; AUTH_KNAS_SIZE],
    /// Downlink NAS COUNT
    pub dl_count: NasCount,
    /// Uplink NAS COUNT
    pub ul_count: NasCount,
    /// Uplink NAS COUNT used for the KeNB derivation
    pub kenb_ul_count: NasCount,
    /// Selected NAS algorithms
    pub selected_algorithms: SecurityAlgorithms,
    /// Keys were derived by a Security Mode Command not yet completed
    pub is_new: bool,
}

impl Default for EmmSecurityContext {
    fn default() -> Self {
        Self {
            sc_type: SecurityContextType::NotAvailable,
            eksi: KSI_NO_KEY_AVAILABLE,
            vector_index: None,
            knas_int: [0; AUTH_KNAS_SIZE],
            knas_enc: [0; AUTH_KNAS_SIZE],
            dl_count: NasCount::default(),
            ul_count: NasCount::default(),
            kenb_ul_count: NasCount::default(),
            selected_algorithms: SecurityAlgorithms::default(),
            is_new: false,
        }
    }
}

// ============================================================================
// EMM state
// ============================================================================

/// EMM state of a UE as seen by the network (TS 24.301 Section 5.1.3.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmmState {
    #[default]
    Deregistered,
    Registered,
    CommonProcedureInitiated,
    DeregisteredInitiated,
}

impl fmt::Display for EmmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmmState::Deregistered => write!(f, "EMM-DEREGISTERED"),
            EmmState::Registered => write!(f, "EMM-REGISTERED"),
            EmmState::CommonProcedureInitiated => write!(f, "EMM-COMMON-PROCEDURE-INITIATED"),
            EmmState::DeregisteredInitiated => write!(f, "EMM-DEREGISTERED-INITIATED"),
        }
    }
}

// ============================================================================
// EMM context
// ============================================================================

/// EMM context of one UE
#[derive(Debug, Default)]
pub struct EmmContext {
    /// MME UE S1AP ID
    pub ue_id: MmeUeId,
    /// Current EMM state
    state: EmmState,
    /// Presence and validity of the members below
    pub members: EmmMembers,

    pub imsi: Option<Imsi>,
    pub imei: Option<Imei>,
    pub imeisv: Option<Imeisv>,
    /// The attach request carried the IMSI as initial identity
    pub is_initial_identity_imsi: bool,

    pub ue_network_capability: UeNetworkCapability,
    pub ms_network_capability: MsNetworkCapability,
    pub ue_additional_security_capability: UeAdditionalSecurityCapability,
    /// UE supports NR as secondary RAT
    pub dcnr_supported: bool,
    /// PLMN of the TAI the UE attached from
    pub originating_plmn: PlmnId,

    /// Cached authentication vectors, indexed by eKSI modulo the array size
    pub vectors: [AuthVector; MAX_EPS_AUTH_VECTORS],
    /// Current EPS security context
    pub security: EmmSecurityContext,

    /// Cause reported to the owner of a failed procedure
    pub emm_cause: Option<EmmCause>,
    /// IMEISV still to be retrieved once security is established
    pub initiate_identity_after_smc: bool,

    /// Running EMM procedures
    pub procedures: EmmProcedures,
}

impl EmmContext {
    pub fn new(ue_id: MmeUeId) -> Self {
        Self {
            ue_id,
            ..Default::default()
        }
    }

    pub fn state(&self) -> EmmState {
        self.state
    }

    pub fn set_state(&mut self, state: EmmState) {
        if self.state != state {
            log::debug!("ue_id={} EMM state {} -> {}", self.ue_id, self.state, state);
        }
        self.state = state;
    }

    pub fn set_imsi(&mut self, imsi: Imsi, valid: bool) {
        self.imsi = Some(imsi);
        if valid {
            self.members.set_valid(EMM_CTXT_MEMBER_IMSI);
        } else {
            self.members.clear_valid(EMM_CTXT_MEMBER_IMSI);
            self.members.set_present(EMM_CTXT_MEMBER_IMSI);
        }
    }

    pub fn is_imsi_valid(&self) -> bool {
        self.imsi.is_some() && self.members.is_valid(EMM_CTXT_MEMBER_IMSI)
    }

    pub fn set_imei(&mut self, imei: Imei) {
        self.imei = Some(imei);
        self.members.set_valid(EMM_CTXT_MEMBER_IMEI);
    }

    pub fn set_imeisv(&mut self, imeisv: Imeisv) {
        self.imeisv = Some(imeisv);
        self.members.set_valid(EMM_CTXT_MEMBER_IMEISV);
    }

    /// Decode and store the UE network capability IE (length-prefixed).
    pub fn set_ue_network_capability_ie(&mut self, ie: &[u8]) -> NasResult<()> {
        let mut buf = Bytes::copy_from_slice(ie);
        self.ue_network_capability = UeNetworkCapability::decode(&mut buf)?;
        self.members.set_valid(EMM_CTXT_MEMBER_UE_NETWORK_CAPABILITY);
        Ok(())
    }

    /// Decode and store the MS network capability IE (length-prefixed).
    pub fn set_ms_network_capability_ie(&mut self, ie: &[u8]) -> NasResult<()> {
        let mut buf = Bytes::copy_from_slice(ie);
        self.ms_network_capability = MsNetworkCapability::decode(&mut buf)?;
        self.members.set_valid(EMM_CTXT_MEMBER_MS_NETWORK_CAPABILITY);
        Ok(())
    }

    /// Decode and store the UE additional security capability IE (length-prefixed).
    pub fn set_ue_additional_security_capability_ie(&mut self, ie: &[u8]) -> NasResult<()> {
        let mut buf = Bytes::copy_from_slice(ie);
        self.ue_additional_security_capability = UeAdditionalSecurityCapability::decode(&mut buf)?;
        self.members
            .set_valid(EMM_CTXT_MEMBER_UE_ADDITIONAL_SECURITY_CAPABILITY);
        Ok(())
    }

    pub fn has_additional_security_capability(&self) -> bool {
        self.members
            .is_present(EMM_CTXT_MEMBER_UE_ADDITIONAL_SECURITY_CAPABILITY)
    }

    // ------------------------------------------------------------------------
    // Authentication vectors
    // ------------------------------------------------------------------------

    pub fn is_vector_valid(&self, index: usize) -> bool {
        index < MAX_EPS_AUTH_VECTORS
            && self.members.is_valid(EMM_CTXT_MEMBER_AUTH_VECTOR0 << index)
    }

    pub fn set_vector(&mut self, index: usize, vector: AuthVector) {
        let index = index % MAX_EPS_AUTH_VECTORS;
        self.vectors[index] = vector;
        self.members.set_valid(EMM_CTXT_MEMBER_AUTH_VECTOR0 << index);
    }

    pub fn has_valid_vectors(&self) -> bool {
        self.members.is_valid(EMM_CTXT_MEMBER_AUTH_VECTORS)
            && (0..MAX_EPS_AUTH_VECTORS).any(|i| self.is_vector_valid(i))
    }

    pub fn set_vectors_present(&mut self) {
        self.members.set_valid(EMM_CTXT_MEMBER_AUTH_VECTORS);
    }

    /// Drop every cached vector.
    pub fn clear_vectors(&mut self) {
        for i in 0..MAX_EPS_AUTH_VECTORS {
            self.members.clear_present(EMM_CTXT_MEMBER_AUTH_VECTOR0 << i);
            self.vectors[i] = AuthVector::default();
        }
        self.members.clear_present(EMM_CTXT_MEMBER_AUTH_VECTORS);
        self.security.vector_index = None;
    }

    /// First eKSI at or after `start` (wrapping over 0..=EKSI_MAX_VALUE)
    /// whose vector slot is valid.
    pub fn find_valid_eksi(&self, start: u8) -> Option<u8> {
        (0..=EKSI_MAX_VALUE).find_map(|offset| {
            let eksi = (start + offset) % (EKSI_MAX_VALUE + 1);
            self.is_vector_valid(eksi as usize % MAX_EPS_AUTH_VECTORS)
                .then_some(eksi)
        })
    }

    /// Vector slot addressed by an eKSI
    pub fn vector_for_eksi(&self, eksi: u8) -> &AuthVector {
        &self.vectors[eksi as usize % MAX_EPS_AUTH_VECTORS]
    }

    pub fn is_security_present(&self) -> bool {
        self.members.is_present(EMM_CTXT_MEMBER_SECURITY)
    }

    pub fn is_security_valid(&self) -> bool {
        self.members.is_valid(EMM_CTXT_MEMBER_SECURITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(seed: u8) -> AuthVector {
        AuthVector {
            kasme: [seed; AUTH_KASME_SIZE],
            rand: [seed; AUTH_RAND_SIZE],
            autn: [seed; AUTH_AUTN_SIZE],
            xres: [seed; AUTH_XRES_SIZE],
            xres_size: 8,
        }
    }

    #[test]
    fn test_next_eksi_wraps() {
        assert_eq!(next_eksi(0), 1);
        assert_eq!(next_eksi(5), 6);
        assert_eq!(next_eksi(EKSI_MAX_VALUE), 0);
        assert_eq!(next_eksi(KSI_NO_KEY_AVAILABLE), 0);
    }

    #[test]
    fn test_members() {
        let mut members = EmmMembers::default();
        members.set_present(EMM_CTXT_MEMBER_IMSI);
        assert!(members.is_present(EMM_CTXT_MEMBER_IMSI));
        assert!(!members.is_valid(EMM_CTXT_MEMBER_IMSI));
        members.set_valid(EMM_CTXT_MEMBER_IMSI);
        assert!(members.is_valid(EMM_CTXT_MEMBER_IMSI));
        members.clear_valid(EMM_CTXT_MEMBER_IMSI);
        assert!(members.is_present(EMM_CTXT_MEMBER_IMSI));
        members.clear_present(EMM_CTXT_MEMBER_IMSI);
        assert!(!members.is_present(EMM_CTXT_MEMBER_IMSI));
    }

    #[test]
    fn test_vector_slots() {
        let mut ctx = EmmContext::new(1);
        assert!(!ctx.has_valid_vectors());
        assert_eq!(ctx.find_valid_eksi(0), None);

        ctx.set_vector(3, vector(3));
        ctx.set_vectors_present();
        assert!(ctx.has_valid_vectors());
        assert_eq!(ctx.find_valid_eksi(0), Some(3));
        assert_eq!(ctx.find_valid_eksi(4), Some(3));
        assert_eq!(ctx.find_valid_eksi(6), Some(3));
        assert_eq!(ctx.vector_for_eksi(3).rand, [3u8; AUTH_RAND_SIZE]);
        assert_eq!(ctx.vectors[3].xres(), &[3u8; 8]);

        ctx.security.vector_index = Some(3);
        ctx.clear_vectors();
        assert!(!ctx.has_valid_vectors());
        assert!(!ctx.is_vector_valid(3));
        assert_eq!(ctx.security.vector_index, None);
    }

    #[test]
    fn test_set_vector_index_modulo() {
        let mut ctx = EmmContext::new(1);
        ctx.set_vector(6, vector(6));
        assert!(ctx.is_vector_valid(1));
        // eKSI 5 and 6 share slots 0 and 1
        assert_eq!(ctx.find_valid_eksi(5), Some(6));
        assert_eq!(ctx.find_valid_eksi(0), Some(1));
    }

    #[test]
    fn test_imsi_validity() {
        let mut ctx = EmmContext::new(1);
        ctx.set_imsi(Imsi::parse("001010000000001").unwrap(), false);
        assert!(!ctx.is_imsi_valid());
        assert!(ctx.members.is_present(EMM_CTXT_MEMBER_IMSI));
        ctx.set_imsi(Imsi::parse("001010000000001").unwrap(), true);
        assert!(ctx.is_imsi_valid());
    }

    #[test]
    fn test_capability_ies() {
        let mut ctx = EmmContext::new(1);
        ctx.set_ue_network_capability_ie(&[0x02, 0xE0, 0x20]).unwrap();
        assert_eq!(ctx.ue_network_capability.eia, 0x20);
        ctx.set_ms_network_capability_ie(&[0x02, 0x80, 0x20]).unwrap();
        assert_eq!(ctx.ms_network_capability.replayed_gea(), 0x50);
        assert!(!ctx.has_additional_security_capability());
        ctx.set_ue_additional_security_capability_ie(&[0x04, 0x80, 0x00, 0x80, 0x00])
            .unwrap();
        assert!(ctx.has_additional_security_capability());
        assert!(ctx.set_ue_network_capability_ie(&[0x05, 0xE0]).is_err());
    }

    #[test]
    fn test_default_security_context() {
        let sec = EmmSecurityContext::default();
        assert_eq!(sec.eksi, KSI_NO_KEY_AVAILABLE);
        assert_eq!(sec.sc_type, SecurityContextType::NotAvailable);
        assert_eq!(sec.vector_index, None);
    }
}
