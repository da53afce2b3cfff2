//! EMM Procedure Registry
//!
//! Per-UE records of the running EMM common procedures. Each kind has at
//! most one live instance; the Authentication procedure may own one
//! Authentication Information child while vectors are fetched from the HSS.

use std::fmt;

use ogs_nas::common::types::SecurityAlgorithms;
use ogs_nas::eps::{EmmCause, IdentityType2, Imsi};

use crate::context::{
    EmmState, MmeUeId, SecurityContextType, AUTH_AUTN_SIZE, AUTH_RAND_SIZE, KSI_NO_KEY_AVAILABLE,
    RESYNC_PARAM_SIZE,
};
use crate::nas_security::NasCount;
use crate::timer::{MmeTimerId, MmeTimerMgr, NasTimer};

// ============================================================================
// Procedure identifiers
// ============================================================================

/// EMM common procedure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Authentication,
    Identification,
    SecurityModeControl,
    /// Authentication Information retrieval from the HSS
    AuthInfo,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureKind::Authentication => write!(f, "AUTHENTICATION"),
            ProcedureKind::Identification => write!(f, "IDENTIFICATION"),
            ProcedureKind::SecurityModeControl => write!(f, "SECURITY-MODE-CONTROL"),
            ProcedureKind::AuthInfo => write!(f, "AUTHENTICATION-INFO"),
        }
    }
}

/// EMM specific procedures that start common procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecificProc {
    Attach,
}

impl fmt::Display for SpecificProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecificProc::Attach => write!(f, "ATTACH"),
        }
    }
}

/// Owner of a common procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcedureId {
    Specific(SpecificProc),
    Common(ProcedureKind),
}

impl fmt::Display for ProcedureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureId::Specific(p) => p.fmt(f),
            ProcedureId::Common(k) => k.fmt(f),
        }
    }
}

/// Completion hook run by the registration layer when a procedure
/// confirms or rejects with `notify` set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyHook {
    /// Nothing to run
    #[default]
    None,
    /// Report to the owning specific procedure
    Owner,
    /// Authentication resumes after Identification confirmed the IMSI
    AuthImsiCheck,
    /// Authentication rejects after the IMSI could not be confirmed
    AuthImsiCheckFail,
}

/// Success and failure hooks of a common procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcHooks {
    pub success: NotifyHook,
    pub failure: NotifyHook,
}

impl ProcHooks {
    /// Both outcomes are reported to the owner.
    pub fn owner() -> Self {
        Self {
            success: NotifyHook::Owner,
            failure: NotifyHook::Owner,
        }
    }

    pub fn auth_imsi_check() -> Self {
        Self {
            success: NotifyHook::AuthImsiCheck,
            failure: NotifyHook::AuthImsiCheckFail,
        }
    }
}

// ============================================================================
// Procedure records
// ============================================================================

/// Fields shared by every common procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonProc {
    pub ue_id: MmeUeId,
    /// Procedure that started this one
    pub parent: Option<ProcedureId>,
    /// Running child procedure
    pub child: Option<ProcedureKind>,
    /// EMM state to return to when the procedure ends
    pub previous_state: EmmState,
    /// Timer expiries so far
    pub retransmission_count: u32,
    pub hooks: ProcHooks,
}

impl CommonProc {
    pub fn new(
        ue_id: MmeUeId,
        parent: Option<ProcedureId>,
        hooks: ProcHooks,
        previous_state: EmmState,
    ) -> Self {
        Self {
            ue_id,
            parent,
            child: None,
            previous_state,
            retransmission_count: 0,
            hooks,
        }
    }
}

/// Authentication procedure (TS 24.301 Section 5.4.2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthProc {
    pub common: CommonProc,
    /// eKSI of the challenge in flight
    pub ksi: u8,
    pub rand: [u8; AUTH_RAND_SIZE],
    pub autn: [u8; AUTH_AUTN_SIZE],
    /// Consecutive SYNCH FAILURE count
    pub sync_fail_count: u32,
    /// MAC FAILURE count
    pub mac_fail_count: u32,
    /// IMSI the failed challenge was computed for
    pub unchecked_imsi: Option<Imsi>,
    /// Cause that sent the procedure into the IMSI check
    pub imsi_check_cause: Option<EmmCause>,
    pub t3460: NasTimer,
}

impl AuthProc {
    pub fn new(common: CommonProc) -> Self {
        Self {
            common,
            ksi: KSI_NO_KEY_AVAILABLE,
            rand: [0; AUTH_RAND_SIZE],
            autn: [0; AUTH_AUTN_SIZE],
            sync_fail_count: 0,
            mac_fail_count: 0,
            unchecked_imsi: None,
            imsi_check_cause: None,
            t3460: NasTimer::new(MmeTimerId::T3460),
        }
    }
}

/// Identification procedure (TS 24.301 Section 5.4.4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentProc {
    pub common: CommonProc,
    pub identity_type: IdentityType2,
    pub t3470: NasTimer,
}

impl IdentProc {
    pub fn new(common: CommonProc, identity_type: IdentityType2) -> Self {
        Self {
            common,
            identity_type,
            t3470: NasTimer::new(MmeTimerId::T3470),
        }
    }
}

/// Security context values restored when the UE rejects the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedSecurity {
    pub eksi: u8,
    pub selected_algorithms: SecurityAlgorithms,
    pub dl_count: NasCount,
    pub sc_type: SecurityContextType,
    pub vector_index: Option<usize>,
    pub is_new: bool,
    /// SECURITY member was present before the command
    pub present: bool,
}

/// UE security capabilities replayed in SECURITY MODE COMMAND
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayedCapabilities {
    pub eea: u8,
    pub eia: u8,
    pub uea: u8,
    pub ucs2: bool,
    pub uia: u8,
    pub gea: u8,
    pub umts_present: bool,
    pub gprs_present: bool,
    /// 5GS encryption algorithms
    pub nr_ea: Option<u16>,
    /// 5GS integrity algorithms
    pub nr_ia: Option<u16>,
}

/// Security Mode Control procedure (TS 24.301 Section 5.4.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmcProc {
    pub common: CommonProc,
    pub ksi: u8,
    pub saved: SavedSecurity,
    pub replayed: ReplayedCapabilities,
    pub imeisv_request: bool,
    pub t3460: NasTimer,
}

/// Authentication Information retrieval, child of Authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfoProc {
    pub ue_id: MmeUeId,
    pub parent: ProcedureKind,
    /// A request is outstanding or was answered
    pub request_sent: bool,
    /// Current request is a resynchronisation
    pub resync: bool,
    /// RAND || AUTS of the failed challenge
    pub resync_param: Option<[u8; RESYNC_PARAM_SIZE]>,
    /// Cause received from the HSS
    pub nas_cause: Option<EmmCause>,
    pub timer: NasTimer,
}

impl AuthInfoProc {
    pub fn new(ue_id: MmeUeId) -> Self {
        Self {
            ue_id,
            parent: ProcedureKind::Authentication,
            request_sent: false,
            resync: false,
            resync_param: None,
            nas_cause: None,
            timer: NasTimer::new(MmeTimerId::S6aAuthInfo),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Running EMM procedures of one UE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmmProcedures {
    pub auth: Option<AuthProc>,
    pub ident: Option<IdentProc>,
    pub smc: Option<SmcProc>,
    pub auth_info: Option<AuthInfoProc>,
}

impl EmmProcedures {
    pub fn is_running(&self, kind: ProcedureKind) -> bool {
        match kind {
            ProcedureKind::Authentication => self.auth.is_some(),
            ProcedureKind::Identification => self.ident.is_some(),
            ProcedureKind::SecurityModeControl => self.smc.is_some(),
            ProcedureKind::AuthInfo => self.auth_info.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.auth.is_none() && self.ident.is_none() && self.smc.is_none() && self.auth_info.is_none()
    }

    /// Shared record of a common procedure (not Auth-Info)
    pub fn common(&self, kind: ProcedureKind) -> Option<&CommonProc> {
        match kind {
            ProcedureKind::Authentication => self.auth.as_ref().map(|p| &p.common),
            ProcedureKind::Identification => self.ident.as_ref().map(|p| &p.common),
            ProcedureKind::SecurityModeControl => self.smc.as_ref().map(|p| &p.common),
            ProcedureKind::AuthInfo => None,
        }
    }

    pub fn common_mut(&mut self, kind: ProcedureKind) -> Option<&mut CommonProc> {
        match kind {
            ProcedureKind::Authentication => self.auth.as_mut().map(|p| &mut p.common),
            ProcedureKind::Identification => self.ident.as_mut().map(|p| &mut p.common),
            ProcedureKind::SecurityModeControl => self.smc.as_mut().map(|p| &mut p.common),
            ProcedureKind::AuthInfo => None,
        }
    }

    /// Retransmission or guard timer of a procedure
    pub fn timer_mut(&mut self, kind: ProcedureKind) -> Option<&mut NasTimer> {
        match kind {
            ProcedureKind::Authentication => self.auth.as_mut().map(|p| &mut p.t3460),
            ProcedureKind::Identification => self.ident.as_mut().map(|p| &mut p.t3470),
            ProcedureKind::SecurityModeControl => self.smc.as_mut().map(|p| &mut p.t3460),
            ProcedureKind::AuthInfo => self.auth_info.as_mut().map(|p| &mut p.timer),
        }
    }

    /// Stop the timer of a procedure, leaving the record in place.
    pub fn stop_timer(&mut self, kind: ProcedureKind, timers: &MmeTimerMgr) {
        if let Some(timer) = self.timer_mut(kind) {
            timer.stop(timers);
        }
    }

    /// Delete a procedure together with its child. Returns false when no
    /// such procedure was running.
    pub fn delete(&mut self, kind: ProcedureKind, timers: &MmeTimerMgr) -> bool {
        self.stop_timer(kind, timers);
        let child = self.common(kind).and_then(|c| c.child);
        let deleted = match kind {
            ProcedureKind::Authentication => self.auth.take().is_some(),
            ProcedureKind::Identification => self.ident.take().is_some(),
            ProcedureKind::SecurityModeControl => self.smc.take().is_some(),
            ProcedureKind::AuthInfo => {
                if let Some(auth) = self.auth.as_mut() {
                    auth.common.child = None;
                }
                self.auth_info.take().is_some()
            }
        };
        if let Some(child) = child {
            self.delete(child, timers);
        }
        deleted
    }

    /// Delete every running procedure and stop its timer.
    pub fn delete_all(&mut self, timers: &MmeTimerMgr) {
        for kind in [
            ProcedureKind::AuthInfo,
            ProcedureKind::Authentication,
            ProcedureKind::Identification,
            ProcedureKind::SecurityModeControl,
        ] {
            self.delete(kind, timers);
        }
    }
}
