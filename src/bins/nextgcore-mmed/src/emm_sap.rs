//! EMM Service Access Points
//!
//! Outbound primitives of the EMM common procedures, one enum per
//! collaborator:
//!
//! - EMMAS: NAS messages for the access stratum sender
//! - EMMREG: notifications for the owning specific procedure
//! - EMMCN: requests to the core network (HSS, context removal)
//!
//! Procedures queue primitives on [`EmmSap`]; the task drains the queue
//! into an [`EmmSapDispatcher`] after each event.

use std::collections::VecDeque;
use std::fmt;

use ogs_nas::common::types::{PlmnId, SecurityAlgorithms};
use ogs_nas::eps::{EmmCause, IdentityType2, Imsi};

use crate::context::{MmeUeId, AUTH_AUTN_SIZE, AUTH_RAND_SIZE, RESYNC_PARAM_SIZE};
use crate::emm_proc::{ProcedureId, ProcedureKind, ReplayedCapabilities};

// ============================================================================
// EMMAS
// ============================================================================

/// SECURITY MODE COMMAND contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityModeCommand {
    pub ue_id: MmeUeId,
    pub ksi: u8,
    pub selected_algorithms: SecurityAlgorithms,
    pub replayed: ReplayedCapabilities,
    pub imeisv_request: bool,
}

/// Messages handed to the access stratum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmAsPrimitive {
    AuthenticationRequest {
        ue_id: MmeUeId,
        ksi: u8,
        rand: [u8; AUTH_RAND_SIZE],
        autn: [u8; AUTH_AUTN_SIZE],
    },
    AuthenticationReject {
        ue_id: MmeUeId,
    },
    IdentityRequest {
        ue_id: MmeUeId,
        identity_type: IdentityType2,
    },
    SecurityModeCommand(SecurityModeCommand),
}

// ============================================================================
// EMMREG
// ============================================================================

/// Outcome report of a common procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonProcNotification {
    pub ue_id: MmeUeId,
    pub kind: ProcedureKind,
    /// Procedure that started it
    pub owner: Option<ProcedureId>,
    /// Completion hook runs
    pub notify: bool,
    /// Procedure record is released
    pub free_proc: bool,
    pub cause: Option<EmmCause>,
}

/// Notifications for the registration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmRegPrimitive {
    CommonProcReq(CommonProcNotification),
    CommonProcCnf(CommonProcNotification),
    CommonProcRej(CommonProcNotification),
    CommonProcAbort(CommonProcNotification),
    /// The attach must be rejected with `cause`
    AttachReject { ue_id: MmeUeId, cause: EmmCause },
    /// The UE must be detached
    DetachRequest { ue_id: MmeUeId },
}

impl EmmRegPrimitive {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommonProcReq(_) => "EMMREG_COMMON_PROC_REQ",
            Self::CommonProcCnf(_) => "EMMREG_COMMON_PROC_CNF",
            Self::CommonProcRej(_) => "EMMREG_COMMON_PROC_REJ",
            Self::CommonProcAbort(_) => "EMMREG_COMMON_PROC_ABORT",
            Self::AttachReject { .. } => "EMMREG_ATTACH_REJ",
            Self::DetachRequest { .. } => "EMMREG_DETACH_REQ",
        }
    }

    /// Notification carried by the common procedure primitives
    pub fn notification(&self) -> Option<&CommonProcNotification> {
        match self {
            Self::CommonProcReq(n)
            | Self::CommonProcCnf(n)
            | Self::CommonProcRej(n)
            | Self::CommonProcAbort(n) => Some(n),
            _ => None,
        }
    }
}

// ============================================================================
// EMMCN
// ============================================================================

/// S6a Authentication Information Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfoRequest {
    pub ue_id: MmeUeId,
    pub imsi: Imsi,
    pub visited_plmn: PlmnId,
    pub nb_vectors: u8,
    pub is_initial: bool,
    pub re_synchronization: bool,
    /// RAND || AUTS
    pub resync_param: Option<[u8; RESYNC_PARAM_SIZE]>,
    /// UE supports NR as secondary RAT
    pub dcnr: bool,
}

/// Requests to the core network side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmCnPrimitive {
    AuthInfoRequest(AuthInfoRequest),
    ImplicitDetachUe { ue_id: MmeUeId },
}

// ============================================================================
// SAP queue
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmSapPrimitive {
    As(EmmAsPrimitive),
    Reg(EmmRegPrimitive),
    Cn(EmmCnPrimitive),
}

impl fmt::Display for EmmSapPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::As(EmmAsPrimitive::AuthenticationRequest { .. }) => write!(f, "EMMAS_AUTH_REQ"),
            Self::As(EmmAsPrimitive::AuthenticationReject { .. }) => write!(f, "EMMAS_AUTH_REJ"),
            Self::As(EmmAsPrimitive::IdentityRequest { .. }) => write!(f, "EMMAS_IDENT_REQ"),
            Self::As(EmmAsPrimitive::SecurityModeCommand(_)) => write!(f, "EMMAS_SECURITY_REQ"),
            Self::Reg(prim) => f.write_str(prim.name()),
            Self::Cn(EmmCnPrimitive::AuthInfoRequest(_)) => write!(f, "EMMCN_AUTHENTICATION_PARAM_REQ"),
            Self::Cn(EmmCnPrimitive::ImplicitDetachUe { .. }) => write!(f, "EMMCN_IMPLICIT_DETACH_UE"),
        }
    }
}

/// Receiver of drained primitives
pub trait EmmSapDispatcher {
    fn emm_as(&mut self, primitive: EmmAsPrimitive);
    fn emm_reg(&mut self, primitive: EmmRegPrimitive);
    fn emm_cn(&mut self, primitive: EmmCnPrimitive);
}

/// Outbound primitive queue
#[derive(Debug, Default)]
pub struct EmmSap {
    queue: VecDeque<EmmSapPrimitive>,
}

impl EmmSap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_as(&mut self, primitive: EmmAsPrimitive) {
        self.push(EmmSapPrimitive::As(primitive));
    }

    pub fn send_reg(&mut self, primitive: EmmRegPrimitive) {
        self.push(EmmSapPrimitive::Reg(primitive));
    }

    pub fn send_cn(&mut self, primitive: EmmCnPrimitive) {
        self.push(EmmSapPrimitive::Cn(primitive));
    }

    fn push(&mut self, primitive: EmmSapPrimitive) {
        log::trace!("EMM-SAP - {}", primitive);
        self.queue.push_back(primitive);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take every queued primitive in emission order.
    pub fn drain(&mut self) -> Vec<EmmSapPrimitive> {
        self.queue.drain(..).collect()
    }

    /// Deliver every queued primitive to `dispatcher`.
    pub fn dispatch_all(&mut self, dispatcher: &mut dyn EmmSapDispatcher) {
        while let Some(primitive) = self.queue.pop_front() {
            match primitive {
                EmmSapPrimitive::As(p) => dispatcher.emm_as(p),
                EmmSapPrimitive::Reg(p) => dispatcher.emm_reg(p),
                EmmSapPrimitive::Cn(p) => dispatcher.emm_cn(p),
            }
        }
    }
}

/// Dispatcher that only logs, for running the engine without transport
#[derive(Debug, Default)]
pub struct LoggingSapDispatcher;

impl EmmSapDispatcher for LoggingSapDispatcher {
    fn emm_as(&mut self, primitive: EmmAsPrimitive) {
        log::info!("EMMAS {:?}", primitive);
    }

    fn emm_reg(&mut self, primitive: EmmRegPrimitive) {
        log::info!("{} {:?}", primitive.name(), primitive);
    }

    fn emm_cn(&mut self, primitive: EmmCnPrimitive) {
        log::info!("EMMCN {:?}", primitive);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        as_count: usize,
        reg: Vec<&'static str>,
        cn_count: usize,
    }

    impl EmmSapDispatcher for Recorder {
        fn emm_as(&mut self, _primitive: EmmAsPrimitive) {
            self.as_count += 1;
        }
        fn emm_reg(&mut self, primitive: EmmRegPrimitive) {
            self.reg.push(primitive.name());
        }
        fn emm_cn(&mut self, _primitive: EmmCnPrimitive) {
            self.cn_count += 1;
        }
    }

    #[test]
    fn test_sap_queue_order() {
        let mut sap = EmmSap::new();
        sap.send_as(EmmAsPrimitive::AuthenticationReject { ue_id: 1 });
        sap.send_reg(EmmRegPrimitive::DetachRequest { ue_id: 1 });
        sap.send_cn(EmmCnPrimitive::ImplicitDetachUe { ue_id: 1 });
        assert_eq!(sap.len(), 3);

        let drained = sap.drain();
        assert!(sap.is_empty());
        assert_eq!(drained[0].to_string(), "EMMAS_AUTH_REJ");
        assert_eq!(drained[1].to_string(), "EMMREG_DETACH_REQ");
        assert_eq!(drained[2].to_string(), "EMMCN_IMPLICIT_DETACH_UE");
    }

    #[test]
    fn test_dispatch_all() {
        let mut sap = EmmSap::new();
        sap.send_as(EmmAsPrimitive::IdentityRequest {
            ue_id: 1,
            identity_type: IdentityType2::Imsi,
        });
        sap.send_reg(EmmRegPrimitive::AttachReject {
            ue_id: 1,
            cause: EmmCause::ImeiNotAccepted,
        });
        sap.send_cn(EmmCnPrimitive::ImplicitDetachUe { ue_id: 1 });

        let mut recorder = Recorder::default();
        sap.dispatch_all(&mut recorder);
        assert_eq!(recorder.as_count, 1);
        assert_eq!(recorder.reg, vec!["EMMREG_ATTACH_REJ"]);
        assert_eq!(recorder.cn_count, 1);
        assert!(sap.is_empty());
    }

    #[test]
    fn test_reg_notification() {
        let n = CommonProcNotification {
            ue_id: 7,
            kind: ProcedureKind::Identification,
            owner: None,
            notify: true,
            free_proc: true,
            cause: None,
        };
        assert_eq!(EmmRegPrimitive::CommonProcCnf(n).notification(), Some(&n));
        assert!(EmmRegPrimitive::DetachRequest { ue_id: 7 }.notification().is_none());
    }
}
