//! EMM Error Types
//!
//! Errors returned by the EMM common procedures. Every variant is a
//! contract violation: the caller asked for something the procedure state
//! does not allow. Protocol failures (RES mismatch, blocked IMEI, ...) are
//! never errors; they are routed to a reject through the SAP.

use ogs_crypt::KdfError;
use ogs_nas::eps::IdentityType2;
use ogs_nas::NasError;
use thiserror::Error;

use crate::context::{EmmState, MmeUeId};
use crate::emm_proc::ProcedureKind;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmmError {
    #[error("UE context not found: ue_id={0}")]
    UeNotFound(MmeUeId),

    #[error("ue_id={ue_id} {kind} not allowed in EMM state {state}")]
    IllegalState {
        ue_id: MmeUeId,
        kind: ProcedureKind,
        state: EmmState,
    },

    #[error("ue_id={ue_id} {kind} procedure already running")]
    ProcedureCollision { ue_id: MmeUeId, kind: ProcedureKind },

    #[error("ue_id={ue_id} {kind} procedure not found")]
    ProcedureNotFound { ue_id: MmeUeId, kind: ProcedureKind },

    #[error("ue_id={ue_id} identity type {identity_type:?} not supported")]
    UnsupportedIdentity {
        ue_id: MmeUeId,
        identity_type: IdentityType2,
    },

    #[error("ue_id={ue_id} invalid eKSI {eksi}")]
    InvalidKsi { ue_id: MmeUeId, eksi: u8 },

    #[error("ue_id={ue_id} IMSI not available")]
    MissingImsi { ue_id: MmeUeId },

    #[error("Key derivation failed: {0}")]
    Kdf(#[from] KdfError),

    #[error("Malformed IE: {0}")]
    Nas(#[from] NasError),
}

pub type EmmResult<T> = Result<T, EmmError>;
