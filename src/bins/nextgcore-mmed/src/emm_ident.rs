//! Identification procedure (TS 24.301 Section 5.4.4)
//!
//! Requests one identity from the UE. IMSIs are checked against the
//! restricted PLMNs and equipment identities against the blocked IMEI list
//! before they are stored.

use ogs_nas::eps::{EmmCause, IdentityType2, Imei, Imeisv, Imsi};

use crate::context::{EmmContext, EmmState, MmeUeId};
use crate::emm_proc::{CommonProc, IdentProc, ProcHooks, ProcedureId, ProcedureKind};
use crate::emm_reg;
use crate::emm_sap::EmmAsPrimitive;
use crate::emm_sm::{EmmEnv, EmmOutcome};
use crate::error::{EmmError, EmmResult};
use crate::timer::TimerEpoch;

const KIND: ProcedureKind = ProcedureKind::Identification;

/// Identity carried by IDENTITY RESPONSE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    Imsi(Imsi),
    Imei(Imei),
    Imeisv(Imeisv),
    Tmsi(u32),
}

impl MobileIdentity {
    pub fn identity_type(&self) -> IdentityType2 {
        match self {
            Self::Imsi(_) => IdentityType2::Imsi,
            Self::Imei(_) => IdentityType2::Imei,
            Self::Imeisv(_) => IdentityType2::Imeisv,
            Self::Tmsi(_) => IdentityType2::Tmsi,
        }
    }
}

/// Request `identity_type` from the UE on behalf of `owner`.
///
/// A running Identification is reused with the new identity type.
pub fn initiate(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    owner: Option<ProcedureId>,
    identity_type: IdentityType2,
    hooks: ProcHooks,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    if identity_type == IdentityType2::Tmsi {
        return Err(EmmError::UnsupportedIdentity {
            ue_id,
            identity_type,
        });
    }
    let state = ctx.state();
    if !matches!(state, EmmState::Deregistered | EmmState::Registered) {
        return Err(EmmError::IllegalState {
            ue_id,
            kind: KIND,
            state,
        });
    }

    let ident = ctx.procedures.ident.get_or_insert_with(|| {
        IdentProc::new(CommonProc::new(ue_id, owner, hooks, state), identity_type)
    });
    ident.identity_type = identity_type;
    ident.common.retransmission_count = 0;

    log::info!(
        "ue_id={} EMM-PROC - Initiate identification type = {:?}",
        ue_id,
        identity_type
    );
    transmit(env, ue_id, ident);
    emm_reg::common_proc_req(env, ctx, KIND)
}

fn transmit(env: &mut EmmEnv, ue_id: MmeUeId, ident: &mut IdentProc) {
    env.sap.send_as(EmmAsPrimitive::IdentityRequest {
        ue_id,
        identity_type: ident.identity_type,
    });
    ident
        .t3470
        .start(&env.timers, KIND, ue_id, env.config.t3470.duration());
}

/// IDENTITY RESPONSE
pub fn on_response(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    identity: MobileIdentity,
    latency_ms: u64,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let Some(ident) = ctx
        .procedures
        .ident
        .as_mut()
        .filter(|p| p.t3470.is_active())
    else {
        log::warn!("ue_id={} Ignoring IDENTITY RESPONSE (T3470 not running)", ue_id);
        return Ok(());
    };
    if env
        .config
        .congestion_control
        .should_drop(KIND, latency_ms)
    {
        log::warn!(
            "ue_id={} Dropping IDENTITY RESPONSE under congestion ({} ms)",
            ue_id,
            latency_ms
        );
        return Ok(());
    }
    ident.t3470.stop(&env.timers);

    match identity {
        MobileIdentity::Imsi(imsi) => {
            if env.config.is_plmn_restricted(&imsi) {
                log::warn!("ue_id={} IMSI {} from restricted PLMN", ue_id, imsi);
                return emm_reg::attach_reject(env, ctx, KIND, EmmCause::PlmnNotAllowed);
            }
            log::info!("ue_id={} Identified IMSI {}", ue_id, imsi);
            ctx.set_imsi(imsi, true);
        }
        MobileIdentity::Imei(imei) => {
            log::info!("ue_id={} Identified IMEI {}", ue_id, imei);
            ctx.set_imei(imei);
        }
        MobileIdentity::Imeisv(imeisv) => {
            if env.config.is_imei_blocked(&imeisv.digits) {
                log::warn!("ue_id={} IMEISV {} is blocked", ue_id, imeisv);
                return emm_reg::attach_reject(env, ctx, KIND, EmmCause::ImeiNotAccepted);
            }
            log::info!("ue_id={} Identified IMEISV {}", ue_id, imeisv);
            ctx.set_imeisv(imeisv);
        }
        MobileIdentity::Tmsi(_) => {
            return Err(EmmError::UnsupportedIdentity {
                ue_id,
                identity_type: IdentityType2::Tmsi,
            });
        }
    }

    emm_reg::common_proc_cnf(env, ctx, KIND, true, true)
}

/// T3470 expiry: retransmit, or give up after the configured maximum.
pub fn on_timer(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    epoch: TimerEpoch,
) -> EmmResult<EmmOutcome> {
    let ue_id = ctx.ue_id;
    let max_count = env.config.max_count(KIND);
    let Some(ident) = ctx.procedures.ident.as_mut() else {
        log::warn!("ue_id={} Stale T3470 expiry {}", ue_id, epoch);
        return Ok(EmmOutcome::Continue);
    };
    if !ident.t3470.expire(&env.timers, epoch) {
        log::warn!("ue_id={} Stale T3470 expiry {}", ue_id, epoch);
        return Ok(EmmOutcome::Continue);
    }

    ident.common.retransmission_count += 1;
    log::warn!(
        "ue_id={} T3470 timer expired, retransmission counter = {}",
        ue_id,
        ident.common.retransmission_count
    );
    if ident.common.retransmission_count < max_count {
        transmit(env, ue_id, ident);
        return Ok(EmmOutcome::Continue);
    }

    log::warn!("ue_id={} Identification aborted after {} expiries", ue_id, max_count);
    emm_reg::common_proc_abort(env, ctx, KIND, false, true)?;
    ctx.procedures.delete_all(&env.timers);
    Ok(EmmOutcome::ImplicitDetach)
}

/// The IDENTITY REQUEST could not be sent.
pub fn on_lower_layer_failure(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    log::warn!("ue_id={} Identification lower layer failure", ctx.ue_id);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    ctx.procedures.delete_all(&env.timers);
    Ok(())
}

/// The IDENTITY REQUEST was not delivered because of a handover.
pub fn on_non_delivery_ho(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<EmmOutcome> {
    let ue_id = ctx.ue_id;
    log::warn!("ue_id={} Identification not delivered (handover)", ue_id);
    let ident = ctx
        .procedures
        .ident
        .as_mut()
        .ok_or(EmmError::ProcedureNotFound { ue_id, kind: KIND })?;
    ident.t3470.stop(&env.timers);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    Ok(EmmOutcome::ImplicitDetach)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlockedImei, MmeNasConfig, RestrictedPlmn};
    use crate::context::EMM_CTXT_MEMBER_IMEI;
    use crate::emm_proc::SpecificProc;
    use crate::emm_sap::{EmmRegPrimitive, EmmSapPrimitive};
    use ogs_nas::common::types::PlmnId;

    fn setup() -> (EmmEnv, EmmContext) {
        (EmmEnv::new(MmeNasConfig::default()), EmmContext::new(1))
    }

    fn start(env: &mut EmmEnv, ctx: &mut EmmContext, identity_type: IdentityType2) -> EmmResult<()> {
        initiate(
            env,
            ctx,
            Some(ProcedureId::Specific(SpecificProc::Attach)),
            identity_type,
            ProcHooks::owner(),
        )
    }

    fn reg(prims: &[EmmSapPrimitive]) -> Vec<EmmRegPrimitive> {
        prims
            .iter()
            .filter_map(|p| match p {
                EmmSapPrimitive::Reg(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initiate_sends_identity_request() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        let prims = env.sap.drain();
        assert_eq!(
            prims[0],
            EmmSapPrimitive::As(EmmAsPrimitive::IdentityRequest {
                ue_id: 1,
                identity_type: IdentityType2::Imsi
            })
        );
        assert_eq!(ctx.state(), EmmState::CommonProcedureInitiated);
        assert!(ctx.procedures.ident.as_ref().unwrap().t3470.is_active());
    }

    #[test]
    fn test_initiate_tmsi_unsupported() {
        let (mut env, mut ctx) = setup();
        assert_eq!(
            start(&mut env, &mut ctx, IdentityType2::Tmsi),
            Err(EmmError::UnsupportedIdentity {
                ue_id: 1,
                identity_type: IdentityType2::Tmsi
            })
        );
        assert!(env.sap.is_empty());
    }

    #[test]
    fn test_initiate_illegal_state() {
        let (mut env, mut ctx) = setup();
        ctx.set_state(EmmState::CommonProcedureInitiated);
        assert!(matches!(
            start(&mut env, &mut ctx, IdentityType2::Imei),
            Err(EmmError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_imsi_response() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        env.sap.drain();
        let imsi = Imsi::parse("001010000000042").unwrap();
        on_response(&mut env, &mut ctx, MobileIdentity::Imsi(imsi.clone()), 0).unwrap();

        assert_eq!(ctx.imsi, Some(imsi));
        assert!(ctx.is_imsi_valid());
        assert!(ctx.procedures.ident.is_none());
        assert_eq!(ctx.state(), EmmState::Deregistered);
        assert!(matches!(
            reg(&env.sap.drain())[..],
            [EmmRegPrimitive::CommonProcCnf(n)] if n.notify && n.free_proc
        ));
    }

    #[test]
    fn test_imei_response() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imei).unwrap();
        let imei = Imei::parse("490154203237518").unwrap();
        on_response(&mut env, &mut ctx, MobileIdentity::Imei(imei), 0).unwrap();
        assert!(ctx.members.is_valid(EMM_CTXT_MEMBER_IMEI));
    }

    #[test]
    fn test_restricted_plmn_rejects_attach() {
        let (mut env, mut ctx) = setup();
        env.config.restricted_plmn = vec![RestrictedPlmn(PlmnId::parse("999", "70").unwrap())];
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        env.sap.drain();

        let imsi = Imsi::parse("999700000000001").unwrap();
        on_response(&mut env, &mut ctx, MobileIdentity::Imsi(imsi), 0).unwrap();
        assert!(ctx.imsi.is_none());
        let reg = reg(&env.sap.drain());
        assert_eq!(
            reg[0],
            EmmRegPrimitive::AttachReject {
                ue_id: 1,
                cause: EmmCause::PlmnNotAllowed
            }
        );
        assert!(matches!(reg[1], EmmRegPrimitive::CommonProcRej(_)));
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_blocked_imeisv_rejects_attach() {
        let (mut env, mut ctx) = setup();
        env.config.blocked_imei = vec![BlockedImei::try_from("35693803".to_string()).unwrap()];
        start(&mut env, &mut ctx, IdentityType2::Imeisv).unwrap();
        env.sap.drain();

        let imeisv = Imeisv::parse("3569380356438091").unwrap();
        on_response(&mut env, &mut ctx, MobileIdentity::Imeisv(imeisv), 0).unwrap();
        assert!(ctx.imeisv.is_none());
        assert_eq!(ctx.emm_cause, Some(EmmCause::ImeiNotAccepted));
        assert!(reg(&env.sap.drain()).contains(&EmmRegPrimitive::AttachReject {
            ue_id: 1,
            cause: EmmCause::ImeiNotAccepted
        }));
    }

    #[test]
    fn test_duplicate_response_is_ignored() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        let imsi = Imsi::parse("001010000000042").unwrap();
        on_response(&mut env, &mut ctx, MobileIdentity::Imsi(imsi.clone()), 0).unwrap();
        env.sap.drain();

        on_response(&mut env, &mut ctx, MobileIdentity::Imsi(imsi), 0).unwrap();
        assert!(env.sap.is_empty());
    }

    #[test]
    fn test_t3470_retransmits_then_implicit_detach() {
        let (mut env, mut ctx) = setup();
        env.config.t3470.max_count = 3;
        start(&mut env, &mut ctx, IdentityType2::Imei).unwrap();
        env.sap.drain();

        for _ in 1..3 {
            let epoch = ctx.procedures.ident.as_ref().unwrap().t3470.epoch().unwrap();
            assert_eq!(on_timer(&mut env, &mut ctx, epoch).unwrap(), EmmOutcome::Continue);
        }
        let resent = env
            .sap
            .drain()
            .into_iter()
            .filter(|p| matches!(p, EmmSapPrimitive::As(EmmAsPrimitive::IdentityRequest { .. })))
            .count();
        assert_eq!(resent, 2);

        let epoch = ctx.procedures.ident.as_ref().unwrap().t3470.epoch().unwrap();
        assert_eq!(
            on_timer(&mut env, &mut ctx, epoch).unwrap(),
            EmmOutcome::ImplicitDetach
        );
        assert!(ctx.procedures.is_empty());
        assert_eq!(env.timers.armed_count(), 0);
    }

    #[test]
    fn test_lower_layer_failure_deletes_all() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        ctx.procedures.auth_info = Some(crate::emm_proc::AuthInfoProc::new(1));
        on_lower_layer_failure(&mut env, &mut ctx).unwrap();
        assert!(ctx.procedures.is_empty());
        assert_eq!(ctx.state(), EmmState::Deregistered);
    }

    #[test]
    fn test_non_delivery_ho() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx, IdentityType2::Imsi).unwrap();
        assert_eq!(
            on_non_delivery_ho(&mut env, &mut ctx).unwrap(),
            EmmOutcome::ImplicitDetach
        );
        assert_eq!(env.timers.armed_count(), 0);
    }
}
