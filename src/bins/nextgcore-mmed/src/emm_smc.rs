//! Security Mode Control procedure (TS 24.301 Section 5.4.3)
//!
//! Takes an EPS security context into use: negotiates NAS algorithms,
//! derives KNASint/KNASenc from KASME and sends SECURITY MODE COMMAND with
//! the replayed UE security capabilities. A reject restores the security
//! context saved when the procedure started.

use ogs_nas::eps::{EmmCause, Imeisv};

use crate::context::{
    EmmContext, MmeUeId, SecurityContextType, EKSI_MAX_VALUE, EMM_CTXT_MEMBER_SECURITY,
    KSI_NO_KEY_AVAILABLE, MAX_EPS_AUTH_VECTORS,
};
use crate::emm_proc::{
    CommonProc, ProcHooks, ProcedureId, ProcedureKind, ReplayedCapabilities, SavedSecurity,
    SmcProc,
};
use crate::emm_reg;
use crate::emm_sap::{EmmAsPrimitive, EmmRegPrimitive, SecurityModeCommand};
use crate::emm_sm::{EmmEnv, EmmOutcome};
use crate::error::{EmmError, EmmResult};
use crate::nas_security::{select_nas_algorithms, NasCount};
use crate::timer::{NasTimer, MmeTimerId, TimerEpoch};

const KIND: ProcedureKind = ProcedureKind::SecurityModeControl;

/// Start Security Mode Control with key set `ksi` on behalf of `owner`.
pub fn initiate(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    owner: Option<ProcedureId>,
    ksi: u8,
    hooks: ProcHooks,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    if ctx.procedures.smc.is_some() {
        return Err(EmmError::ProcedureCollision { ue_id, kind: KIND });
    }
    let ksi = if ksi == KSI_NO_KEY_AVAILABLE { 0 } else { ksi };
    if ksi > EKSI_MAX_VALUE {
        return Err(EmmError::InvalidKsi { ue_id, eksi: ksi });
    }
    if !ctx.is_vector_valid(ksi as usize % MAX_EPS_AUTH_VECTORS) {
        log::error!("ue_id={} No valid vector for KSI = {}", ue_id, ksi);
        return Err(EmmError::InvalidKsi { ue_id, eksi: ksi });
    }

    let algorithms = select_nas_algorithms(
        ctx.ue_network_capability.eia,
        ctx.ue_network_capability.eea,
        &env.config.integrity_order,
        &env.config.ciphering_order,
    );
    let keys = env
        .kdf
        .derive_nas_keys(&ctx.vector_for_eksi(ksi).kasme, algorithms)?;

    let present = ctx.is_security_present();
    let security = &mut ctx.security;
    let saved = SavedSecurity {
        eksi: security.eksi,
        selected_algorithms: security.selected_algorithms,
        dl_count: security.dl_count,
        sc_type: security.sc_type,
        vector_index: security.vector_index,
        is_new: security.is_new,
        present,
    };
    if security.vector_index.is_none() {
        security.vector_index = Some(0);
    }
    security.eksi = ksi;
    security.dl_count = NasCount::default();
    security.selected_algorithms = algorithms;
    security.sc_type = SecurityContextType::FullNative;
    security.knas_int = keys.knas_int;
    security.knas_enc = keys.knas_enc;
    security.is_new = true;
    ctx.members.set_present(EMM_CTXT_MEMBER_SECURITY);

    let replayed = replayed_capabilities(ctx);
    let mut smc = SmcProc {
        common: CommonProc::new(ue_id, owner, hooks, ctx.state()),
        ksi,
        saved,
        replayed,
        imeisv_request: true,
        t3460: NasTimer::new(MmeTimerId::T3460),
    };
    log::info!(
        "ue_id={} EMM-PROC - Initiate security mode control KSI = {} [EEA{} EIA{}]",
        ue_id,
        ksi,
        algorithms.ciphering,
        algorithms.integrity
    );
    transmit(env, ctx, ue_id, &mut smc);
    ctx.procedures.smc = Some(smc);
    emm_reg::common_proc_req(env, ctx, KIND)
}

fn replayed_capabilities(ctx: &EmmContext) -> ReplayedCapabilities {
    let ue = &ctx.ue_network_capability;
    let gea = ctx.ms_network_capability.replayed_gea();
    let nr = ctx
        .has_additional_security_capability()
        .then_some(ctx.ue_additional_security_capability);
    ReplayedCapabilities {
        eea: ue.eea,
        eia: ue.eia,
        uea: ue.uea,
        ucs2: ue.ucs2,
        uia: ue.uia,
        gea,
        umts_present: ue.umts_present,
        gprs_present: gea > 0,
        nr_ea: nr.map(|c| c.ea),
        nr_ia: nr.map(|c| c.ia),
    }
}

fn transmit(env: &mut EmmEnv, ctx: &EmmContext, ue_id: MmeUeId, smc: &mut SmcProc) {
    env.sap
        .send_as(EmmAsPrimitive::SecurityModeCommand(SecurityModeCommand {
            ue_id,
            ksi: smc.ksi,
            selected_algorithms: ctx.security.selected_algorithms,
            replayed: smc.replayed,
            imeisv_request: smc.imeisv_request,
        }));
    smc.t3460
        .start(&env.timers, KIND, ue_id, env.config.t3460.duration());
}

fn awaiting_ue<'a>(ctx: &'a mut EmmContext, message: &str) -> Option<&'a mut SmcProc> {
    let ue_id = ctx.ue_id;
    match ctx.procedures.smc.as_mut() {
        Some(smc) if smc.t3460.is_active() => Some(smc),
        _ => {
            log::warn!("ue_id={} Ignoring {} (T3460 not running)", ue_id, message);
            None
        }
    }
}

/// SECURITY MODE COMPLETE
pub fn on_complete(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    imeisv: Option<Imeisv>,
    latency_ms: u64,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let congestion = env.config.congestion_control;
    let Some(smc) = awaiting_ue(ctx, "SECURITY MODE COMPLETE") else {
        return Ok(());
    };
    if congestion.should_drop(KIND, latency_ms) {
        log::warn!(
            "ue_id={} Dropping SECURITY MODE COMPLETE under congestion ({} ms)",
            ue_id,
            latency_ms
        );
        return Ok(());
    }
    smc.t3460.stop(&env.timers);

    match imeisv {
        None => ctx.initiate_identity_after_smc = true,
        Some(imeisv) if env.config.is_imei_blocked(&imeisv.digits) => {
            log::warn!("ue_id={} IMEISV {} is blocked", ue_id, imeisv);
            return emm_reg::attach_reject(env, ctx, KIND, EmmCause::ImeiNotAccepted);
        }
        Some(imeisv) => ctx.set_imeisv(imeisv),
    }

    if !ctx.is_security_present() {
        log::error!("ue_id={} No security context after SECURITY MODE COMPLETE", ue_id);
        return Ok(());
    }
    ctx.security.kenb_ul_count = ctx.security.ul_count;
    ctx.members.set_valid(EMM_CTXT_MEMBER_SECURITY);
    log::info!("ue_id={} EMM-PROC - Security mode control complete", ue_id);
    emm_reg::common_proc_cnf(env, ctx, KIND, true, true)
}

/// SECURITY MODE REJECT: restore the previous security context, then ask
/// for the UE to be detached.
pub fn on_reject(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let Some(smc) = awaiting_ue(ctx, "SECURITY MODE REJECT") else {
        return Ok(());
    };
    smc.t3460.stop(&env.timers);
    let saved = smc.saved;

    log::warn!("ue_id={} EMM-PROC - Security mode rejected", ue_id);
    ctx.security.eksi = saved.eksi;
    ctx.security.selected_algorithms = saved.selected_algorithms;
    ctx.security.dl_count = saved.dl_count;
    ctx.security.sc_type = saved.sc_type;
    ctx.security.vector_index = saved.vector_index;
    ctx.security.is_new = saved.is_new;
    if !saved.present {
        ctx.members.clear_present(EMM_CTXT_MEMBER_SECURITY);
    }

    ctx.emm_cause = Some(EmmCause::SecurityModeRejected);
    emm_reg::common_proc_rej(env, ctx, KIND, true, false)?;
    env.sap.send_reg(EmmRegPrimitive::DetachRequest { ue_id });
    Ok(())
}

/// T3460 expiry: retransmit, or give up after the configured maximum.
pub fn on_timer(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    epoch: TimerEpoch,
) -> EmmResult<EmmOutcome> {
    let ue_id = ctx.ue_id;
    let max_count = env.config.max_count(KIND);
    let Some(mut smc) = ctx.procedures.smc.take() else {
        log::warn!("ue_id={} Stale T3460 expiry {}", ue_id, epoch);
        return Ok(EmmOutcome::Continue);
    };
    let current = smc.t3460.expire(&env.timers, epoch);
    if current {
        smc.common.retransmission_count += 1;
        log::warn!(
            "ue_id={} T3460 timer expired, retransmission counter = {}",
            ue_id,
            smc.common.retransmission_count
        );
        if smc.common.retransmission_count < max_count {
            transmit(env, ctx, ue_id, &mut smc);
        }
    } else {
        log::warn!("ue_id={} Stale T3460 expiry {}", ue_id, epoch);
    }
    let exhausted = current && smc.common.retransmission_count >= max_count;
    ctx.procedures.smc = Some(smc);

    if !exhausted {
        return Ok(EmmOutcome::Continue);
    }
    log::warn!("ue_id={} Security mode control aborted after {} expiries", ue_id, max_count);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    Ok(EmmOutcome::ImplicitDetach)
}

/// The SECURITY MODE COMMAND could not be sent.
pub fn on_lower_layer_failure(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    log::warn!("ue_id={} Security mode control lower layer failure", ctx.ue_id);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)
}

/// The SECURITY MODE COMMAND was not delivered because of a handover.
pub fn on_non_delivery_ho(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<EmmOutcome> {
    log::warn!("ue_id={} Security mode command not delivered (handover)", ctx.ue_id);
    ctx.security.is_new = false;
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    Ok(EmmOutcome::ImplicitDetach)
}
