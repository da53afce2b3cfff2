//! Authentication Information retrieval
//!
//! Fetches EPS authentication vectors from the HSS for the Authentication
//! procedure, either initially or to resynchronise SQN after a SYNCH
//! FAILURE, and feeds the answer back into Authentication.

use ogs_nas::eps::EmmCause;

use crate::context::{next_eksi, AuthVector, EmmContext, MAX_EPS_AUTH_VECTORS};
use crate::emm_auth;
use crate::emm_proc::{AuthInfoProc, ProcedureKind};
use crate::emm_reg;
use crate::emm_sap::{AuthInfoRequest, EmmCnPrimitive};
use crate::emm_sm::EmmEnv;
use crate::error::{EmmError, EmmResult};
use crate::timer::TimerEpoch;

/// Auth-Info record of the UE, created and linked under Authentication
/// when missing.
pub fn get_or_create(ctx: &mut EmmContext) -> &mut AuthInfoProc {
    let ue_id = ctx.ue_id;
    if let Some(auth) = ctx.procedures.auth.as_mut() {
        auth.common.child = Some(ProcedureKind::AuthInfo);
    }
    ctx.procedures
        .auth_info
        .get_or_insert_with(|| AuthInfoProc::new(ue_id))
}

/// Send an Authentication Information Request and arm the guard timer.
///
/// The first request of a record is the initial one; any later request on
/// the same record is a resynchronisation.
pub fn request(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let imsi = ctx.imsi.clone().ok_or(EmmError::MissingImsi { ue_id })?;
    let visited_plmn = ctx.originating_plmn;
    let dcnr = ctx.dcnr_supported;
    let proc = ctx
        .procedures
        .auth_info
        .as_mut()
        .ok_or(EmmError::ProcedureNotFound {
            ue_id,
            kind: ProcedureKind::AuthInfo,
        })?;

    let is_initial = !proc.request_sent;
    proc.resync = proc.request_sent;
    proc.request_sent = true;
    proc.nas_cause = None;
    proc.timer.start(
        &env.timers,
        ProcedureKind::AuthInfo,
        ue_id,
        env.config.ts6a_auth_info.duration(),
    );

    log::info!(
        "ue_id={} EMM-PROC - Authentication Information Request [IMSI:{}] (resync={})",
        ue_id,
        imsi,
        proc.resync
    );
    env.sap
        .send_cn(EmmCnPrimitive::AuthInfoRequest(AuthInfoRequest {
            ue_id,
            imsi,
            visited_plmn,
            nb_vectors: env.config.auth_vectors_per_request,
            is_initial,
            re_synchronization: proc.resync,
            resync_param: if proc.resync { proc.resync_param } else { None },
            dcnr,
        }));
    Ok(())
}

/// Authentication Information Answer carrying vectors.
pub fn on_answer(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    vectors: Vec<AuthVector>,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    if ctx.procedures.auth_info.is_none() {
        log::warn!("ue_id={} Authentication Information Answer without request", ue_id);
        return Ok(());
    }
    ctx.procedures.delete(ProcedureKind::AuthInfo, &env.timers);

    let first = next_eksi(ctx.security.eksi) as usize;
    let nb_vectors = vectors.len().min(MAX_EPS_AUTH_VECTORS);
    for (i, vector) in vectors.into_iter().take(MAX_EPS_AUTH_VECTORS).enumerate() {
        ctx.set_vector(i + first, vector);
    }
    log::info!(
        "ue_id={} EMM-PROC - Authentication Information Answer ({} vectors)",
        ue_id,
        nb_vectors
    );

    if ctx.procedures.auth.is_none() {
        log::warn!("ue_id={} No Authentication waiting for vectors", ue_id);
        if nb_vectors > 0 {
            ctx.set_vectors_present();
        }
        return Ok(());
    }

    if nb_vectors == 0 {
        log::error!("ue_id={} HSS returned no authentication vector", ue_id);
        return emm_reg::reject_with_cause(
            env,
            ctx,
            ProcedureKind::Authentication,
            EmmCause::IllegalUe,
        );
    }

    ctx.set_vectors_present();
    let eksi = ctx
        .find_valid_eksi(next_eksi(ctx.security.eksi))
        .ok_or(EmmError::InvalidKsi {
            ue_id,
            eksi: ctx.security.eksi,
        })?;
    emm_auth::load_challenge(ctx, eksi)?;

    // Leave the state the Authentication procedure may have entered before
    // the new challenge is sent
    emm_reg::common_proc_abort(env, ctx, ProcedureKind::Authentication, false, false)?;
    if let Err(e) = emm_auth::send_challenge(env, ctx) {
        log::error!("ue_id={} Authentication restart failed: {}", ue_id, e);
        return emm_reg::reject_with_cause(
            env,
            ctx,
            ProcedureKind::Authentication,
            EmmCause::IllegalUe,
        );
    }
    Ok(())
}

/// Authentication Information Answer with an error, or no answer at all.
pub fn on_failure(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    cause: Option<EmmCause>,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let Some(proc) = ctx.procedures.auth_info.as_mut() else {
        log::warn!("ue_id={} Authentication Information failure without request", ue_id);
        return Ok(());
    };
    let cause = cause.unwrap_or(EmmCause::NetworkFailure);
    proc.nas_cause = Some(cause);
    log::warn!(
        "ue_id={} EMM-PROC - Authentication Information failure [{:?}]",
        ue_id,
        cause
    );

    ctx.emm_cause = Some(cause);
    ctx.procedures.delete(ProcedureKind::AuthInfo, &env.timers);
    if ctx.procedures.auth.is_some() {
        emm_reg::common_proc_rej(env, ctx, ProcedureKind::Authentication, true, false)?;
    }
    Ok(())
}

/// Guard timer expiry: the HSS did not answer.
pub fn on_timer(env: &mut EmmEnv, ctx: &mut EmmContext, epoch: TimerEpoch) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let Some(proc) = ctx.procedures.auth_info.as_mut() else {
        log::warn!("ue_id={} Stale Auth-Info guard expiry {}", ue_id, epoch);
        return Ok(());
    };
    if !proc.timer.expire(&env.timers, epoch) {
        log::warn!("ue_id={} Stale Auth-Info guard expiry {}", ue_id, epoch);
        return Ok(());
    }
    log::warn!("ue_id={} Authentication Information Answer timeout", ue_id);
    on_failure(env, ctx, None)
}
