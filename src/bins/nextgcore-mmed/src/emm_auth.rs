//! Authentication procedure (TS 24.301 Section 5.4.2)
//!
//! The MME challenges the UE with RAND/AUTN of a cached EPS authentication
//! vector and checks the returned RES against XRES. Vectors are fetched
//! from the HSS when none is cached, and again to resynchronise SQN after
//! a SYNCH FAILURE. Unconfirmed IMSIs are checked with Identification
//! before a failed challenge is rejected.

use ogs_nas::eps::{EmmCause, IdentityType2};

use crate::context::{
    next_eksi, EmmContext, EmmState, MmeUeId, AUTH_AUTN_SIZE, AUTH_AUTS_SIZE, AUTH_RAND_SIZE,
    EKSI_MAX_VALUE, MAX_EPS_AUTH_VECTORS, RESYNC_PARAM_SIZE,
};
use crate::emm_auth_info;
use crate::emm_ident;
use crate::emm_proc::{AuthProc, CommonProc, ProcHooks, ProcedureId, ProcedureKind};
use crate::emm_reg;
use crate::emm_sap::EmmAsPrimitive;
use crate::emm_sm::{EmmEnv, EmmOutcome};
use crate::error::{EmmError, EmmResult};
use crate::timer::TimerEpoch;

const KIND: ProcedureKind = ProcedureKind::Authentication;

/// Challenge supplied by the caller instead of a cached vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthChallenge {
    pub ksi: u8,
    pub rand: [u8; AUTH_RAND_SIZE],
    pub autn: [u8; AUTH_AUTN_SIZE],
}

// ============================================================================
// Initiation
// ============================================================================

/// Start Authentication for `owner`.
///
/// Without a `challenge` the next cached vector after the current eKSI is
/// used; with no valid vector cached, vectors are requested from the HSS
/// first and the challenge is sent once they arrive.
pub fn initiate(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    owner: Option<ProcedureId>,
    hooks: ProcHooks,
    challenge: Option<AuthChallenge>,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let state = ctx.state();
    if !matches!(state, EmmState::Deregistered | EmmState::Registered) {
        return Err(EmmError::IllegalState {
            ue_id,
            kind: KIND,
            state,
        });
    }

    if ctx.procedures.auth.is_none() {
        ctx.procedures.auth = Some(AuthProc::new(CommonProc::new(ue_id, owner, hooks, state)));
    }

    if let Some(challenge) = challenge {
        if challenge.ksi > EKSI_MAX_VALUE {
            return Err(EmmError::InvalidKsi {
                ue_id,
                eksi: challenge.ksi,
            });
        }
        let auth = auth_mut(ctx)?;
        auth.ksi = challenge.ksi;
        auth.rand = challenge.rand;
        auth.autn = challenge.autn;
        return send_challenge(env, ctx);
    }

    if !ctx.has_valid_vectors() {
        let auth_info = emm_auth_info::get_or_create(ctx);
        if auth_info.request_sent {
            log::debug!("ue_id={} Authentication vectors already requested", ue_id);
            return Ok(());
        }
        return emm_auth_info::request(env, ctx);
    }

    let eksi = ctx
        .find_valid_eksi(next_eksi(ctx.security.eksi))
        .ok_or(EmmError::InvalidKsi {
            ue_id,
            eksi: ctx.security.eksi,
        })?;
    load_challenge(ctx, eksi)?;
    send_challenge(env, ctx)
}

/// Load RAND/AUTN of the vector addressed by `eksi` into the procedure.
pub fn load_challenge(ctx: &mut EmmContext, eksi: u8) -> EmmResult<()> {
    let vector = ctx.vector_for_eksi(eksi);
    let (rand, autn) = (vector.rand, vector.autn);
    let auth = auth_mut(ctx)?;
    auth.ksi = eksi;
    auth.rand = rand;
    auth.autn = autn;
    Ok(())
}

/// Send AUTHENTICATION REQUEST for the loaded challenge and arm T3460.
pub fn send_challenge(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let auth = auth_mut(ctx)?;
    auth.common.retransmission_count = 0;
    log::info!(
        "ue_id={} EMM-PROC - Initiate Authentication KSI = {}",
        ue_id,
        auth.ksi
    );
    transmit(env, ue_id, auth);
    emm_reg::common_proc_req(env, ctx, KIND)
}

fn transmit(env: &mut EmmEnv, ue_id: MmeUeId, auth: &mut AuthProc) {
    env.sap.send_as(EmmAsPrimitive::AuthenticationRequest {
        ue_id,
        ksi: auth.ksi,
        rand: auth.rand,
        autn: auth.autn,
    });
    auth.t3460
        .start(&env.timers, KIND, ue_id, env.config.t3460.duration());
}

fn auth_mut(ctx: &mut EmmContext) -> EmmResult<&mut AuthProc> {
    let ue_id = ctx.ue_id;
    ctx.procedures
        .auth
        .as_mut()
        .ok_or(EmmError::ProcedureNotFound { ue_id, kind: KIND })
}

/// Running procedure still waiting for the UE, or None for a late or
/// duplicate message.
fn awaiting_ue<'a>(ctx: &'a mut EmmContext, message: &str) -> Option<&'a mut AuthProc> {
    let ue_id = ctx.ue_id;
    match ctx.procedures.auth.as_mut() {
        Some(auth) if auth.t3460.is_active() => Some(auth),
        _ => {
            log::warn!("ue_id={} Ignoring {} (T3460 not running)", ue_id, message);
            None
        }
    }
}

// ============================================================================
// UE messages
// ============================================================================

/// AUTHENTICATION RESPONSE
pub fn on_response(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    res: &[u8],
    latency_ms: u64,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let congestion = env.config.congestion_control;
    let Some(auth) = awaiting_ue(ctx, "AUTHENTICATION RESPONSE") else {
        return Ok(());
    };
    if congestion.should_drop(KIND, latency_ms) {
        log::warn!(
            "ue_id={} Dropping AUTHENTICATION RESPONSE under congestion ({} ms)",
            ue_id,
            latency_ms
        );
        return Ok(());
    }
    auth.t3460.stop(&env.timers);
    let ksi = auth.ksi;

    ctx.security.eksi = ksi;
    ctx.security.vector_index = Some(ksi as usize % MAX_EPS_AUTH_VECTORS);

    if ctx.vector_for_eksi(ksi).xres() != res {
        log::warn!("ue_id={} Authentication failure: XRES/RES mismatch", ue_id);
        if !ctx.is_imsi_valid() {
            return check_imsi(env, ctx, EmmCause::IllegalUe, true);
        }
        ctx.emm_cause = Some(EmmCause::IllegalUe);
        env.sap
            .send_as(EmmAsPrimitive::AuthenticationReject { ue_id });
        return emm_reg::common_proc_rej(env, ctx, KIND, true, true);
    }

    log::info!("ue_id={} EMM-PROC - Authentication complete KSI = {}", ue_id, ksi);
    if let Some(imsi) = ctx.imsi.clone() {
        ctx.set_imsi(imsi, true);
    }
    emm_reg::common_proc_cnf(env, ctx, KIND, true, true)
}

/// AUTHENTICATION FAILURE
pub fn on_failure(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    cause: EmmCause,
    auts: Option<[u8; AUTH_AUTS_SIZE]>,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let sync_failure_max = env.config.sync_failure_max;
    let imsi_valid = ctx.is_imsi_valid();
    let Some(auth) = awaiting_ue(ctx, "AUTHENTICATION FAILURE") else {
        return Ok(());
    };
    log::warn!("ue_id={} AUTHENTICATION FAILURE [{:?}]", ue_id, cause);

    match cause {
        EmmCause::SynchFailure => {
            auth.t3460.stop(&env.timers);
            auth.sync_fail_count += 1;
            let Some(auts) = auts.filter(|_| auth.sync_fail_count < sync_failure_max) else {
                log::warn!(
                    "ue_id={} Maximum SYNCH FAILURE reached ({})",
                    ue_id,
                    auth.sync_fail_count
                );
                return emm_reg::reject_with_cause(env, ctx, KIND, EmmCause::SynchFailure);
            };
            let mut resync_param = [0u8; RESYNC_PARAM_SIZE];
            resync_param[..AUTH_RAND_SIZE].copy_from_slice(&auth.rand);
            resync_param[AUTH_RAND_SIZE..].copy_from_slice(&auts);
            resynchronize(env, ctx, resync_param)
        }
        EmmCause::MacFailure => {
            auth.t3460.stop(&env.timers);
            auth.mac_fail_count += 1;
            auth.sync_fail_count = 0;
            if !imsi_valid && auth.mac_fail_count == 1 {
                return check_imsi(env, ctx, EmmCause::MacFailure, false);
            }
            emm_reg::reject_with_cause(env, ctx, KIND, EmmCause::MacFailure)
        }
        EmmCause::NonEpsAuthenticationUnacceptable => {
            auth.t3460.stop(&env.timers);
            auth.sync_fail_count = 0;
            if ctx.is_initial_identity_imsi || imsi_valid {
                return emm_reg::reject_with_cause(env, ctx, KIND, EmmCause::IllegalUe);
            }
            check_imsi(env, ctx, EmmCause::IllegalUe, false)
        }
        _ => {
            // T3460 keeps running; the UE is challenged again on expiry
            auth.sync_fail_count = 0;
            Ok(())
        }
    }
}

/// Ask the HSS to resynchronise SQN with RAND || AUTS.
fn resynchronize(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    resync_param: [u8; RESYNC_PARAM_SIZE],
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    if ctx.procedures.auth_info.is_some() {
        return Err(EmmError::ProcedureCollision {
            ue_id,
            kind: ProcedureKind::AuthInfo,
        });
    }

    log::info!("ue_id={} EMM-PROC - SQN resynchronisation", ue_id);
    let auth_info = emm_auth_info::get_or_create(ctx);
    auth_info.request_sent = true;
    auth_info.resync_param = Some(resync_param);
    ctx.clear_vectors();
    emm_auth_info::request(env, ctx)
}

/// Confirm the IMSI with Identification before deciding on the failed
/// challenge. `reject_cause` is used when Identification cannot start.
fn check_imsi(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    reject_cause: EmmCause,
    send_reject: bool,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    emm_reg::common_proc_abort(env, ctx, KIND, false, false)?;
    let imsi = ctx.imsi.clone();
    let auth = auth_mut(ctx)?;
    auth.unchecked_imsi = imsi;
    auth.imsi_check_cause = Some(reject_cause);

    log::info!("ue_id={} EMM-PROC - Check IMSI with Identification", ue_id);
    if let Err(e) = emm_ident::initiate(
        env,
        ctx,
        Some(ProcedureId::Common(KIND)),
        IdentityType2::Imsi,
        ProcHooks::auth_imsi_check(),
    ) {
        log::error!("ue_id={} Identification for IMSI check failed: {}", ue_id, e);
        if send_reject {
            env.sap
                .send_as(EmmAsPrimitive::AuthenticationReject { ue_id });
        }
        return emm_reg::reject_with_cause(env, ctx, KIND, reject_cause);
    }
    Ok(())
}

/// Identification confirmed an IMSI. A different subscriber restarts
/// Authentication from scratch; the same one is rejected.
pub fn imsi_check_success(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let auth = auth_mut(ctx)?;
    let unchecked_imsi = auth.unchecked_imsi.clone();
    let owner = auth.common.parent;
    let hooks = auth.common.hooks;
    let cause = auth.imsi_check_cause.unwrap_or(EmmCause::MacFailure);

    if ctx.is_imsi_valid() && unchecked_imsi != ctx.imsi {
        log::info!("ue_id={} IMSI changed, restarting Authentication", ue_id);
        ctx.clear_vectors();
        emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
        return initiate(env, ctx, owner, hooks, None);
    }
    emm_reg::reject_with_cause(env, ctx, KIND, cause)
}

/// Identification could not confirm the IMSI.
pub fn imsi_check_failure(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    if ctx.procedures.auth.is_none() {
        return Ok(());
    }
    emm_reg::common_proc_rej(env, ctx, KIND, true, true)
}

// ============================================================================
// Timer and lower layers
// ============================================================================

/// T3460 expiry: retransmit, or give up after the configured maximum.
pub fn on_timer(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    epoch: TimerEpoch,
) -> EmmResult<EmmOutcome> {
    let ue_id = ctx.ue_id;
    let max_count = env.config.max_count(KIND);
    let Some(auth) = ctx.procedures.auth.as_mut() else {
        log::warn!("ue_id={} Stale T3460 expiry {}", ue_id, epoch);
        return Ok(EmmOutcome::Continue);
    };
    if !auth.t3460.expire(&env.timers, epoch) {
        log::warn!("ue_id={} Stale T3460 expiry {}", ue_id, epoch);
        return Ok(EmmOutcome::Continue);
    }

    auth.common.retransmission_count += 1;
    log::warn!(
        "ue_id={} T3460 timer expired, retransmission counter = {}",
        ue_id,
        auth.common.retransmission_count
    );
    if auth.common.retransmission_count < max_count {
        transmit(env, ue_id, auth);
        return Ok(EmmOutcome::Continue);
    }

    log::warn!("ue_id={} Authentication aborted after {} expiries", ue_id, max_count);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    ctx.procedures.delete_all(&env.timers);
    Ok(EmmOutcome::ImplicitDetach)
}

/// The AUTHENTICATION REQUEST could not be sent.
pub fn on_lower_layer_failure(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
    log::warn!("ue_id={} Authentication lower layer failure", ctx.ue_id);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)
}

/// The AUTHENTICATION REQUEST was not delivered because of a handover.
pub fn on_non_delivery_ho(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<EmmOutcome> {
    log::warn!("ue_id={} Authentication not delivered (handover)", ctx.ue_id);
    auth_mut(ctx)?.t3460.stop(&env.timers);
    emm_reg::common_proc_abort(env, ctx, KIND, true, true)?;
    Ok(EmmOutcome::ImplicitDetach)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MmeNasConfig;
    use crate::context::{AuthVector, AUTH_KASME_SIZE, KSI_NO_KEY_AVAILABLE};
    use crate::emm_ident::{self, MobileIdentity};
    use crate::emm_proc::SpecificProc;
    use crate::emm_sap::{EmmCnPrimitive, EmmRegPrimitive, EmmSapPrimitive};
    use ogs_nas::eps::Imsi;

    const IMSI: &str = "001010123456789";

    fn setup() -> (EmmEnv, EmmContext) {
        let env = EmmEnv::new(MmeNasConfig::default());
        let mut ctx = EmmContext::new(1);
        ctx.set_imsi(Imsi::parse(IMSI).unwrap(), false);
        (env, ctx)
    }

    fn vector(seed: u8) -> AuthVector {
        AuthVector {
            kasme: [seed; AUTH_KASME_SIZE],
            rand: [seed; 16],
            autn: [seed.wrapping_add(1); 16],
            xres: [seed.wrapping_add(2); 16],
            xres_size: 8,
        }
    }

    fn vectors() -> Vec<AuthVector> {
        (0..5).map(|i| vector(0x10 * (i + 1))).collect()
    }

    fn start(env: &mut EmmEnv, ctx: &mut EmmContext) -> EmmResult<()> {
        initiate(
            env,
            ctx,
            Some(ProcedureId::Specific(SpecificProc::Attach)),
            ProcHooks::owner(),
            None,
        )
    }

    fn res_of(ctx: &EmmContext) -> Vec<u8> {
        let ksi = ctx.procedures.auth.as_ref().unwrap().ksi;
        ctx.vector_for_eksi(ksi).xres().to_vec()
    }

    fn auth_info_requests(prims: &[EmmSapPrimitive]) -> Vec<crate::emm_sap::AuthInfoRequest> {
        prims
            .iter()
            .filter_map(|p| match p {
                EmmSapPrimitive::Cn(EmmCnPrimitive::AuthInfoRequest(r)) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    fn auth_requests(prims: &[EmmSapPrimitive]) -> usize {
        prims
            .iter()
            .filter(|p| matches!(p, EmmSapPrimitive::As(EmmAsPrimitive::AuthenticationRequest { .. })))
            .count()
    }

    fn rejected_cause(prims: &[EmmSapPrimitive]) -> Option<EmmCause> {
        prims.iter().find_map(|p| match p {
            EmmSapPrimitive::Reg(EmmRegPrimitive::CommonProcRej(n))
                if n.kind == ProcedureKind::Authentication =>
            {
                n.cause
            }
            _ => None,
        })
    }

    fn confirmed(prims: &[EmmSapPrimitive], kind: ProcedureKind) -> bool {
        prims.iter().any(|p| {
            matches!(p, EmmSapPrimitive::Reg(EmmRegPrimitive::CommonProcCnf(n)) if n.kind == kind)
        })
    }

    #[test]
    fn test_initiate_illegal_state() {
        let (mut env, mut ctx) = setup();
        ctx.set_state(EmmState::DeregisteredInitiated);
        assert_eq!(
            start(&mut env, &mut ctx),
            Err(EmmError::IllegalState {
                ue_id: 1,
                kind: KIND,
                state: EmmState::DeregisteredInitiated
            })
        );
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_scenario_a_vectors_fetched_then_authenticated() {
        let (mut env, mut ctx) = setup();
        start(&mut env, &mut ctx).unwrap();
        let prims = env.sap.drain();
        let requests = auth_info_requests(&prims);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_initial);
        assert_eq!(auth_requests(&prims), 0);
        assert_eq!(ctx.state(), EmmState::Deregistered);

        // Starting again before the answer does not send a second request
        start(&mut env, &mut ctx).unwrap();
        assert!(env.sap.is_empty());

        emm_auth_info::on_answer(&mut env, &mut ctx, vectors()).unwrap();
        let prims = env.sap.drain();
        assert_eq!(auth_requests(&prims), 1);
        assert_eq!(ctx.state(), EmmState::CommonProcedureInitiated);
        let ksi = ctx.procedures.auth.as_ref().unwrap().ksi;
        assert_eq!(ksi, 0);

        let res = res_of(&ctx);
        on_response(&mut env, &mut ctx, &res, 0).unwrap();
        let prims = env.sap.drain();
        assert!(confirmed(&prims, KIND));
        assert_eq!(ctx.security.eksi, ksi);
        assert_eq!(ctx.security.vector_index, Some(ksi as usize));
        assert!(ctx.is_imsi_valid());
        assert!(ctx.procedures.is_empty());
        assert_eq!(ctx.state(), EmmState::Deregistered);
        assert_eq!(env.timers.armed_count(), 0);
    }

    #[test]
    fn test_initiate_with_cached_vectors_picks_next_eksi() {
        let (mut env, mut ctx) = setup();
        for (i, v) in vectors().into_iter().enumerate() {
            ctx.set_vector(i, v);
        }
        ctx.set_vectors_present();
        ctx.security.eksi = 3;

        start(&mut env, &mut ctx).unwrap();
        assert_eq!(ctx.procedures.auth.as_ref().unwrap().ksi, 4);
        let prims = env.sap.drain();
        assert!(prims.iter().any(|p| matches!(
            p,
            EmmSapPrimitive::As(EmmAsPrimitive::AuthenticationRequest { ksi: 4, .. })
        )));
    }

    #[test]
    fn test_initiate_with_challenge() {
        let (mut env, mut ctx) = setup();
        let challenge = AuthChallenge {
            ksi: 2,
            rand: [7; 16],
            autn: [8; 16],
        };
        initiate(&mut env, &mut ctx, None, ProcHooks::owner(), Some(challenge)).unwrap();
        let prims = env.sap.drain();
        assert_eq!(
            prims[0],
            EmmSapPrimitive::As(EmmAsPrimitive::AuthenticationRequest {
                ue_id: 1,
                ksi: 2,
                rand: [7; 16],
                autn: [8; 16],
            })
        );

        let bad = AuthChallenge {
            ksi: KSI_NO_KEY_AVAILABLE,
            ..challenge
        };
        ctx.set_state(EmmState::Registered);
        assert!(matches!(
            initiate(&mut env, &mut ctx, None, ProcHooks::owner(), Some(bad)),
            Err(EmmError::InvalidKsi { eksi: 7, .. })
        ));
    }

    fn authenticate_until_challenge(env: &mut EmmEnv, ctx: &mut EmmContext) {
        start(env, ctx).unwrap();
        emm_auth_info::on_answer(env, ctx, vectors()).unwrap();
        env.sap.drain();
    }

    #[test]
    fn test_duplicate_response_is_ignored() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        let res = res_of(&ctx);
        on_response(&mut env, &mut ctx, &res, 0).unwrap();
        env.sap.drain();

        on_response(&mut env, &mut ctx, &res, 0).unwrap();
        assert!(env.sap.is_empty());
    }

    #[test]
    fn test_congestion_drop_keeps_t3460() {
        let (mut env, mut ctx) = setup();
        env.config.congestion_control.enabled = true;
        env.config.congestion_control.auth_ms = 100;
        authenticate_until_challenge(&mut env, &mut ctx);

        let res = res_of(&ctx);
        on_response(&mut env, &mut ctx, &res, 500).unwrap();
        assert!(env.sap.is_empty());
        assert!(ctx.procedures.auth.as_ref().unwrap().t3460.is_active());

        on_response(&mut env, &mut ctx, &res, 50).unwrap();
        assert!(confirmed(&env.sap.drain(), KIND));
    }

    #[test]
    fn test_res_mismatch_with_valid_imsi_rejects() {
        let (mut env, mut ctx) = setup();
        let imsi = ctx.imsi.clone().unwrap();
        ctx.set_imsi(imsi, true);
        authenticate_until_challenge(&mut env, &mut ctx);

        on_response(&mut env, &mut ctx, &[0xde, 0xad], 0).unwrap();
        let prims = env.sap.drain();
        assert!(prims
            .iter()
            .any(|p| matches!(p, EmmSapPrimitive::As(EmmAsPrimitive::AuthenticationReject { .. }))));
        assert_eq!(rejected_cause(&prims), Some(EmmCause::IllegalUe));
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_res_mismatch_with_unconfirmed_imsi_identifies() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        on_response(&mut env, &mut ctx, &[0xde, 0xad], 0).unwrap();
        let prims = env.sap.drain();
        assert!(prims.iter().any(|p| matches!(
            p,
            EmmSapPrimitive::As(EmmAsPrimitive::IdentityRequest {
                identity_type: IdentityType2::Imsi,
                ..
            })
        )));
        let ident = ctx.procedures.ident.as_ref().unwrap();
        assert_eq!(ident.common.parent, Some(ProcedureId::Common(KIND)));
        assert_eq!(ident.common.previous_state, EmmState::Deregistered);
    }

    #[test]
    fn test_scenario_b_sync_failure() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        for attempt in 1..=2u8 {
            let rand = ctx.procedures.auth.as_ref().unwrap().rand;
            on_failure(&mut env, &mut ctx, EmmCause::SynchFailure, Some([attempt; 14])).unwrap();
            let prims = env.sap.drain();
            assert_eq!(rejected_cause(&prims), None);
            let requests = auth_info_requests(&prims);
            assert_eq!(requests.len(), 1);
            let request = &requests[0];
            assert!(request.re_synchronization);
            assert!(!request.is_initial);
            let param = request.resync_param.unwrap();
            assert_eq!(&param[..16], &rand);
            assert_eq!(&param[16..], &[attempt; 14]);
            assert!(!ctx.has_valid_vectors());

            emm_auth_info::on_answer(&mut env, &mut ctx, vectors()).unwrap();
            assert_eq!(auth_requests(&env.sap.drain()), 1);
        }

        on_failure(&mut env, &mut ctx, EmmCause::SynchFailure, Some([3; 14])).unwrap();
        let prims = env.sap.drain();
        assert_eq!(rejected_cause(&prims), Some(EmmCause::SynchFailure));
        assert!(auth_info_requests(&prims).is_empty());
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_sync_failure_while_resync_outstanding_is_collision() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        ctx.procedures.auth_info = Some(crate::emm_proc::AuthInfoProc::new(1));
        assert_eq!(
            on_failure(&mut env, &mut ctx, EmmCause::SynchFailure, Some([0; 14])),
            Err(EmmError::ProcedureCollision {
                ue_id: 1,
                kind: ProcedureKind::AuthInfo
            })
        );
    }

    #[test]
    fn test_scenario_c_mac_failure_imsi_changed_restarts() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        on_failure(&mut env, &mut ctx, EmmCause::MacFailure, None).unwrap();
        env.sap.drain();
        assert!(ctx.procedures.ident.is_some());
        assert_eq!(
            ctx.procedures.auth.as_ref().unwrap().unchecked_imsi,
            Some(Imsi::parse(IMSI).unwrap())
        );

        let other = Imsi::parse("001010999999999").unwrap();
        emm_ident::on_response(&mut env, &mut ctx, MobileIdentity::Imsi(other.clone()), 0)
            .unwrap();
        let prims = env.sap.drain();
        assert!(confirmed(&prims, ProcedureKind::Identification));
        assert_eq!(rejected_cause(&prims), None);

        // Restarted from scratch: vectors cleared, fresh initial request
        assert_eq!(ctx.imsi, Some(other));
        assert!(!ctx.has_valid_vectors());
        let requests = auth_info_requests(&prims);
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_initial);
        let auth = ctx.procedures.auth.as_ref().unwrap();
        assert_eq!(auth.mac_fail_count, 0);
        assert!(ctx.procedures.ident.is_none());
    }

    #[test]
    fn test_scenario_c_mac_failure_same_imsi_rejects() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        on_failure(&mut env, &mut ctx, EmmCause::MacFailure, None).unwrap();
        env.sap.drain();
        let same = Imsi::parse(IMSI).unwrap();
        emm_ident::on_response(&mut env, &mut ctx, MobileIdentity::Imsi(same), 0).unwrap();
        let prims = env.sap.drain();
        assert_eq!(rejected_cause(&prims), Some(EmmCause::MacFailure));
        assert!(ctx.procedures.is_empty());
        assert_eq!(ctx.state(), EmmState::Deregistered);
    }

    #[test]
    fn test_res_mismatch_same_imsi_rejects_illegal_ue() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        on_response(&mut env, &mut ctx, &[0xde, 0xad], 0).unwrap();
        env.sap.drain();
        assert_eq!(
            ctx.procedures.auth.as_ref().unwrap().imsi_check_cause,
            Some(EmmCause::IllegalUe)
        );
        let same = Imsi::parse(IMSI).unwrap();
        emm_ident::on_response(&mut env, &mut ctx, MobileIdentity::Imsi(same), 0).unwrap();
        let prims = env.sap.drain();
        assert_eq!(rejected_cause(&prims), Some(EmmCause::IllegalUe));
        assert_eq!(ctx.emm_cause, Some(EmmCause::IllegalUe));
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_non_eps_same_imsi_rejects_illegal_ue() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);

        on_failure(&mut env, &mut ctx, EmmCause::NonEpsAuthenticationUnacceptable, None)
            .unwrap();
        env.sap.drain();
        let same = Imsi::parse(IMSI).unwrap();
        emm_ident::on_response(&mut env, &mut ctx, MobileIdentity::Imsi(same), 0).unwrap();
        let prims = env.sap.drain();
        assert_eq!(rejected_cause(&prims), Some(EmmCause::IllegalUe));
        assert!(ctx.procedures.is_empty());
    }

    #[test]
    fn test_mac_failure_with_valid_imsi_rejects() {
        let (mut env, mut ctx) = setup();
        let imsi = ctx.imsi.clone().unwrap();
        ctx.set_imsi(imsi, true);
        authenticate_until_challenge(&mut env, &mut ctx);

        on_failure(&mut env, &mut ctx, EmmCause::MacFailure, None).unwrap();
        let prims = env.sap.drain();
        assert_eq!(rejected_cause(&prims), Some(EmmCause::MacFailure));
        assert!(ctx.procedures.ident.is_none());
    }

    #[test]
    fn test_non_eps_unacceptable() {
        let (mut env, mut ctx) = setup();
        ctx.is_initial_identity_imsi = true;
        authenticate_until_challenge(&mut env, &mut ctx);
        on_failure(&mut env, &mut ctx, EmmCause::NonEpsAuthenticationUnacceptable, None)
            .unwrap();
        assert_eq!(rejected_cause(&env.sap.drain()), Some(EmmCause::IllegalUe));

        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        on_failure(&mut env, &mut ctx, EmmCause::NonEpsAuthenticationUnacceptable, None)
            .unwrap();
        assert!(ctx.procedures.ident.is_some());
    }

    #[test]
    fn test_other_failure_cause_keeps_t3460() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        ctx.procedures.auth.as_mut().unwrap().sync_fail_count = 1;
        on_failure(&mut env, &mut ctx, EmmCause::Congestion, None).unwrap();
        let auth = ctx.procedures.auth.as_ref().unwrap();
        assert_eq!(auth.sync_fail_count, 0);
        assert!(auth.t3460.is_active());
        assert!(env.sap.is_empty());
    }

    #[test]
    fn test_t3460_retransmits_then_implicit_detach() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        let max = env.config.max_count(KIND);

        for _ in 1..max {
            let epoch = ctx.procedures.auth.as_ref().unwrap().t3460.epoch().unwrap();
            assert_eq!(
                on_timer(&mut env, &mut ctx, epoch).unwrap(),
                EmmOutcome::Continue
            );
        }
        assert_eq!(auth_requests(&env.sap.drain()), (max - 1) as usize);

        let epoch = ctx.procedures.auth.as_ref().unwrap().t3460.epoch().unwrap();
        assert_eq!(
            on_timer(&mut env, &mut ctx, epoch).unwrap(),
            EmmOutcome::ImplicitDetach
        );
        assert!(ctx.procedures.is_empty());
        assert_eq!(env.timers.armed_count(), 0);
    }

    #[test]
    fn test_stale_t3460_ignored() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        let first = ctx.procedures.auth.as_ref().unwrap().t3460.epoch().unwrap();
        on_timer(&mut env, &mut ctx, first).unwrap();
        env.sap.drain();

        assert_eq!(on_timer(&mut env, &mut ctx, first).unwrap(), EmmOutcome::Continue);
        assert!(env.sap.is_empty());
        assert_eq!(
            ctx.procedures.auth.as_ref().unwrap().common.retransmission_count,
            1
        );
    }

    #[test]
    fn test_lower_layer_failure_and_handover() {
        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        on_lower_layer_failure(&mut env, &mut ctx).unwrap();
        assert!(ctx.procedures.is_empty());
        assert_eq!(ctx.state(), EmmState::Deregistered);

        let (mut env, mut ctx) = setup();
        authenticate_until_challenge(&mut env, &mut ctx);
        assert_eq!(
            on_non_delivery_ho(&mut env, &mut ctx).unwrap(),
            EmmOutcome::ImplicitDetach
        );
        assert_eq!(env.timers.armed_count(), 0);
    }
}
