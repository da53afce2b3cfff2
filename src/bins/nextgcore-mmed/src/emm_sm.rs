//! EMM common procedure task
//!
//! Owns the per-UE EMM contexts, routes UE messages, HSS answers, lower
//! layer indications and timer expiries to the procedure that owns them,
//! and tears a UE down when a procedure asks for an implicit detach.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use ogs_nas::eps::{EmmCause, IdentityType2, Imeisv};

use crate::config::MmeNasConfig;
use crate::context::{AuthVector, EmmContext, MmeUeId, AUTH_AUTS_SIZE};
use crate::emm_auth::{self, AuthChallenge};
use crate::emm_auth_info;
use crate::emm_ident::{self, MobileIdentity};
use crate::emm_proc::{ProcHooks, ProcedureId, ProcedureKind};
use crate::emm_reg;
use crate::emm_sap::{EmmCnPrimitive, EmmSap, EmmSapDispatcher};
use crate::emm_smc;
use crate::error::{EmmError, EmmResult};
use crate::nas_security::{NasKdf, OgsNasKdf};
use crate::timer::{EmmTimerEvent, MmeTimerMgr};

// ============================================================================
// Environment
// ============================================================================

/// Collaborators shared by every procedure of the task
pub struct EmmEnv {
    /// NAS configuration
    pub config: MmeNasConfig,
    /// Procedure timers
    pub timers: MmeTimerMgr,
    /// Outbound primitives
    pub sap: EmmSap,
    /// NAS key derivation
    pub kdf: Box<dyn NasKdf>,
}

impl EmmEnv {
    pub fn new(config: MmeNasConfig) -> Self {
        Self::with_kdf(config, Box::new(OgsNasKdf))
    }

    pub fn with_kdf(config: MmeNasConfig, kdf: Box<dyn NasKdf>) -> Self {
        Self {
            config,
            timers: MmeTimerMgr::new(),
            sap: EmmSap::new(),
            kdf,
        }
    }
}

impl fmt::Debug for EmmEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmmEnv")
            .field("config", &self.config)
            .field("timers", &self.timers)
            .field("sap", &self.sap)
            .finish_non_exhaustive()
    }
}

/// What the task has to do once a procedure handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmOutcome {
    Continue,
    /// Release the UE context and tell the core network
    ImplicitDetach,
}

// ============================================================================
// Events
// ============================================================================

/// Input to the EMM task for one UE
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmEvent {
    /// Authenticate with the next cached vector, fetching vectors if needed
    StartAuthentication { owner: Option<ProcedureId> },
    /// Authenticate with a challenge supplied by the caller
    StartAuthenticationWithKsi {
        owner: Option<ProcedureId>,
        challenge: AuthChallenge,
    },
    StartIdentification {
        owner: Option<ProcedureId>,
        identity_type: IdentityType2,
    },
    StartSecurityModeControl { owner: Option<ProcedureId>, ksi: u8 },
    /// Capability IEs from ATTACH/TAU REQUEST, length-prefixed
    UeCapabilities {
        ue_network_capability: Vec<u8>,
        ms_network_capability: Option<Vec<u8>>,
        ue_additional_security_capability: Option<Vec<u8>>,
    },

    AuthenticationResponse { res: Vec<u8>, latency_ms: u64 },
    AuthenticationFailure {
        cause: EmmCause,
        auts: Option<[u8; AUTH_AUTS_SIZE]>,
    },
    IdentityResponse {
        identity: MobileIdentity,
        latency_ms: u64,
    },
    SecurityModeComplete {
        imeisv: Option<Imeisv>,
        latency_ms: u64,
    },
    SecurityModeReject,

    /// S6a Authentication-Information-Answer
    AuthInfoAnswer { vectors: Vec<AuthVector> },
    /// S6a failure, or no answer at all
    AuthInfoFailure { cause: Option<EmmCause> },

    /// The request of `kind` could not be sent
    LowerLayerFailure { kind: ProcedureKind },
    /// The request of `kind` was lost to a handover
    NonDeliveryHo { kind: ProcedureKind },
    /// The owning procedure gave up on `kind`
    Abort { kind: ProcedureKind },

    Timer(EmmTimerEvent),
}

impl EmmEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartAuthentication { .. } => "START_AUTHENTICATION",
            Self::StartAuthenticationWithKsi { .. } => "START_AUTHENTICATION_WITH_KSI",
            Self::StartIdentification { .. } => "START_IDENTIFICATION",
            Self::StartSecurityModeControl { .. } => "START_SECURITY_MODE_CONTROL",
            Self::UeCapabilities { .. } => "UE_CAPABILITIES",
            Self::AuthenticationResponse { .. } => "AUTHENTICATION_RESPONSE",
            Self::AuthenticationFailure { .. } => "AUTHENTICATION_FAILURE",
            Self::IdentityResponse { .. } => "IDENTITY_RESPONSE",
            Self::SecurityModeComplete { .. } => "SECURITY_MODE_COMPLETE",
            Self::SecurityModeReject => "SECURITY_MODE_REJECT",
            Self::AuthInfoAnswer { .. } => "AUTH_INFO_ANSWER",
            Self::AuthInfoFailure { .. } => "AUTH_INFO_FAILURE",
            Self::LowerLayerFailure { .. } => "LOWER_LAYER_FAILURE",
            Self::NonDeliveryHo { .. } => "NON_DELIVERY_HO",
            Self::Abort { .. } => "ABORT",
            Self::Timer(_) => "EMM_TIMER",
        }
    }
}

impl fmt::Display for EmmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn dispatch_event(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    event: EmmEvent,
) -> EmmResult<EmmOutcome> {
    use EmmEvent::*;

    let ue_id = ctx.ue_id;
    let continue_after = |result: EmmResult<()>| result.map(|()| EmmOutcome::Continue);
    match event {
        StartAuthentication { owner } => {
            continue_after(emm_auth::initiate(env, ctx, owner, ProcHooks::owner(), None))
        }
        StartAuthenticationWithKsi { owner, challenge } => continue_after(emm_auth::initiate(
            env,
            ctx,
            owner,
            ProcHooks::owner(),
            Some(challenge),
        )),
        StartIdentification {
            owner,
            identity_type,
        } => continue_after(emm_ident::initiate(
            env,
            ctx,
            owner,
            identity_type,
            ProcHooks::owner(),
        )),
        StartSecurityModeControl { owner, ksi } => {
            continue_after(emm_smc::initiate(env, ctx, owner, ksi, ProcHooks::owner()))
        }
        UeCapabilities {
            ue_network_capability,
            ms_network_capability,
            ue_additional_security_capability,
        } => {
            ctx.set_ue_network_capability_ie(&ue_network_capability)?;
            if let Some(ie) = ms_network_capability {
                ctx.set_ms_network_capability_ie(&ie)?;
            }
            if let Some(ie) = ue_additional_security_capability {
                ctx.set_ue_additional_security_capability_ie(&ie)?;
            }
            Ok(EmmOutcome::Continue)
        }

        AuthenticationResponse { res, latency_ms } => {
            continue_after(emm_auth::on_response(env, ctx, &res, latency_ms))
        }
        AuthenticationFailure { cause, auts } => {
            continue_after(emm_auth::on_failure(env, ctx, cause, auts))
        }
        IdentityResponse {
            identity,
            latency_ms,
        } => {
            log::debug!("ue_id={} Identity response [{:?}]", ue_id, identity.identity_type());
            continue_after(emm_ident::on_response(env, ctx, identity, latency_ms))
        }
        SecurityModeComplete { imeisv, latency_ms } => {
            continue_after(emm_smc::on_complete(env, ctx, imeisv, latency_ms))
        }
        SecurityModeReject => continue_after(emm_smc::on_reject(env, ctx)),

        AuthInfoAnswer { vectors } => continue_after(emm_auth_info::on_answer(env, ctx, vectors)),
        AuthInfoFailure { cause } => continue_after(emm_auth_info::on_failure(env, ctx, cause)),

        LowerLayerFailure { kind } => match kind {
            ProcedureKind::Authentication => {
                continue_after(emm_auth::on_lower_layer_failure(env, ctx))
            }
            ProcedureKind::Identification => {
                continue_after(emm_ident::on_lower_layer_failure(env, ctx))
            }
            ProcedureKind::SecurityModeControl => {
                continue_after(emm_smc::on_lower_layer_failure(env, ctx))
            }
            ProcedureKind::AuthInfo => {
                log::warn!("ue_id={} No NAS message to fail for {}", ue_id, kind);
                Ok(EmmOutcome::Continue)
            }
        },
        NonDeliveryHo { kind } => match kind {
            ProcedureKind::Authentication => emm_auth::on_non_delivery_ho(env, ctx),
            ProcedureKind::Identification => emm_ident::on_non_delivery_ho(env, ctx),
            ProcedureKind::SecurityModeControl => emm_smc::on_non_delivery_ho(env, ctx),
            ProcedureKind::AuthInfo => {
                log::warn!("ue_id={} No NAS message to lose for {}", ue_id, kind);
                Ok(EmmOutcome::Continue)
            }
        },
        Abort { kind } => {
            if !ctx.procedures.is_running(kind) {
                log::warn!("ue_id={} Nothing to abort for {}", ue_id, kind);
                return Ok(EmmOutcome::Continue);
            }
            if kind == ProcedureKind::AuthInfo {
                // No registration state to restore, just release the record
                log::info!("ue_id={} Releasing {}", ue_id, kind);
                ctx.procedures.delete(kind, &env.timers);
                return Ok(EmmOutcome::Continue);
            }
            continue_after(emm_reg::common_proc_abort(env, ctx, kind, false, true))
        }

        Timer(timer) => match timer.kind {
            ProcedureKind::Authentication => emm_auth::on_timer(env, ctx, timer.epoch),
            ProcedureKind::Identification => emm_ident::on_timer(env, ctx, timer.epoch),
            ProcedureKind::SecurityModeControl => emm_smc::on_timer(env, ctx, timer.epoch),
            ProcedureKind::AuthInfo => {
                continue_after(emm_auth_info::on_timer(env, ctx, timer.epoch))
            }
        },
    }
}

// ============================================================================
// Task
// ============================================================================

/// EMM common procedure task: single owner of all UE contexts
#[derive(Debug)]
pub struct EmmTask {
    env: EmmEnv,
    contexts: HashMap<MmeUeId, EmmContext>,
}

impl EmmTask {
    pub fn new(config: MmeNasConfig) -> Self {
        Self::with_env(EmmEnv::new(config))
    }

    pub fn with_env(env: EmmEnv) -> Self {
        Self {
            env,
            contexts: HashMap::new(),
        }
    }

    pub fn env(&self) -> &EmmEnv {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut EmmEnv {
        &mut self.env
    }

    /// Register a UE context, replacing any previous one with the same id.
    pub fn add_context(&mut self, ctx: EmmContext) {
        log::debug!("[Added] Number of MME-UEs is now {}", self.contexts.len() + 1);
        if let Some(mut old) = self.contexts.insert(ctx.ue_id, ctx) {
            old.procedures.delete_all(&self.env.timers);
            self.env.timers.stop_all_ue_timers(old.ue_id);
        }
    }

    pub fn context(&self, ue_id: MmeUeId) -> Option<&EmmContext> {
        self.contexts.get(&ue_id)
    }

    pub fn context_mut(&mut self, ue_id: MmeUeId) -> Option<&mut EmmContext> {
        self.contexts.get_mut(&ue_id)
    }

    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Process one event for `ue_id`.
    pub fn handle(&mut self, ue_id: MmeUeId, event: EmmEvent) -> EmmResult<EmmOutcome> {
        let name = event.name();
        let Some(ctx) = self.contexts.get_mut(&ue_id) else {
            log::error!("ue_id={} {} for unknown UE", ue_id, name);
            return Err(EmmError::UeNotFound(ue_id));
        };
        log::debug!("ue_id={} [{}] {}", ue_id, ctx.state(), name);

        let outcome = match dispatch_event(&mut self.env, ctx, event) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("ue_id={} {} failed: {}", ue_id, name, e);
                return Err(e);
            }
        };
        if outcome == EmmOutcome::ImplicitDetach {
            self.implicit_detach(ue_id);
        }
        Ok(outcome)
    }

    fn implicit_detach(&mut self, ue_id: MmeUeId) {
        log::warn!("ue_id={} Implicit detach", ue_id);
        let stopped = self.env.timers.stop_all_ue_timers(ue_id);
        if let Some(mut ctx) = self.contexts.remove(&ue_id) {
            ctx.procedures.delete_all(&self.env.timers);
        }
        log::debug!(
            "[Removed] Number of MME-UEs is now {} ({} timers stopped)",
            self.contexts.len(),
            stopped
        );
        self.env
            .sap
            .send_cn(EmmCnPrimitive::ImplicitDetachUe { ue_id });
    }

    /// Deliver every timer expired as of `now`. Returns how many fired.
    pub fn poll_timers(&mut self, now: Instant) -> usize {
        let expired = self.env.timers.poll_expired(now);
        let fired = expired.len();
        for timer in expired {
            if !self.contexts.contains_key(&timer.ue_id) {
                log::warn!("ue_id={} {} expired after UE release", timer.ue_id, timer.kind);
                continue;
            }
            // Errors are already logged by handle()
            let _ = self.handle(timer.ue_id, EmmEvent::Timer(timer));
        }
        fired
    }

    /// Hand queued primitives to the transport.
    pub fn dispatch(&mut self, dispatcher: &mut dyn EmmSapDispatcher) {
        self.env.sap.dispatch_all(dispatcher);
    }

    pub fn poll_interval(&self, max_interval: Duration) -> Duration {
        self.env.timers.poll_interval(max_interval)
    }
}
