//! EMMREG - Registration layer of the EMM common procedures
//!
//! Moves the EMM state in and out of COMMON-PROCEDURE-INITIATED, reports
//! every transition to the owning procedure and runs completion hooks.

use ogs_nas::eps::EmmCause;

use crate::context::{EmmContext, EmmState};
use crate::emm_auth;
use crate::emm_proc::{NotifyHook, ProcedureKind};
use crate::emm_sap::{CommonProcNotification, EmmRegPrimitive};
use crate::emm_sm::EmmEnv;
use crate::error::{EmmError, EmmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Confirmed,
    Rejected,
    Aborted,
}

/// COMMON_PROC_REQ: the procedure has sent its request to the UE.
pub fn common_proc_req(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let state = ctx.state();
    let proc = ctx
        .procedures
        .common_mut(kind)
        .ok_or(EmmError::ProcedureNotFound { ue_id, kind })?;
    if state != EmmState::CommonProcedureInitiated {
        proc.previous_state = state;
    }
    let owner = proc.parent;

    ctx.set_state(EmmState::CommonProcedureInitiated);
    env.sap.send_reg(EmmRegPrimitive::CommonProcReq(CommonProcNotification {
        ue_id,
        kind,
        owner,
        notify: false,
        free_proc: false,
        cause: None,
    }));
    Ok(())
}

/// COMMON_PROC_CNF: the procedure completed successfully.
pub fn common_proc_cnf(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    notify: bool,
    free_proc: bool,
) -> EmmResult<()> {
    complete(env, ctx, kind, Completion::Confirmed, notify, free_proc)
}

/// COMMON_PROC_REJ: the procedure failed with `ctx.emm_cause`.
pub fn common_proc_rej(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    notify: bool,
    free_proc: bool,
) -> EmmResult<()> {
    complete(env, ctx, kind, Completion::Rejected, notify, free_proc)
}

/// COMMON_PROC_ABORT: the procedure is cancelled without further NAS
/// signalling.
pub fn common_proc_abort(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    notify: bool,
    free_proc: bool,
) -> EmmResult<()> {
    complete(env, ctx, kind, Completion::Aborted, notify, free_proc)
}

/// Reject the owning procedure with `cause`.
pub fn reject_with_cause(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    cause: EmmCause,
) -> EmmResult<()> {
    ctx.emm_cause = Some(cause);
    common_proc_rej(env, ctx, kind, true, true)
}

/// Reject the attach in progress with `cause`, then release `kind`.
pub fn attach_reject(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    cause: EmmCause,
) -> EmmResult<()> {
    log::warn!("ue_id={} {} - Attach Reject [{:?}]", ctx.ue_id, kind, cause);
    ctx.emm_cause = Some(cause);
    env.sap.send_reg(EmmRegPrimitive::AttachReject {
        ue_id: ctx.ue_id,
        cause,
    });
    common_proc_rej(env, ctx, kind, true, true)
}

fn complete(
    env: &mut EmmEnv,
    ctx: &mut EmmContext,
    kind: ProcedureKind,
    completion: Completion,
    notify: bool,
    free_proc: bool,
) -> EmmResult<()> {
    let ue_id = ctx.ue_id;
    let proc = ctx
        .procedures
        .common(kind)
        .ok_or(EmmError::ProcedureNotFound { ue_id, kind })?;
    let previous_state = proc.previous_state;
    let owner = proc.parent;
    let hooks = proc.hooks;

    if ctx.state() == EmmState::CommonProcedureInitiated {
        ctx.set_state(previous_state);
    }

    let notification = CommonProcNotification {
        ue_id,
        kind,
        owner,
        notify,
        free_proc,
        cause: match completion {
            Completion::Rejected => ctx.emm_cause,
            _ => None,
        },
    };
    log::debug!(
        "ue_id={} {} {:?} (notify={}, free_proc={})",
        ue_id,
        kind,
        completion,
        notify,
        free_proc
    );
    env.sap.send_reg(match completion {
        Completion::Confirmed => EmmRegPrimitive::CommonProcCnf(notification),
        Completion::Rejected => EmmRegPrimitive::CommonProcRej(notification),
        Completion::Aborted => EmmRegPrimitive::CommonProcAbort(notification),
    });

    if notify {
        match completion {
            Completion::Confirmed => run_hook(env, ctx, hooks.success)?,
            Completion::Rejected => run_hook(env, ctx, hooks.failure)?,
            Completion::Aborted => ctx.procedures.stop_timer(kind, &env.timers),
        }
    }

    if free_proc {
        ctx.procedures.delete(kind, &env.timers);
    }
    Ok(())
}

fn run_hook(env: &mut EmmEnv, ctx: &mut EmmContext, hook: NotifyHook) -> EmmResult<()> {
    match hook {
        // The owner acts on the primitive already sent
        NotifyHook::None | NotifyHook::Owner => Ok(()),
        NotifyHook::AuthImsiCheck => emm_auth::imsi_check_success(env, ctx),
        NotifyHook::AuthImsiCheckFail => emm_auth::imsi_check_failure(env, ctx),
    }
}
