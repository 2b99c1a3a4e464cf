use axum::extract::FromRef;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    accounts::{Account, AccountStore, ApprovalStatus, PendingStatus},
    error::{AuthError, AuthResult},
    state::AppState,
};

use super::{
    machine::{self, Decision, Transition},
    token::{DecisionLinks, DecisionTokenCodec},
};

/// How many times a transition is retried when a competing write moved the
/// approval state between our read and our write.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Applies `change` to a fresh copy of the account and writes it back only
/// if nobody moved its approval state or `active` flag in between.
async fn commit<T, F>(store: &dyn AccountStore, account_id: Uuid, mut change: F) -> AuthResult<(Account, T)>
where
    F: FnMut(&mut Account) -> AuthResult<T>,
{
    for _ in 0..MAX_COMMIT_ATTEMPTS {
        let current = store
            .find_by_id(account_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        let mut next = current.clone();
        let out = change(&mut next)?;
        if store.compare_and_update(&next, &current).await? {
            return Ok((next, out));
        }
    }
    Err(AuthError::Internal(anyhow::anyhow!(
        "approval state of {account_id} kept changing; gave up"
    )))
}

fn pending_ttl(state: &AppState) -> Option<Duration> {
    state.config.approval.pending_ttl_hours.map(Duration::hours)
}

async fn close_marker(state: &AppState, account_id: Uuid, status: PendingStatus, at: OffsetDateTime) {
    if let Err(e) = state.store.resolve_pending_login(account_id, status, at).await {
        error!(%account_id, error = %e, "could not close pending login marker");
    }
}

/// NONE/DECLINED/PENDING → PENDING for a gated login, then mails the
/// super-admin a fresh approve/decline pair.
///
/// The new state is committed before the notification goes out; a failed
/// send is logged and does not undo it.
#[instrument(skip(state, account), fields(account_id = %account.id))]
pub async fn request_approval(state: &AppState, account: Account) -> AuthResult<Uuid> {
    let now = OffsetDateTime::now_utc();
    let (account, previous) = commit(state.store.as_ref(), account.id, |a| {
        // Deactivated while the password was being checked.
        if !a.active {
            return Err(AuthError::AccountDeactivated);
        }
        Ok(machine::request_approval(a, now))
    })
    .await?;
    info!(from = %previous, "login approval requested");

    if let Err(e) = state.store.record_pending_login(&account, now).await {
        error!(error = %e, "could not record pending login marker");
    }

    let codec = DecisionTokenCodec::from_ref(state);
    let token = codec.issue_at(account.id, &account.email, now)?;
    let links = DecisionLinks::new(&state.config.approval.base_url, &token);
    if let Err(e) = state.notifier.send_decision_request(&account, &links).await {
        error!(error = %e, "decision request not delivered");
    }

    Ok(account.id)
}

/// Verifies a decision token and applies `decision` to its account.
#[instrument(skip(state, token))]
pub async fn decide(
    state: &AppState,
    token: &str,
    decision: Decision,
) -> AuthResult<(Account, Transition)> {
    let verified = DecisionTokenCodec::from_ref(state).verify(token).map_err(|e| {
        warn!(error = %e, decision = decision.as_str(), "decision token rejected");
        AuthError::Token(e)
    })?;

    let now = OffsetDateTime::now_utc();
    let ttl = pending_ttl(state);
    let (account, (expired, transition)) =
        commit(state.store.as_ref(), verified.account_id, |a| {
            if a.email != verified.email {
                return Err(AuthError::AccountNotFound);
            }
            let expired = machine::expire_if_stale(a, ttl, now);
            Ok((expired, machine::apply_decision(a, decision, now)?))
        })
        .await
        .map_err(|e| {
            if matches!(e, AuthError::AccountNotFound) {
                warn!(account_id = %verified.account_id, "decision token names no account");
            }
            e
        })?;

    if expired {
        info!(account_id = %account.id, "pending request expired before the decision");
        close_marker(state, account.id, PendingStatus::Declined, now).await;
    }

    match transition {
        Transition::Decided(to) => {
            info!(account_id = %account.id, to = %to, "login request decided");
            close_marker(state, account.id, decision.marker_status(), now).await;
            if let Err(e) = state.notifier.send_decision_outcome(&account, decision).await {
                error!(account_id = %account.id, error = %e, "decision outcome not delivered");
            }
        }
        Transition::Reapplied(to) => {
            info!(account_id = %account.id, to = %to, "decision link used again");
        }
        Transition::AlreadyDecided(current) => {
            info!(account_id = %account.id, current = %current, "request was already decided the other way");
        }
    }

    Ok((account, transition))
}

/// Current status for a poller. Unknown ids read as all-false so the
/// endpoint says nothing about which ids exist.
#[instrument(skip(state))]
pub async fn approval_status(state: &AppState, account_id: Uuid) -> AuthResult<ApprovalStatus> {
    let Some(account) = state.store.find_by_id(account_id).await? else {
        return Ok(ApprovalStatus::default());
    };
    let now = OffsetDateTime::now_utc();
    let ttl = pending_ttl(state);

    let mut preview = account.clone();
    if !machine::expire_if_stale(&mut preview, ttl, now) {
        return Ok(account.approval_state.status());
    }

    let (account, expired) = commit(state.store.as_ref(), account.id, |a| {
        Ok(machine::expire_if_stale(a, ttl, now))
    })
    .await?;
    if expired {
        info!(account_id = %account.id, "pending request expired");
        close_marker(state, account.id, PendingStatus::Declined, now).await;
    }
    Ok(account.approval_state.status())
}

/// APPROVED → NONE for an admin ending their session.
#[instrument(skip(state, account), fields(account_id = %account.id))]
pub async fn logout(state: &AppState, account: Account) -> AuthResult<()> {
    if !account.role.requires_approval() {
        return Ok(());
    }
    let now = OffsetDateTime::now_utc();
    commit(state.store.as_ref(), account.id, |a| Ok(machine::reset_on_logout(a, now))).await?;
    info!("admin approval reset on logout");
    Ok(())
}
