//! Transitions of [`ApprovalState`] for a single account.
//!
//! ```text
//! NONE ──login──▶ PENDING ──approve──▶ APPROVED ──logout──▶ NONE
//!                   │  ▲
//!                decline└──────login──── DECLINED
//! ```
//!
//! Functions here only mutate the in-memory [`Account`]; persisting and
//! notifying is the caller's job (see `approval::service`).

use time::{Duration, OffsetDateTime};

use crate::{
    accounts::{Account, ApprovalState, PendingStatus},
    error::{AuthError, AuthResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

impl Decision {
    pub fn target(self) -> ApprovalState {
        match self {
            Decision::Approve => ApprovalState::Approved,
            Decision::Decline => ApprovalState::Declined,
        }
    }

    pub fn marker_status(self) -> PendingStatus {
        match self {
            Decision::Approve => PendingStatus::Approved,
            Decision::Decline => PendingStatus::Declined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Decline => "decline",
        }
    }
}

/// What a decision did to the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A pending request was resolved.
    Decided(ApprovalState),
    /// The same decision landed again; state and timestamp re-applied.
    Reapplied(ApprovalState),
    /// The other link of the pair got there first. Nothing changed.
    AlreadyDecided(ApprovalState),
}

impl Transition {
    pub fn state(self) -> ApprovalState {
        match self {
            Transition::Decided(s) | Transition::Reapplied(s) | Transition::AlreadyDecided(s) => s,
        }
    }
}

/// A gated login attempt: anything but APPROVED moves to PENDING.
///
/// Returns the state the account was in. Calling this on an approved
/// account is a logic error and leaves it untouched.
pub fn request_approval(account: &mut Account, now: OffsetDateTime) -> ApprovalState {
    let previous = account.approval_state;
    if previous == ApprovalState::Approved {
        return previous;
    }
    account.approval_state = ApprovalState::Pending;
    account.last_login_attempt = Some(now);
    previous
}

pub fn apply_decision(
    account: &mut Account,
    decision: Decision,
    now: OffsetDateTime,
) -> AuthResult<Transition> {
    use ApprovalState as S;

    let current = account.approval_state;
    let transition = match (current, decision) {
        (S::None, _) => return Err(AuthError::NoPendingRequest),
        (S::Pending, d) => Transition::Decided(d.target()),
        (S::Approved, Decision::Approve) | (S::Declined, Decision::Decline) => {
            Transition::Reapplied(current)
        }
        (S::Approved, Decision::Decline) | (S::Declined, Decision::Approve) => {
            return Ok(Transition::AlreadyDecided(current));
        }
    };

    match decision {
        Decision::Approve => {
            account.approval_state = S::Approved;
            account.active = true;
            account.approved_at = Some(now);
            account.declined_at = None;
        }
        // `active` is deliberately left alone.
        Decision::Decline => {
            account.approval_state = S::Declined;
            account.declined_at = Some(now);
        }
    }
    Ok(transition)
}

/// Admin logout: APPROVED goes back to NONE so the next login needs a
/// fresh sign-off. Returns whether anything changed.
pub fn reset_on_logout(account: &mut Account, now: OffsetDateTime) -> bool {
    if !account.role.requires_approval() {
        return false;
    }
    account.last_logout = Some(now);
    if account.approval_state == ApprovalState::Approved {
        account.approval_state = ApprovalState::None;
    }
    true
}

/// Optional pending-expiry policy: a request older than `ttl` is declined.
pub fn expire_if_stale(account: &mut Account, ttl: Option<Duration>, now: OffsetDateTime) -> bool {
    let (Some(ttl), ApprovalState::Pending) = (ttl, account.approval_state) else {
        return false;
    };
    let requested = account.last_login_attempt.unwrap_or(account.created_at);
    if now - requested < ttl {
        return false;
    }
    account.approval_state = ApprovalState::Declined;
    account.declined_at = Some(now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;

    fn admin() -> Account {
        Account::new("Ada", "ada@x.com", "hash".into(), Role::Admin)
    }

    fn pending_admin() -> Account {
        let mut a = admin();
        request_approval(&mut a, OffsetDateTime::now_utc());
        a
    }

    #[test]
    fn login_attempt_moves_none_and_declined_to_pending() {
        let now = OffsetDateTime::now_utc();
        for start in [ApprovalState::None, ApprovalState::Declined, ApprovalState::Pending] {
            let mut a = admin();
            a.approval_state = start;
            assert_eq!(request_approval(&mut a, now), start);
            assert_eq!(a.approval_state, ApprovalState::Pending);
            assert_eq!(a.last_login_attempt, Some(now));
        }
    }

    #[test]
    fn approve_reactivates_and_clears_decline() {
        let mut a = pending_admin();
        a.active = false;
        a.declined_at = Some(OffsetDateTime::UNIX_EPOCH);
        let now = OffsetDateTime::now_utc();

        let t = apply_decision(&mut a, Decision::Approve, now).unwrap();
        assert_eq!(t, Transition::Decided(ApprovalState::Approved));
        assert!(a.active);
        assert_eq!(a.approved_at, Some(now));
        assert_eq!(a.declined_at, None);
    }

    #[test]
    fn decline_leaves_active_untouched() {
        for active in [true, false] {
            let mut a = pending_admin();
            a.active = active;
            apply_decision(&mut a, Decision::Decline, OffsetDateTime::now_utc()).unwrap();
            assert_eq!(a.approval_state, ApprovalState::Declined);
            assert_eq!(a.active, active);
        }
    }

    #[test]
    fn approving_twice_matches_approving_once() {
        let now = OffsetDateTime::now_utc();
        let mut once = pending_admin();
        apply_decision(&mut once, Decision::Approve, now).unwrap();

        let mut twice = once.clone();
        let t = apply_decision(&mut twice, Decision::Approve, now).unwrap();
        assert_eq!(t, Transition::Reapplied(ApprovalState::Approved));
        assert_eq!(once, twice);
    }

    #[test]
    fn second_link_of_the_pair_loses_quietly() {
        let now = OffsetDateTime::now_utc();
        let mut a = pending_admin();
        apply_decision(&mut a, Decision::Approve, now).unwrap();
        let snapshot = a.clone();

        let t = apply_decision(&mut a, Decision::Decline, now).unwrap();
        assert_eq!(t, Transition::AlreadyDecided(ApprovalState::Approved));
        assert_eq!(a, snapshot);
    }

    #[test]
    fn decision_without_a_request_is_refused() {
        let mut a = admin();
        let err = apply_decision(&mut a, Decision::Approve, OffsetDateTime::now_utc()).unwrap_err();
        assert!(matches!(err, AuthError::NoPendingRequest));
        assert_eq!(a.approval_state, ApprovalState::None);
    }

    #[test]
    fn logout_resets_only_admins() {
        let now = OffsetDateTime::now_utc();
        let mut a = pending_admin();
        apply_decision(&mut a, Decision::Approve, now).unwrap();
        assert!(reset_on_logout(&mut a, now));
        assert_eq!(a.approval_state, ApprovalState::None);
        assert_eq!(a.last_logout, Some(now));

        let mut boss = Account::new("Boss", "boss@x.com", "hash".into(), Role::SuperAdmin);
        assert!(!reset_on_logout(&mut boss, now));
        assert_eq!(boss.last_logout, None);
    }

    #[test]
    fn stale_requests_expire_only_when_a_ttl_is_set() {
        let mut a = pending_admin();
        let later = a.last_login_attempt.unwrap() + Duration::hours(49);

        assert!(!expire_if_stale(&mut a, None, later));
        assert!(!expire_if_stale(&mut a, Some(Duration::hours(72)), later));
        assert_eq!(a.approval_state, ApprovalState::Pending);

        assert!(expire_if_stale(&mut a, Some(Duration::hours(48)), later));
        assert_eq!(a.approval_state, ApprovalState::Declined);
        assert_eq!(a.declined_at, Some(later));
    }
}
