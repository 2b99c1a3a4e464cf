use axum::extract::FromRef;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    accounts::{normalize_email, Account},
    approval::service::request_approval,
    error::{AuthError, AuthResult},
    state::AppState,
};

use super::{
    password::{burn_verification, verify_password_blocking},
    session::SessionKeys,
};

/// Result of a login attempt that did not fail outright.
#[derive(Debug)]
pub enum LoginOutcome {
    Success { account: Account, session: String },
    /// The attempt was rejected but a decision was requested. Poll with
    /// `account_id`, then log in again once approved.
    AwaitingApproval { account_id: Uuid },
}

#[instrument(skip(state, password))]
pub async fn login(state: &AppState, email: &str, password: &str) -> AuthResult<LoginOutcome> {
    let email = normalize_email(email);

    let Some(account) = state.store.find_by_email(&email).await? else {
        burn_verification(password.to_string()).await;
        warn!("login for unknown email");
        return Err(AuthError::InvalidCredentials);
    };

    if !account.active {
        warn!(account_id = %account.id, "login for deactivated account");
        return Err(AuthError::AccountDeactivated);
    }

    let matches =
        verify_password_blocking(password.to_string(), account.password_hash.clone()).await?;
    if !matches {
        warn!(account_id = %account.id, "login with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    if !account.can_complete_login() {
        let account_id = request_approval(state, account).await?;
        return Ok(LoginOutcome::AwaitingApproval { account_id });
    }

    let session = SessionKeys::from_ref(state).issue(&account)?;
    info!(account_id = %account.id, role = %account.role, "login succeeded");
    Ok(LoginOutcome::Success { account, session })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::{AccountStore, ApprovalState, Role},
        auth::password::hash_password,
    };

    const PASSWORD: &str = "correct horse";

    async fn seed(state: &AppState, email: &str, role: Role, approval: ApprovalState) -> Account {
        let mut account = Account::new("T", email, hash_password(PASSWORD).unwrap(), role);
        account.approval_state = approval;
        state.store.create(&account).await.unwrap();
        account
    }

    #[tokio::test]
    async fn unapproved_admin_is_suspended_never_admitted() {
        let (state, store, notifier) = AppState::fake();
        for (i, start) in [ApprovalState::None, ApprovalState::Declined].into_iter().enumerate() {
            let account = seed(&state, &format!("a{i}@x.com"), Role::Admin, start).await;
            let outcome = login(&state, &account.email, PASSWORD).await.unwrap();
            match outcome {
                LoginOutcome::AwaitingApproval { account_id } => assert_eq!(account_id, account.id),
                other => panic!("expected suspension, got {other:?}"),
            }
            let stored = store.find_by_id(account.id).await.unwrap().unwrap();
            assert_eq!(stored.approval_state, ApprovalState::Pending);
        }
        assert_eq!(notifier.request_count(), 2);
    }

    #[tokio::test]
    async fn approved_admin_gets_a_session() {
        let (state, _, notifier) = AppState::fake();
        let account = seed(&state, "a@x.com", Role::Admin, ApprovalState::Approved).await;
        match login(&state, "A@X.com", PASSWORD).await.unwrap() {
            LoginOutcome::Success { account: a, session } => {
                assert_eq!(a.id, account.id);
                assert!(!session.is_empty());
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(notifier.request_count(), 0);
    }

    #[tokio::test]
    async fn users_and_super_admins_bypass_the_gate() {
        let (state, _, _) = AppState::fake();
        seed(&state, "u@x.com", Role::User, ApprovalState::None).await;
        seed(&state, "boss@example.com", Role::SuperAdmin, ApprovalState::None).await;
        for email in ["u@x.com", "boss@example.com"] {
            assert!(matches!(
                login(&state, email, PASSWORD).await.unwrap(),
                LoginOutcome::Success { .. }
            ));
        }
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let (state, store, _) = AppState::fake();
        let account = seed(&state, "a@x.com", Role::Admin, ApprovalState::None).await;

        let unknown = login(&state, "nobody@x.com", PASSWORD).await.unwrap_err();
        let wrong = login(&state, "a@x.com", "bad password").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(wrong, AuthError::InvalidCredentials));

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.approval_state, ApprovalState::None);
    }

    #[tokio::test]
    async fn deactivated_account_is_refused_even_when_approved() {
        let (state, store, _) = AppState::fake();
        let mut account = seed(&state, "a@x.com", Role::Admin, ApprovalState::Approved).await;
        account.active = false;
        store.update(&account).await.unwrap();

        let err = login(&state, "a@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDeactivated));
    }
}
