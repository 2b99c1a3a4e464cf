use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    model::{Account, PendingLogin, PendingStatus},
    repo::{AccountStore, DuplicateEmail},
};

/// Process-local store for `DATABASE_URL=memory://` and for tests.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    pending: RwLock<Vec<PendingLogin>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().find(|a| a.email == email).cloned())
    }

    async fn create(&self, account: &Account) -> anyhow::Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.values().any(|a| a.email == account.email) {
            return Err(DuplicateEmail(account.email.clone()).into());
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> anyhow::Result<()> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id) {
            Some(stored) => {
                *stored = account.clone();
                Ok(())
            }
            None => anyhow::bail!("account {} does not exist", account.id),
        }
    }

    async fn compare_and_update(
        &self,
        account: &Account,
        expected: &Account,
    ) -> anyhow::Result<bool> {
        let mut accounts = self.accounts.write().await;
        let Some(stored) = accounts.get_mut(&account.id) else {
            return Ok(false);
        };
        if stored.approval_state != expected.approval_state || stored.active != expected.active {
            return Ok(false);
        }
        stored.active = account.active;
        stored.approval_state = account.approval_state;
        stored.approved_at = account.approved_at;
        stored.declined_at = account.declined_at;
        stored.last_login_attempt = account.last_login_attempt;
        stored.last_logout = account.last_logout;
        Ok(true)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<bool> {
        let mut accounts = self.accounts.write().await;
        let Some(stored) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        stored.active = active;
        Ok(true)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let mut accounts = self.accounts.write().await;
        let Some(stored) = accounts.get_mut(&id) else {
            return Ok(false);
        };
        stored.password_hash = password_hash.to_string();
        stored.password_changed_at = changed_at;
        Ok(true)
    }

    async fn record_pending_login(
        &self,
        account: &Account,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut pending = self.pending.write().await;
        let open = pending
            .iter()
            .any(|p| p.account_id == account.id && p.status == PendingStatus::Pending);
        if !open {
            pending.push(PendingLogin {
                id: Uuid::new_v4(),
                account_id: account.id,
                email: account.email.clone(),
                status: PendingStatus::Pending,
                requested_at: at,
                processed_at: None,
            });
        }
        Ok(())
    }

    async fn resolve_pending_login(
        &self,
        account_id: Uuid,
        status: PendingStatus,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut pending = self.pending.write().await;
        for marker in pending
            .iter_mut()
            .filter(|p| p.account_id == account_id && p.status == PendingStatus::Pending)
        {
            marker.status = status;
            marker.processed_at = Some(at);
        }
        Ok(())
    }

    async fn pending_logins(&self, account_id: Uuid) -> anyhow::Result<Vec<PendingLogin>> {
        let pending = self.pending.read().await;
        let mut markers: Vec<_> = pending
            .iter()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        markers.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(markers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{ApprovalState, Role};

    fn admin(email: &str) -> Account {
        Account::new("Admin", email, "hash".into(), Role::Admin)
    }

    #[tokio::test]
    async fn create_rejects_duplicate_email() {
        let store = MemoryAccountStore::new();
        store.create(&admin("a@x.com")).await.expect("first create");
        let err = store.create(&admin("a@x.com")).await.unwrap_err();
        assert!(err.is::<DuplicateEmail>());
    }

    #[tokio::test]
    async fn compare_and_update_only_writes_when_state_matches() {
        let store = MemoryAccountStore::new();
        let original = admin("a@x.com");
        store.create(&original).await.unwrap();

        let mut pending = original.clone();
        pending.approval_state = ApprovalState::Pending;
        assert!(store.compare_and_update(&pending, &original).await.unwrap());

        let mut declined = original.clone();
        declined.approval_state = ApprovalState::Declined;
        assert!(!store.compare_and_update(&declined, &original).await.unwrap());

        let stored = store.find_by_id(original.id).await.unwrap().unwrap();
        assert_eq!(stored.approval_state, ApprovalState::Pending);
    }

    #[tokio::test]
    async fn compare_and_update_refuses_after_a_deactivation() {
        let store = MemoryAccountStore::new();
        let snapshot = admin("a@x.com");
        store.create(&snapshot).await.unwrap();
        assert!(store.set_active(snapshot.id, false).await.unwrap());

        let mut next = snapshot.clone();
        next.approval_state = ApprovalState::Pending;
        assert!(!store.compare_and_update(&next, &snapshot).await.unwrap());

        let stored = store.find_by_id(snapshot.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.approval_state, ApprovalState::None);
    }

    #[tokio::test]
    async fn targeted_writes_leave_approval_state_alone() {
        let store = MemoryAccountStore::new();
        let mut account = admin("a@x.com");
        account.approval_state = ApprovalState::Approved;
        store.create(&account).await.unwrap();

        let later = account.password_changed_at + time::Duration::seconds(1);
        assert!(store.set_password(account.id, "new-hash", later).await.unwrap());
        assert!(store.set_active(account.id, false).await.unwrap());
        assert!(!store.set_active(Uuid::new_v4(), false).await.unwrap());

        let stored = store.find_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new-hash");
        assert_eq!(stored.password_changed_at, later);
        assert!(!stored.active);
        assert_eq!(stored.approval_state, ApprovalState::Approved);
    }

    #[tokio::test]
    async fn only_one_pending_marker_is_open_at_a_time() {
        let store = MemoryAccountStore::new();
        let account = admin("a@x.com");
        let now = OffsetDateTime::now_utc();

        store.record_pending_login(&account, now).await.unwrap();
        store.record_pending_login(&account, now).await.unwrap();
        assert_eq!(store.pending_logins(account.id).await.unwrap().len(), 1);

        store
            .resolve_pending_login(account.id, PendingStatus::Approved, now)
            .await
            .unwrap();
        store.record_pending_login(&account, now).await.unwrap();

        let markers = store.pending_logins(account.id).await.unwrap();
        assert_eq!(markers.len(), 2);
        assert_eq!(
            markers
                .iter()
                .filter(|m| m.status == PendingStatus::Pending)
                .count(),
            1
        );
    }
}
