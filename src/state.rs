use std::sync::Arc;

use tracing::info;

use crate::accounts::{normalize_email, Account, AccountStore, MemoryAccountStore, PgAccountStore, Role};
use crate::auth::password::hash_password;
use crate::config::AppConfig;
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AccountStore>,
    pub notifier: Arc<dyn Notifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = if config.database_url.starts_with("memory:") {
            info!("using in-memory account store; nothing will survive a restart");
            Arc::new(MemoryAccountStore::new()) as Arc<dyn AccountStore>
        } else {
            Arc::new(PgAccountStore::connect(&config.database_url).await?) as Arc<dyn AccountStore>
        };

        let notifier = match &config.mail {
            Some(mail) => Arc::new(SmtpNotifier::new(mail, &config.approval.super_admin_email)?)
                as Arc<dyn Notifier>,
            None => Arc::new(LogNotifier) as Arc<dyn Notifier>,
        };

        let state = Self::from_parts(store, notifier, config);
        state.bootstrap_super_admin().await?;
        Ok(state)
    }

    pub fn from_parts(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn Notifier>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn is_super_admin(&self, account: &Account) -> bool {
        account.role == Role::SuperAdmin
            && account.email == self.config.approval.super_admin_email
    }

    /// Creates the configured super-admin when a bootstrap password is set
    /// and the account does not exist yet.
    pub async fn bootstrap_super_admin(&self) -> anyhow::Result<()> {
        let Some(password) = self.config.approval.super_admin_password.as_deref() else {
            return Ok(());
        };
        let email = normalize_email(&self.config.approval.super_admin_email);
        if self.store.find_by_email(&email).await?.is_some() {
            return Ok(());
        }
        let hash = hash_password(password)?;
        let account = Account::new("Super Admin", &email, hash, Role::SuperAdmin);
        self.store.create(&account).await?;
        info!(account_id = %account.id, email = %email, "super-admin bootstrapped");
        Ok(())
    }

    #[cfg(test)]
    pub fn fake() -> (
        Self,
        Arc<MemoryAccountStore>,
        Arc<crate::notify::testing::RecordingNotifier>,
    ) {
        Self::fake_with(AppConfig::for_tests(), Default::default())
    }

    #[cfg(test)]
    pub fn fake_with(
        config: AppConfig,
        notifier: crate::notify::testing::RecordingNotifier,
    ) -> (
        Self,
        Arc<MemoryAccountStore>,
        Arc<crate::notify::testing::RecordingNotifier>,
    ) {
        let store = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(notifier);
        let state = Self::from_parts(store.clone(), notifier.clone(), Arc::new(config));
        (state, store, notifier)
    }
}
