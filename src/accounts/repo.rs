use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Account, PendingLogin, PendingStatus};

/// Returned by [`AccountStore::create`] when the email is taken.
#[derive(Debug, thiserror::Error)]
#[error("email {0} is already registered")]
pub struct DuplicateEmail(pub String);

/// Record store behind the login gate.
///
/// Competing approval writes go through [`AccountStore::compare_and_update`],
/// so the first decision to land wins and the loser re-reads.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>>;
    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>>;
    async fn create(&self, account: &Account) -> anyhow::Result<()>;
    async fn update(&self, account: &Account) -> anyhow::Result<()>;
    /// Writes the approval fields of `account` (state, timestamps, `active`)
    /// only if the stored `approval_state` and `active` still match
    /// `expected`, the copy the change was computed from.
    async fn compare_and_update(&self, account: &Account, expected: &Account)
        -> anyhow::Result<bool>;
    /// Returns `false` when no such account exists.
    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<bool>;
    /// Replaces the hash and stamps `changed_at`, which ends older sessions.
    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> anyhow::Result<bool>;
    /// Opens a pending marker unless one is already open for the account.
    async fn record_pending_login(&self, account: &Account, at: OffsetDateTime)
        -> anyhow::Result<()>;
    /// Closes the open marker, if any.
    async fn resolve_pending_login(
        &self,
        account_id: Uuid,
        status: PendingStatus,
        at: OffsetDateTime,
    ) -> anyhow::Result<()>;
    async fn pending_logins(&self, account_id: Uuid) -> anyhow::Result<Vec<PendingLogin>>;
}

#[derive(Debug, FromRow)]
struct AccountRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    active: bool,
    approval_state: String,
    approved_at: Option<OffsetDateTime>,
    declined_at: Option<OffsetDateTime>,
    last_login_attempt: Option<OffsetDateTime>,
    last_logout: Option<OffsetDateTime>,
    password_changed_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse()?,
            active: row.active,
            approval_state: row.approval_state.parse()?,
            approved_at: row.approved_at,
            declined_at: row.declined_at,
            last_login_attempt: row.last_login_attempt,
            last_logout: row.last_logout,
            password_changed_at: row.password_changed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PendingLoginRow {
    id: Uuid,
    account_id: Uuid,
    email: String,
    status: String,
    requested_at: OffsetDateTime,
    processed_at: Option<OffsetDateTime>,
}

impl TryFrom<PendingLoginRow> for PendingLogin {
    type Error = anyhow::Error;

    fn try_from(row: PendingLoginRow) -> Result<Self, Self::Error> {
        Ok(PendingLogin {
            id: row.id,
            account_id: row.account_id,
            email: row.email,
            status: row.status.parse()?,
            requested_at: row.requested_at,
            processed_at: row.processed_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, email, password_hash, role, active, approval_state, \
     approved_at, declined_at, last_login_attempt, last_logout, password_changed_at, created_at";

#[derive(Clone)]
pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;
        Ok(Self { db })
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn create(&self, account: &Account) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, name, email, password_hash, role, active, approval_state,
                                  approved_at, declined_at, last_login_attempt, last_logout,
                                  password_changed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.active)
        .bind(account.approval_state.as_str())
        .bind(account.approved_at)
        .bind(account.declined_at)
        .bind(account.last_login_attempt)
        .bind(account.last_logout)
        .bind(account.password_changed_at)
        .bind(account.created_at)
        .execute(&self.db)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(DuplicateEmail(account.email.clone()).into())
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert account")),
        }
    }

    async fn update(&self, account: &Account) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET name = $2, email = $3, password_hash = $4, role = $5, active = $6,
                approval_state = $7, approved_at = $8, declined_at = $9,
                last_login_attempt = $10, last_logout = $11, password_changed_at = $12
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .bind(account.active)
        .bind(account.approval_state.as_str())
        .bind(account.approved_at)
        .bind(account.declined_at)
        .bind(account.last_login_attempt)
        .bind(account.last_logout)
        .bind(account.password_changed_at)
        .execute(&self.db)
        .await
        .context("update account")?;
        Ok(())
    }

    async fn compare_and_update(
        &self,
        account: &Account,
        expected: &Account,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET active = $2, approval_state = $3, approved_at = $4, declined_at = $5,
                last_login_attempt = $6, last_logout = $7
            WHERE id = $1 AND approval_state = $8 AND active = $9
            "#,
        )
        .bind(account.id)
        .bind(account.active)
        .bind(account.approval_state.as_str())
        .bind(account.approved_at)
        .bind(account.declined_at)
        .bind(account.last_login_attempt)
        .bind(account.last_logout)
        .bind(expected.approval_state.as_str())
        .bind(expected.active)
        .execute(&self.db)
        .await
        .context("compare-and-update approval state")?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE accounts SET active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await
            .context("set account active flag")?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET password_hash = $2, password_changed_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(&self.db)
        .await
        .context("set account password")?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_pending_login(
        &self,
        account: &Account,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_logins (id, account_id, email, status, requested_at)
            SELECT $1, $2, $3, 'pending', $4
            WHERE NOT EXISTS (
                SELECT 1 FROM pending_logins WHERE account_id = $2 AND status = 'pending'
            )
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account.id)
        .bind(&account.email)
        .bind(at)
        .execute(&self.db)
        .await
        .context("insert pending login")?;
        Ok(())
    }

    async fn resolve_pending_login(
        &self,
        account_id: Uuid,
        status: PendingStatus,
        at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE pending_logins
            SET status = $2, processed_at = $3
            WHERE account_id = $1 AND status = 'pending'
            "#,
        )
        .bind(account_id)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.db)
        .await
        .context("resolve pending login")?;
        Ok(())
    }

    async fn pending_logins(&self, account_id: Uuid) -> anyhow::Result<Vec<PendingLogin>> {
        let rows = sqlx::query_as::<_, PendingLoginRow>(
            r#"
            SELECT id, account_id, email, status, requested_at, processed_at
            FROM pending_logins
            WHERE account_id = $1
            ORDER BY requested_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(PendingLogin::try_from).collect()
    }
}
