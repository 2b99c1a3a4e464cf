use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Account role. Only `Admin` goes through the approval gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    #[serde(alias = "super-admin")]
    SuperAdmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
            Role::SuperAdmin => "super_admin",
        }
    }

    pub fn requires_approval(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            "super_admin" | "super-admin" => Ok(Role::SuperAdmin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an account stands in the login-approval cycle.
///
/// `None` means no request has been made since the last logout (or ever).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    #[default]
    None,
    Pending,
    Approved,
    Declined,
}

impl ApprovalState {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalState::None => "none",
            ApprovalState::Pending => "pending",
            ApprovalState::Approved => "approved",
            ApprovalState::Declined => "declined",
        }
    }

    /// Boolean view served to pollers and older clients.
    pub fn status(self) -> ApprovalStatus {
        ApprovalStatus {
            approved: self == ApprovalState::Approved,
            declined: self == ApprovalState::Declined,
            approval_pending: self == ApprovalState::Pending,
        }
    }
}

impl FromStr for ApprovalState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(ApprovalState::None),
            "pending" => Ok(ApprovalState::Pending),
            "approved" => Ok(ApprovalState::Approved),
            "declined" => Ok(ApprovalState::Declined),
            other => anyhow::bail!("unknown approval state {other:?}"),
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of `GET /check-approval`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStatus {
    pub approved: bool,
    pub declined: bool,
    pub approval_pending: bool,
}

/// Account record as held by the credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,         // always normalized
    pub password_hash: String, // Argon2 PHC string
    pub role: Role,
    pub active: bool,
    pub approval_state: ApprovalState,
    pub approved_at: Option<OffsetDateTime>,
    pub declined_at: Option<OffsetDateTime>,
    pub last_login_attempt: Option<OffsetDateTime>,
    pub last_logout: Option<OffsetDateTime>,
    pub password_changed_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl Account {
    pub fn new(name: &str, email: &str, password_hash: String, role: Role) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: normalize_email(email),
            password_hash,
            role,
            active: true,
            approval_state: ApprovalState::None,
            approved_at: None,
            declined_at: None,
            last_login_attempt: None,
            last_logout: None,
            password_changed_at: now,
            created_at: now,
        }
    }

    /// Whether a correct password is enough to open a session.
    pub fn can_complete_login(&self) -> bool {
        self.active
            && (!self.role.requires_approval() || self.approval_state == ApprovalState::Approved)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Approved,
    Declined,
}

impl PendingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Approved => "approved",
            PendingStatus::Declined => "declined",
        }
    }
}

impl FromStr for PendingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "approved" => Ok(PendingStatus::Approved),
            "declined" => Ok(PendingStatus::Declined),
            other => anyhow::bail!("unknown pending status {other:?}"),
        }
    }
}

/// Audit trail of approval requests. Never consulted for gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub status: PendingStatus,
    pub requested_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_view_never_sets_two_flags() {
        for state in [
            ApprovalState::None,
            ApprovalState::Pending,
            ApprovalState::Approved,
            ApprovalState::Declined,
        ] {
            let s = state.status();
            let set = [s.approved, s.declined, s.approval_pending]
                .iter()
                .filter(|b| **b)
                .count();
            assert!(set <= 1, "{state} produced {s:?}");
        }
        assert_eq!(ApprovalState::None.status(), ApprovalStatus::default());
    }

    #[test]
    fn status_serializes_with_legacy_field_names() {
        let json = serde_json::to_value(ApprovalState::Pending.status()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"approved": false, "declined": false, "approvalPending": true})
        );
    }

    #[test]
    fn only_admins_need_approval() {
        let mut user = Account::new("U", "u@x.com", "h".into(), Role::User);
        let mut boss = Account::new("S", "s@x.com", "h".into(), Role::SuperAdmin);
        let mut admin = Account::new("A", "A@X.com ", "h".into(), Role::Admin);
        assert!(user.can_complete_login());
        assert!(boss.can_complete_login());
        assert!(!admin.can_complete_login());
        assert_eq!(admin.email, "a@x.com");

        admin.approval_state = ApprovalState::Approved;
        assert!(admin.can_complete_login());

        for account in [&mut user, &mut boss, &mut admin] {
            account.active = false;
            assert!(!account.can_complete_login());
        }
    }

    #[test]
    fn role_parses_both_super_admin_spellings() {
        assert_eq!("super-admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!("super_admin".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert!("root".parse::<Role>().is_err());
    }
}
