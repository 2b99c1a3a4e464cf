use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::accounts::{Account, ApprovalState, Role};

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Body of a login that did not fail. The suspended case carries the
/// account id as a field so clients never parse it out of a message.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Success {
        token: String,
        user: PublicUser,
    },
    AwaitingApproval {
        #[serde(rename = "userId")]
        user_id: Uuid,
        message: String,
    },
}

/// Public part of the account returned to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub approval_state: ApprovalState,
}

impl From<&Account> for PublicUser {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            email: a.email.clone(),
            role: a.role,
            is_active: a.active,
            approval_state: a.approval_state,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    #[serde(default)]
    pub email: String,
}

/// `POST /get-user-id` answer, in the legacy two-flag shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdResponse {
    pub user_id: Uuid,
    pub approval_pending: bool,
    pub login_approved: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperAdminResponse {
    pub is_super_admin: bool,
}

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub email: String,
    pub new_password: String,
}
