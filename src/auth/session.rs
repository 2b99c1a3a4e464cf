use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    accounts::{Account, ApprovalState, Role},
    config::JwtConfig,
    error::AuthError,
    state::AppState,
};

/// Session JWT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    /// `password_changed_at` of the account when the session was issued,
    /// in unix nanoseconds.
    pub pwd: i64,
}

#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        let JwtConfig {
            secret,
            issuer,
            audience,
            ttl_minutes,
        } = state.config.jwt.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            audience,
            ttl: Duration::minutes(ttl_minutes),
        }
    }
}

impl SessionKeys {
    pub fn issue(&self, account: &Account) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            sub: account.id,
            email: account.email.clone(),
            role: account.role,
            iat: now.unix_timestamp(),
            exp: (now + self.ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            pwd: password_stamp(account.password_changed_at),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(account_id = %account.id, "session issued");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}

/// Sub-second resolution, so two changes within one second still differ.
fn password_stamp(changed_at: OffsetDateTime) -> i64 {
    i64::try_from(changed_at.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}

/// Why a structurally valid session no longer counts.
fn session_is_stale(claims: &SessionClaims, account: &Account) -> Option<&'static str> {
    if !account.active {
        return Some("account deactivated");
    }
    if password_stamp(account.password_changed_at) > claims.pwd {
        return Some("password changed since session was issued");
    }
    if account.role.requires_approval() && account.approval_state != ApprovalState::Approved {
        return Some("admin approval no longer in force");
    }
    None
}

fn bearer(parts: &Parts) -> Result<Option<&str>, AuthError> {
    let Some(header) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = header
        .to_str()
        .map_err(|_| AuthError::Unauthorized("Invalid Authorization header".into()))?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(Some)
        .ok_or_else(|| AuthError::Unauthorized("Invalid Authorization header".into()))
}

async fn resolve(state: &AppState, token: &str) -> Result<Account, AuthError> {
    let keys = SessionKeys::from_ref(state);
    let claims = keys.verify(token).map_err(|_| {
        warn!("invalid or expired session token");
        AuthError::Unauthorized("Invalid or expired token".into())
    })?;
    let account = state
        .store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AuthError::Unauthorized("Invalid or expired token".into()))?;
    if let Some(reason) = session_is_stale(&claims, &account) {
        warn!(account_id = %account.id, reason, "stale session rejected");
        return Err(AuthError::Unauthorized("Session is no longer valid".into()));
    }
    Ok(account)
}

/// A caller holding a live session.
pub struct AuthUser(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(parts)?
            .ok_or_else(|| AuthError::Unauthorized("Missing Authorization header".into()))?;
        Ok(AuthUser(resolve(state, token).await?))
    }
}

/// Like [`AuthUser`], but a missing or dead session is not an error.
pub struct MaybeAuthUser(pub Option<Account>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Ok(Some(token)) = bearer(parts) else {
            return Ok(MaybeAuthUser(None));
        };
        match resolve(state, token).await {
            Ok(account) => Ok(MaybeAuthUser(Some(account))),
            Err(AuthError::Internal(e)) => Err(AuthError::Internal(e)),
            Err(_) => Ok(MaybeAuthUser(None)),
        }
    }
}

/// A caller whose session belongs to the designated super-admin.
pub struct SuperAdmin(pub Account);

#[async_trait]
impl FromRequestParts<AppState> for SuperAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(account) = AuthUser::from_request_parts(parts, state).await?;
        if !state.is_super_admin(&account) {
            warn!(account_id = %account.id, "super-admin route refused");
            return Err(AuthError::Forbidden("Not authorized".into()));
        }
        Ok(SuperAdmin(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> SessionKeys {
        let (state, _, _) = AppState::fake();
        SessionKeys::from_ref(&state)
    }

    fn approved_admin() -> Account {
        let mut a = Account::new("Ada", "ada@x.com", "h".into(), Role::Admin);
        a.approval_state = ApprovalState::Approved;
        a
    }

    #[test]
    fn issue_and_verify_session() {
        let keys = keys();
        let account = approved_admin();
        let token = keys.issue(&account).expect("issue");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, account.id);
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.role, Role::Admin);
    }

    #[test]
    fn verify_rejects_other_audience() {
        let good = keys();
        let mut config = crate::config::AppConfig::for_tests();
        config.jwt.audience = "someone-else".into();
        let (state, _, _) = AppState::fake_with(config, Default::default());
        let bad = SessionKeys::from_ref(&state);

        let token = good.issue(&approved_admin()).unwrap();
        assert!(bad.verify(&token).is_err());
    }

    #[test]
    fn password_change_invalidates_older_sessions() {
        let keys = keys();
        let mut account = approved_admin();
        let claims = keys.verify(&keys.issue(&account).unwrap()).unwrap();
        assert_eq!(session_is_stale(&claims, &account), None);

        account.password_changed_at += Duration::seconds(5);
        assert!(session_is_stale(&claims, &account).is_some());
    }

    #[test]
    fn password_change_within_the_same_second_still_counts() {
        let keys = keys();
        let mut account = approved_admin();
        account.password_changed_at = account
            .password_changed_at
            .replace_nanosecond(100_000_000)
            .unwrap();
        let claims = keys.verify(&keys.issue(&account).unwrap()).unwrap();
        let second = account.password_changed_at.unix_timestamp();

        account.password_changed_at += Duration::milliseconds(1);
        assert_eq!(account.password_changed_at.unix_timestamp(), second);
        assert!(session_is_stale(&claims, &account).is_some());
    }

    #[test]
    fn admin_session_dies_with_its_approval() {
        let keys = keys();
        let mut account = approved_admin();
        let claims = keys.verify(&keys.issue(&account).unwrap()).unwrap();

        account.approval_state = ApprovalState::None;
        assert!(session_is_stale(&claims, &account).is_some());

        let mut user = Account::new("U", "u@x.com", "h".into(), Role::User);
        let claims = keys.verify(&keys.issue(&user).unwrap()).unwrap();
        assert_eq!(session_is_stale(&claims, &user), None);
        user.active = false;
        assert!(session_is_stale(&claims, &user).is_some());
    }
}
