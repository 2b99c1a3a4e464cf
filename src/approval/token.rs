use axum::extract::FromRef;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::{error::TokenError, state::AppState};

/// Keeps decision tokens and session tokens from being swapped for each other.
const DECISION_AUDIENCE: &str = "login-decision";

#[derive(Debug, Serialize, Deserialize)]
struct DecisionClaims {
    sub: Uuid,
    email: String,
    iat: i64,
    exp: i64,
    aud: String,
}

/// What a valid decision token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedDecision {
    pub account_id: Uuid,
    pub email: String,
    pub issued_at: OffsetDateTime,
}

/// The approve/decline link pair mailed to the super-admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionLinks {
    pub approve_url: String,
    pub decline_url: String,
}

impl DecisionLinks {
    pub fn new(base_url: &str, token: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            approve_url: format!("{base}/approve?token={token}"),
            decline_url: format!("{base}/decline?token={token}"),
        }
    }
}

/// Stateless, HMAC-signed tokens behind the emailed decision links.
#[derive(Clone)]
pub struct DecisionTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl FromRef<AppState> for DecisionTokenCodec {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.config.jwt.secret.as_bytes(),
            Duration::hours(state.config.approval.decision_ttl_hours),
        )
    }
}

impl DecisionTokenCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn issue(&self, account_id: Uuid, email: &str) -> anyhow::Result<String> {
        self.issue_at(account_id, email, OffsetDateTime::now_utc())
    }

    pub fn issue_at(
        &self,
        account_id: Uuid,
        email: &str,
        issued_at: OffsetDateTime,
    ) -> anyhow::Result<String> {
        let claims = DecisionClaims {
            sub: account_id,
            email: email.to_string(),
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + self.ttl).unix_timestamp(),
            aud: DECISION_AUDIENCE.to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(account_id = %account_id, "decision token issued");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedDecision, TokenError> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Expiry is checked here against `now` rather than by `jsonwebtoken`,
    /// so an expired token always reports `Expired` with no leeway.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<VerifiedDecision, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_audience(&[DECISION_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);

        let data = decode::<DecisionClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature => TokenError::SignatureMismatch,
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;
        let claims = data.claims;

        if now.unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        let issued_at =
            OffsetDateTime::from_unix_timestamp(claims.iat).map_err(|_| TokenError::Malformed)?;

        debug!(account_id = %claims.sub, "decision token verified");
        Ok(VerifiedDecision {
            account_id: claims.sub,
            email: claims.email,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(secret: &str) -> DecisionTokenCodec {
        DecisionTokenCodec::new(secret.as_bytes(), Duration::hours(24))
    }

    #[test]
    fn verify_returns_what_issue_bound() {
        let codec = codec("dev-secret");
        let id = Uuid::new_v4();
        let token = codec.issue(id, "a@x.com").expect("issue");
        let verified = codec.verify(&token).expect("verify");
        assert_eq!(verified.account_id, id);
        assert_eq!(verified.email, "a@x.com");
    }

    #[test]
    fn token_expires_after_its_window() {
        let codec = codec("dev-secret");
        let issued = OffsetDateTime::now_utc() - Duration::hours(30);
        let token = codec.issue_at(Uuid::new_v4(), "a@x.com", issued).unwrap();

        assert_eq!(codec.verify(&token), Err(TokenError::Expired));
        assert!(codec
            .verify_at(&token, issued + Duration::hours(23))
            .is_ok());
        assert_eq!(
            codec.verify_at(&token, issued + Duration::hours(24)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn foreign_secret_is_a_signature_mismatch() {
        let token = codec("one").issue(Uuid::new_v4(), "a@x.com").unwrap();
        assert_eq!(codec("two").verify(&token), Err(TokenError::SignatureMismatch));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec("dev-secret");
        assert_eq!(codec.verify(""), Err(TokenError::Malformed));
        assert_eq!(codec.verify("not.a.jwt"), Err(TokenError::Malformed));
    }

    #[test]
    fn tampered_payload_does_not_verify() {
        let codec = codec("dev-secret");
        let token = codec.issue(Uuid::new_v4(), "a@x.com").unwrap();
        let other = codec.issue(Uuid::new_v4(), "b@x.com").unwrap();

        let mut parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        parts[1] = other_parts[1];
        let forged = parts.join(".");
        assert_eq!(codec.verify(&forged), Err(TokenError::SignatureMismatch));
    }

    #[test]
    fn links_share_one_token() {
        let links = DecisionLinks::new("https://gate.example/", "abc");
        assert_eq!(links.approve_url, "https://gate.example/approve?token=abc");
        assert_eq!(links.decline_url, "https://gate.example/decline?token=abc");
    }
}
