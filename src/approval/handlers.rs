use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{accounts::ApprovalStatus, error::AuthError, state::AppState};

use super::{machine::Decision, pages, service};

pub fn approval_routes() -> Router<AppState> {
    Router::new()
        .route("/check-approval", get(check_approval))
        .route("/approve", get(approve))
        .route("/decline", get(decline))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckApprovalQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct DecisionQuery {
    pub token: Option<String>,
}

/// Unauthenticated on purpose: the poller has no session yet.
#[instrument(skip(state))]
pub async fn check_approval(
    State(state): State<AppState>,
    Query(q): Query<CheckApprovalQuery>,
) -> Result<Json<ApprovalStatus>, AuthError> {
    Ok(Json(service::approval_status(&state, q.user_id).await?))
}

async fn apply(state: &AppState, q: DecisionQuery, decision: Decision) -> Response {
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return pages::failure_page(decision, &AuthError::Validation("Token is required".into()));
    };
    match service::decide(state, &token, decision).await {
        Ok((account, transition)) => pages::decision_page(&account.email, decision, transition),
        Err(e) => pages::failure_page(decision, &e),
    }
}

#[instrument(skip_all)]
pub async fn approve(State(state): State<AppState>, Query(q): Query<DecisionQuery>) -> Response {
    apply(&state, q, Decision::Approve).await
}

#[instrument(skip_all)]
pub async fn decline(State(state): State<AppState>, Query(q): Query<DecisionQuery>) -> Response {
    apply(&state, q, Decision::Decline).await
}
