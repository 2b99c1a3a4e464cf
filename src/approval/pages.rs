//! Standalone pages for whoever clicks a decision link. The clicker is
//! usually not in the requester's browser session, so these never redirect.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

use crate::{accounts::ApprovalState, error::AuthError};

use super::machine::{Decision, Transition};

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, class: &str, heading: &str, lines: &[String]) -> String {
    let body: String = lines.iter().map(|l| format!("    <p>{l}</p>\n")).collect();
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <style>
    body {{ font-family: Arial, sans-serif; text-align: center; padding: 50px; }}
    .success {{ color: green; }}
    .error {{ color: red; }}
    .neutral {{ color: #555; }}
  </style>
</head>
<body>
  <h1 class="{class}">{heading}</h1>
{body}</body>
</html>
"#
    )
}

pub fn decision_page(email: &str, decision: Decision, transition: Transition) -> Response {
    let who = format!("<strong>{}</strong>", escape(email));
    let html = match (decision, transition) {
        (Decision::Approve, Transition::Decided(_) | Transition::Reapplied(_)) => page(
            "User Approved",
            "success",
            "User Approved Successfully",
            &[
                format!("User {who} has been approved for login access."),
                "They can now sign in to the system.".into(),
            ],
        ),
        (Decision::Decline, Transition::Decided(_) | Transition::Reapplied(_)) => page(
            "User Declined",
            "error",
            "Login Request Declined",
            &[
                format!("The login request from {who} has been declined."),
                "They will need to sign in again to file a new request.".into(),
            ],
        ),
        (_, Transition::AlreadyDecided(current)) => {
            let outcome = match current {
                ApprovalState::Approved => "approved",
                _ => "declined",
            };
            page(
                "Already Decided",
                "neutral",
                "Request Already Decided",
                &[
                    format!("The login request from {who} was already {outcome}."),
                    "Nothing was changed.".into(),
                ],
            )
        }
    };
    Html(html).into_response()
}

pub fn failure_page(decision: Decision, err: &AuthError) -> Response {
    let (status, reason) = match err {
        AuthError::Token(e) => (StatusCode::BAD_REQUEST, format!("This link cannot be used: {e}.")),
        AuthError::AccountNotFound => (
            StatusCode::NOT_FOUND,
            "The account this link refers to no longer exists.".to_string(),
        ),
        AuthError::NoPendingRequest => (
            StatusCode::CONFLICT,
            "There is no login request waiting for a decision.".to_string(),
        ),
        AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, escape(msg)),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong. Try the link again later.".to_string(),
        ),
    };
    let heading = match decision {
        Decision::Approve => "Approval Failed",
        Decision::Decline => "Decline Failed",
    };
    (status, Html(page(heading, "error", heading, &[reason]))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TokenError;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn email_is_escaped() {
        let response = decision_page(
            "<script>@x.com",
            Decision::Approve,
            Transition::Decided(ApprovalState::Approved),
        );
        let body = body_of(response).await;
        assert!(body.contains("&lt;script&gt;@x.com"));
        assert!(!body.contains("<script>"));
    }

    #[tokio::test]
    async fn expired_link_gets_a_readable_failure() {
        let response = failure_page(Decision::Decline, &AuthError::Token(TokenError::Expired));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_of(response).await;
        assert!(body.contains("Decline Failed"));
        assert!(body.contains("expired"));
    }
}
