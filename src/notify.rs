//! Outbound notifications. Every send is best-effort: callers log a
//! [`NotificationDispatchFailed`] and carry on, because the state change it
//! describes has already been committed.

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    accounts::Account,
    approval::{Decision, DecisionLinks},
    config::MailConfig,
};

#[derive(Debug, Error)]
#[error("notification dispatch failed: {reason}")]
pub struct NotificationDispatchFailed {
    pub reason: String,
}

impl NotificationDispatchFailed {
    fn new(reason: impl std::fmt::Display) -> Self {
        Self {
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Asks the super-admin to approve or decline `account`'s login.
    async fn send_decision_request(
        &self,
        account: &Account,
        links: &DecisionLinks,
    ) -> Result<(), NotificationDispatchFailed>;

    /// Tells the requester how their request was decided.
    async fn send_decision_outcome(
        &self,
        account: &Account,
        decision: Decision,
    ) -> Result<(), NotificationDispatchFailed>;
}

fn decision_request_body(account: &Account, links: &DecisionLinks) -> String {
    format!(
        r#"Admin Login Request

Admin {email} is requesting access to the system.
User ID: {id}
Request Time: {at}

To approve: {approve}
To decline: {decline}

Both links expire after a while. If you did not expect this email, ignore it.
"#,
        email = account.email,
        id = account.id,
        at = account
            .last_login_attempt
            .map(|t| t.to_string())
            .unwrap_or_else(|| "unknown".into()),
        approve = links.approve_url,
        decline = links.decline_url,
    )
}

fn decision_outcome_body(account: &Account, decision: Decision) -> (&'static str, String) {
    match decision {
        Decision::Approve => (
            "Login access approved",
            format!(
                "Hello {},\n\nYour login access has been approved by the administrator.\n\
                 Go to the login page and sign in again with your email and password.\n",
                account.name
            ),
        ),
        Decision::Decline => (
            "Login access declined",
            format!(
                "Hello {},\n\nYour login access request has been declined.\n\
                 If you believe this is an error, contact your administrator.\n",
                account.name
            ),
        ),
    }
}

/// SMTP delivery through `lettre`.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    super_admin: Mailbox,
}

impl SmtpNotifier {
    pub fn new(config: &MailConfig, super_admin_email: &str) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::from_url(&config.smtp_url)
            .context("invalid SMTP_URL")?
            .build();
        let from = format!("Admin System <{}>", config.from_address)
            .parse()
            .context("invalid MAIL_FROM")?;
        let super_admin = super_admin_email
            .parse()
            .context("invalid SUPER_ADMIN_EMAIL")?;
        Ok(Self {
            transport,
            from,
            super_admin,
        })
    }

    async fn send(
        &self,
        to: Mailbox,
        subject: &str,
        body: String,
    ) -> Result<(), NotificationDispatchFailed> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(NotificationDispatchFailed::new)?;
        self.transport
            .send(email)
            .await
            .map_err(NotificationDispatchFailed::new)?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send_decision_request(
        &self,
        account: &Account,
        links: &DecisionLinks,
    ) -> Result<(), NotificationDispatchFailed> {
        self.send(
            self.super_admin.clone(),
            "Admin Login Request Approval",
            decision_request_body(account, links),
        )
        .await?;
        info!(account_id = %account.id, "decision request mailed to super-admin");
        Ok(())
    }

    async fn send_decision_outcome(
        &self,
        account: &Account,
        decision: Decision,
    ) -> Result<(), NotificationDispatchFailed> {
        let to: Mailbox = account
            .email
            .parse()
            .map_err(NotificationDispatchFailed::new)?;
        let (subject, body) = decision_outcome_body(account, decision);
        self.send(to, subject, body).await?;
        info!(account_id = %account.id, decision = decision.as_str(), "decision outcome mailed");
        Ok(())
    }
}

/// Used when SMTP is not configured. Writes the decision links to the log
/// so a local setup can still be driven end to end.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_decision_request(
        &self,
        account: &Account,
        links: &DecisionLinks,
    ) -> Result<(), NotificationDispatchFailed> {
        warn!(
            account_id = %account.id,
            email = %account.email,
            approve = %links.approve_url,
            decline = %links.decline_url,
            "SMTP not configured; decision links logged instead of mailed"
        );
        Ok(())
    }

    async fn send_decision_outcome(
        &self,
        account: &Account,
        decision: Decision,
    ) -> Result<(), NotificationDispatchFailed> {
        info!(account_id = %account.id, decision = decision.as_str(), "decision outcome (not mailed)");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;

    #[test]
    fn request_body_carries_both_links() {
        let account = Account::new("Ada", "ada@x.com", "h".into(), Role::Admin);
        let links = DecisionLinks::new("http://gate.test", "tok");
        let body = decision_request_body(&account, &links);
        assert!(body.contains("http://gate.test/approve?token=tok"));
        assert!(body.contains("http://gate.test/decline?token=tok"));
        assert!(body.contains("ada@x.com"));
    }

    #[test]
    fn smtp_notifier_rejects_bad_url() {
        let config = MailConfig {
            smtp_url: "not a url".into(),
            from_address: "gate@x.com".into(),
        };
        assert!(SmtpNotifier::new(&config, "boss@x.com").is_err());
    }
}
