//! Waits on the command line for a super-admin to decide a suspended login.
//!
//! Exit codes: 0 approved, 2 declined, 130 interrupted.

use std::{process::ExitCode, time::Duration};

use admin_gate::poller::{ApprovalPoller, HttpStatusSource, PollOutcome, PollerConfig};
use clap::Parser;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "await-approval", about = "Poll until a login request is approved or declined")]
struct Args {
    /// Base URL of the gate server.
    #[arg(long, env = "GATE_URL", default_value = "http://localhost:8080")]
    server: String,

    /// Id returned by the suspended login.
    #[arg(long)]
    user_id: Uuid,

    /// Seconds between status checks.
    #[arg(long, default_value_t = 3)]
    interval: u64,

    /// Back off up to this many seconds while the server is unreachable.
    #[arg(long)]
    backoff: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "admin_gate=info".to_string());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = PollerConfig {
        interval: Duration::from_secs(args.interval.max(1)),
        max_backoff: args.backoff.map(Duration::from_secs),
    };
    let poller = ApprovalPoller::new(HttpStatusSource::new(&args.server)?, config);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = cancel_tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for ctrl-c");
                // Dropping the sender would read as a cancel.
                std::future::pending::<()>().await;
            }
        }
    });

    println!("Waiting for admin approval...");
    let code = match poller.wait(args.user_id, cancel_rx).await {
        PollOutcome::Approved => {
            println!("Login approved. Sign in again to continue.");
            ExitCode::SUCCESS
        }
        PollOutcome::Declined => {
            println!("Login declined. Contact an administrator.");
            ExitCode::from(2)
        }
        PollOutcome::Cancelled => {
            println!("Stopped waiting.");
            ExitCode::from(130)
        }
    };
    Ok(code)
}
