//! Example: Run the monitor in the background and print every new email.
//!
//! # Usage
//!
//! ```bash
//! export MAILBOX_USERNAME="qa-inbox@example.com"
//! export MAILBOX_PASSWORD="your-app-password"
//! export RUST_LOG=email_auth_flow=debug
//!
//! cargo run --example background_monitor
//! ```

use email_auth_flow::{extractor, MailboxConfig, MailboxMonitor};
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> email_auth_flow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("email_auth_flow=info")),
        )
        .with_span_events(FmtSpan::CLOSE)
        .init();
    dotenvy::dotenv().ok();

    let config = MailboxConfig::load(None)?;
    tracing::info!(imap_host = %config.imap_host, "Starting background monitor");

    let handle = MailboxMonitor::new(config).start_background(|email| {
        let found = extractor::extract_any(email);
        if found.success {
            println!(
                "[{}] {} -> {} ({:.2})",
                email.uid, email.subject, found.value, found.confidence
            );
        } else {
            println!("[{}] {} ({})", email.uid, email.subject, email.preview);
        }
    });

    println!("Watching for 60 seconds, press Ctrl+C to stop early");
    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(60)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    let monitor = handle.stop().await?;
    println!("Stopped at UID {:?}", monitor.state().last_seen_uid);
    Ok(())
}
