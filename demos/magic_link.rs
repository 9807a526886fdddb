//! Example: Sign in a test user with a magic link.
//!
//! Connects to the mailbox configured through `MAILBOX_*` variables, waits for a
//! sign-in link addressed to the test user and stores it in the user's session.
//!
//! # Usage
//!
//! ```bash
//! export MAILBOX_USERNAME="qa-inbox@example.com"
//! export MAILBOX_PASSWORD="your-app-password"
//! export TEST_USER_EMAIL="qa-inbox+signup@example.com"
//! # Set log level (trace, debug, info, warn, error)
//! export RUST_LOG=email_auth_flow=debug
//!
//! cargo run --example magic_link
//! ```

use email_auth_flow::{
    AuthFlowOrchestrator, AuthType, MailboxConfig, MailboxMonitor, OrchestratorConfig,
    SessionStore, TestUser,
};
use std::env;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> email_auth_flow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("email_auth_flow=info")),
        )
        .with_target(true)
        .init();
    dotenvy::dotenv().ok();

    let config = MailboxConfig::load(None)?;
    let user_email = env::var("TEST_USER_EMAIL").unwrap_or_else(|_| config.username.clone());

    let monitor = MailboxMonitor::new(config);
    let store = SessionStore::for_project(".")?;
    let mut orchestrator = AuthFlowOrchestrator::new(monitor, store).with_config(OrchestratorConfig {
        wait_timeout: Duration::from_secs(90),
        ..OrchestratorConfig::default()
    });

    let user = TestUser::new("demo-user", "local", AuthType::MagicLink).with_email(user_email);

    println!("Trigger a sign-in email for {:?} now...", user.email);
    let result = orchestrator.authenticate(&user).await;

    if result.success {
        println!("Signed in. Navigate to: {}", result.redirect_url.unwrap_or_default());
    } else if let Some(error) = result.error {
        eprintln!("Authentication failed: {}", error.detail);
        eprintln!("Suggested fix: {}", error.remedy);
    }

    Ok(())
}
