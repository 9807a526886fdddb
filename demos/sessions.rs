//! Example: Simulated authentication and session housekeeping.
//!
//! Needs no mailbox: bearer, API-key and form users are authenticated without
//! email, and their sessions are listed and swept.
//!
//! ```bash
//! cargo run --example sessions
//! ```

use async_trait::async_trait;
use email_auth_flow::{
    AuthFlowOrchestrator, AuthType, Email, MailProbe, SessionStore, TestUser,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// A probe with an empty mailbox; simulated auth types never consult it.
struct NoMail;

#[async_trait]
impl MailProbe for NoMail {
    async fn recent_emails(&mut self, _window: Duration) -> email_auth_flow::Result<Vec<Email>> {
        Ok(Vec::new())
    }
}

#[tokio::main]
async fn main() -> email_auth_flow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("email_auth_flow=debug"))
        .init();

    let dir = std::env::temp_dir().join("email-auth-flow-demo");
    let store = SessionStore::for_project(&dir)?;
    let mut orchestrator = AuthFlowOrchestrator::new(NoMail, store.clone());

    let users = [
        TestUser::new("api-bot", "staging", AuthType::Bearer).with_credential("token", "demo-token"),
        TestUser::new("partner", "staging", AuthType::ApiKey).with_credential("api_key", "k-123"),
        TestUser::new("shopper", "staging", AuthType::Form)
            .with_credential("username", "shopper")
            .with_credential("password", "hunter2"),
        TestUser::new("broken", "staging", AuthType::Basic),
    ];

    for user in &users {
        let result = orchestrator.authenticate(user).await;
        match (&result.error, result.success) {
            (_, true) => println!("{:<8} ok: headers={:?} cookies={}", user.id, result.headers, result.cookies.len()),
            (Some(error), false) => println!("{:<8} failed: {} ({})", user.id, error.detail, error.remedy),
            (None, false) => println!("{:<8} failed: {}", user.id, result.message),
        }
    }

    store.end_session("partner")?;
    for session in store.list_active_sessions()? {
        println!("active: {} until {:?}", session.user_id, session.expires_at);
    }
    println!("removed {} expired sessions", store.cleanup_expired_sessions()?);

    Ok(())
}
