//! # email-auth-flow
//!
//! Completes authentication flows whose last step arrives by email: magic links,
//! verification codes and forwarded 2FA/SMS codes.
//!
//! This crate provides:
//! - A [`MailboxMonitor`] that tracks an IMAP inbox by UID, either on demand or from a
//!   background task with a cancellation handle
//! - An [`extractor`] that classifies magic links and numeric codes with confidences
//! - A file-backed [`SessionStore`] with per-auth-type expiry
//! - An [`AuthFlowOrchestrator`] that waits for the artifact under a bounded timeout
//!   and merges it into the test user's session
//!
//! ## Quick Start
//!
//! ```no_run
//! use email_auth_flow::{
//!     AuthFlowOrchestrator, AuthType, MailboxConfig, MailboxMonitor, SessionStore, TestUser,
//! };
//!
//! # async fn example() -> email_auth_flow::Result<()> {
//! let config = MailboxConfig::load(None)?;
//! let monitor = MailboxMonitor::new(config);
//! let handle = monitor.start_background(|email| tracing::debug!(uid = email.uid, "mail"));
//!
//! let store = SessionStore::for_project(".")?;
//! let mut orchestrator = AuthFlowOrchestrator::new(handle, store);
//!
//! let user = TestUser::new("qa-1", "staging", AuthType::MagicLink)
//!     .with_email("qa-1@example.com");
//! let result = orchestrator.authenticate(&user).await;
//! if let Some(url) = &result.redirect_url {
//!     println!("navigate to {url}");
//! }
//!
//! orchestrator.into_probe().stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Extraction
//!
//! ```
//! use email_auth_flow::extractor;
//!
//! let code = extractor::extract_code("Your verification code: 482913");
//! assert!(code.success);
//! assert_eq!(code.value, "482913");
//! ```
//!
//! ## Error Handling
//!
//! Use [`Error::is_retryable`] to tell transient failures apart, and
//! [`Error::remedy`] for a message an operator can act on:
//!
//! ```
//! use email_auth_flow::Error;
//!
//! fn report(error: &Error) {
//!     eprintln!("{error} ({})", error.remedy());
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing`. Spans are named after the operation:
//!
//! - `MailboxMonitor::connect`, `MailboxMonitor::poll_once`, `MailboxMonitor::background`
//! - `ImapMailSource::open`, `imap::authenticate`, `imap::fetch`, `connection::establish`
//! - `SessionStore::get_session` and friends
//! - `AuthFlowOrchestrator::authenticate`, `AuthFlowOrchestrator::wait_for_artifact`
//!
//! Standard fields: `uid`, `uid_range`, `user_id`, `artifact`, `imap_host`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod error;
pub mod extractor;
pub mod known_servers;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod shutdown;
pub mod source;
pub mod store;

// Internal modules
mod connection;
mod imap;
mod parser;

// Re-exports for ergonomic API
pub use config::{MailboxConfig, MailboxConfigBuilder, MailboxFile, PollingConfig, TimeoutConfig};
pub use error::{Error, ErrorCategory, Result};
pub use known_servers::ServerRegistry;
pub use model::{
    ArtifactType, AuthFailure, AuthFailureKind, AuthType, AuthenticationResult, Cookie, Email,
    EmailRef, ExtractionResult, TestUser, UserSession,
};
pub use monitor::{MailProbe, MailboxMonitor, MonitorHandle, MonitorState};
pub use orchestrator::{
    AuthFlowOrchestrator, AuthFlowState, ConfidenceBooster, OrchestratorConfig, WaitOutcome,
};
pub use source::{FetchedMessage, ImapMailSource, MailSource, MailboxStatus};
pub use store::SessionStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_accessible() {
        let _ = MailboxConfig::builder();
        let _ = ServerRegistry::default();
        let _ = OrchestratorConfig::default();
        assert!(AuthType::MagicLink.required_artifact().is_some());
    }
}
