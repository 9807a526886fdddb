//! Integration tests against a real IMAP server.
//!
//! These tests are ignored by default. To run them:
//!
//! ```bash
//! # Set environment variables (or put them in .env)
//! export MAILBOX_USERNAME="your@email.com"
//! export MAILBOX_PASSWORD="your-app-password"
//!
//! # Optional
//! export MAILBOX_HOST="imap.example.com"
//! export MAILBOX_PORT="993"
//!
//! cargo test --test integration -- --ignored
//! ```

use email_auth_flow::{MailboxConfig, MailboxMonitor};
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Test Configuration Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn get_test_config() -> Option<MailboxConfig> {
    dotenvy::dotenv().ok();
    MailboxConfig::load(None).ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_connect_seeds_position() {
    let config = get_test_config().expect("Test config from environment variables");
    let mut monitor = MailboxMonitor::new(config);

    monitor.connect().await.expect("Failed to connect");

    let state = monitor.state();
    assert!(state.connected);
    assert!(state.last_seen_uid.is_some());
    assert!(state.uid_validity.is_some());
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_reconnect_keeps_position() {
    let config = get_test_config().expect("Test config from environment variables");
    let mut monitor = MailboxMonitor::new(config);

    monitor.connect().await.expect("Failed to connect");
    monitor.poll_once().await.expect("Failed to poll");
    let position = monitor.state().last_seen_uid;

    monitor.connect().await.expect("Failed to reconnect");
    assert!(monitor.state().last_seen_uid >= position);
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_debug_output_hides_password() {
    let config = get_test_config().expect("Test config from environment variables");
    let password = config.password().to_string();

    let monitor = MailboxMonitor::new(config);
    let debug_str = format!("{monitor:?}");

    assert!(debug_str.contains("MailboxMonitor"));
    assert!(!debug_str.contains(&password));
}

// ─────────────────────────────────────────────────────────────────────────────
// Polling Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_second_poll_is_empty_without_new_mail() {
    let config = get_test_config().expect("Test config from environment variables");
    let mut monitor = MailboxMonitor::new(config);

    let first = monitor.poll_once().await.expect("Failed to poll");
    println!("Backlog contained {} emails", first.len());

    // Mail may arrive between the two polls; only check the position is monotonic.
    let position = monitor.state().last_seen_uid;
    monitor.poll_once().await.expect("Failed to poll");
    assert!(monitor.state().last_seen_uid >= position);
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_check_recent_emails() {
    let config = get_test_config().expect("Test config from environment variables");
    let mut monitor = MailboxMonitor::new(config);

    let result = monitor
        .check_recent_emails(Duration::from_secs(24 * 60 * 60))
        .await
        .expect("Failed to scan");

    // Result depends on the mailbox contents
    match result {
        Some(found) => {
            assert!(found.success);
            assert!((0.0..=1.0).contains(&found.confidence));
            println!("Found {}: {}", found.artifact_type, found.value);
        }
        None => println!("No authentication artifact in the last day"),
    }
}

#[tokio::test]
#[ignore = "requires real IMAP server"]
async fn test_background_start_and_stop() {
    let config = get_test_config()
        .expect("Test config from environment variables");
    let monitor = MailboxMonitor::new(config);

    let handle = monitor.start_background(|email| {
        println!("[{}] {}", email.uid, email.subject);
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(handle.is_running());

    let monitor = handle.stop().await.expect("Monitor task failed");
    assert!(!monitor.state().connected);
}
