//! Mailbox monitoring: UID tracking, one-shot scans and the background polling loop.
//!
//! A [`MailboxMonitor`] exclusively owns one [`MailSource`]. It can be driven
//! manually ([`poll_once`](MailboxMonitor::poll_once),
//! [`check_recent_emails`](MailboxMonitor::check_recent_emails)) or moved into a
//! background task with [`start_background`](MailboxMonitor::start_background), which
//! returns a [`MonitorHandle`]. Moving the monitor into the task is what guarantees
//! that nothing else issues commands on its connection.
//!
//! # Example
//!
//! ```no_run
//! use email_auth_flow::{MailboxConfig, MailboxMonitor};
//!
//! # async fn example() -> email_auth_flow::Result<()> {
//! let config = MailboxConfig::builder()
//!     .username("qa-inbox@example.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let mut monitor = MailboxMonitor::new(config);
//! monitor.connect().await?;
//!
//! let handle = monitor.start_background(|email| {
//!     println!("new mail: {}", email.subject);
//! });
//!
//! // ... later
//! let monitor = handle.stop().await?;
//! assert!(!monitor.state().connected);
//! # Ok(())
//! # }
//! ```

use crate::config::{MailboxConfig, PollingConfig};
use crate::error::{Error, Result};
use crate::extractor;
use crate::model::{Email, ExtractionResult};
use crate::parser;
use crate::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::source::{ImapMailSource, MailSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Emails retained by a running monitor for [`MonitorHandle`] probes.
const RECENT_CAPACITY: usize = 50;

/// Something that can report recently received mail.
///
/// The orchestrator waits on this seam: a stopped [`MailboxMonitor`] answers by
/// scanning the server, a running monitor's [`MonitorHandle`] answers from the mail
/// its background loop already fetched.
#[async_trait]
pub trait MailProbe: Send {
    /// Returns emails received within `window`, newest first.
    async fn recent_emails(&mut self, window: Duration) -> Result<Vec<Email>>;
}

/// Position and connection state of a monitor. Never shared between monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorState {
    /// Highest UID already examined; `None` before the first connect.
    pub last_seen_uid: Option<u32>,
    /// UIDVALIDITY observed at the last select.
    pub uid_validity: Option<u32>,
    /// Whether the source currently holds a usable session.
    pub connected: bool,
}

/// Polls one mailbox for new messages.
pub struct MailboxMonitor<S: MailSource = ImapMailSource> {
    source: S,
    polling: PollingConfig,
    state: MonitorState,
}

impl MailboxMonitor<ImapMailSource> {
    /// Creates a monitor for an IMAP mailbox. No connection is made yet.
    #[must_use]
    pub fn new(config: MailboxConfig) -> Self {
        let polling = config.polling.clone();
        Self::with_source(ImapMailSource::new(config), polling)
    }
}

impl<S: MailSource> MailboxMonitor<S> {
    /// Creates a monitor over any [`MailSource`].
    #[must_use]
    pub fn with_source(source: S, polling: PollingConfig) -> Self {
        Self {
            source,
            polling,
            state: MonitorState::default(),
        }
    }

    /// Current position and connection state.
    #[must_use]
    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    /// Polling configuration in use.
    #[must_use]
    pub fn polling(&self) -> &PollingConfig {
        &self.polling
    }

    /// Connects and selects the inbox.
    ///
    /// On a cold start the position is seeded so the next poll examines the newest
    /// `backlog` messages, which catches mail sent just before monitoring began. On a
    /// reconnect the position is kept unless the mailbox UIDVALIDITY changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, select or initial UID listing fails.
    #[instrument(name = "MailboxMonitor::connect", skip(self), fields(source = %self.source.describe()))]
    pub async fn connect(&mut self) -> Result<()> {
        self.state.connected = false;
        let status = self.source.open().await?;

        if let (Some(previous), Some(current)) = (self.state.uid_validity, status.uid_validity) {
            if previous != current {
                warn!(
                    previous,
                    current, "UIDVALIDITY changed, known UIDs are void; re-seeding position"
                );
                self.state.last_seen_uid = None;
            }
        }
        self.state.uid_validity = status.uid_validity;

        if self.state.last_seen_uid.is_none() {
            let uids = self.source.list_uids().await?;
            let backlog = self.polling.backlog as usize;
            let seed = if uids.len() > backlog {
                uids[uids.len() - backlog - 1]
            } else {
                0
            };
            debug!(seed, total = uids.len(), backlog, "Seeded last-seen UID");
            self.state.last_seen_uid = Some(seed);
        }

        self.state.connected = true;
        info!(last_seen_uid = ?self.state.last_seen_uid, "Mailbox monitor connected");
        Ok(())
    }

    /// Runs one polling tick and returns the newly arrived emails, oldest first.
    ///
    /// Connects first if needed. Messages that fail to parse are logged and skipped;
    /// the position still advances past them. A retryable failure marks the monitor
    /// disconnected so the next tick reconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, listing or fetching fails.
    #[instrument(name = "MailboxMonitor::poll_once", skip(self), fields(last_seen_uid = ?self.state.last_seen_uid))]
    pub async fn poll_once(&mut self) -> Result<Vec<Email>> {
        if !self.state.connected {
            self.connect().await?;
        }

        let result = self.fetch_new().await;
        if let Err(e) = &result {
            if e.is_retryable() {
                self.state.connected = false;
            }
        }
        result
    }

    /// One-shot scan of the newest messages received within `window`.
    ///
    /// Returns the first successful extraction (link or code), newest message first.
    /// Does not move the polling position.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be reached.
    #[instrument(name = "MailboxMonitor::check_recent_emails", skip(self), fields(window_secs = window.as_secs()))]
    pub async fn check_recent_emails(&mut self, window: Duration) -> Result<Option<ExtractionResult>> {
        let emails = self.scan_recent(window).await?;
        let found = emails
            .iter()
            .map(extractor::extract_any)
            .find(|result| result.success);

        match &found {
            Some(result) => debug!(artifact = %result.artifact_type, uid = ?result.source.as_ref().map(|s| s.uid), "Found artifact"),
            None => debug!(scanned = emails.len(), "No artifact in recent emails"),
        }
        Ok(found)
    }

    /// Moves the monitor into a background task polling every `polling.interval`.
    ///
    /// `on_email` is called once per newly fetched email. Transient failures are logged
    /// and retried on the next tick; a panicking callback is contained and logged.
    /// Dropping the returned handle also stops the loop.
    pub fn start_background<F>(self, on_email: F) -> MonitorHandle<S>
    where
        F: FnMut(&Email) + Send + 'static,
    {
        let (trigger, shutdown) = shutdown::channel();
        let recent = RecentMail::default();
        let task = tokio::spawn(self.run_background(on_email, shutdown, recent.clone()));

        MonitorHandle {
            trigger,
            task,
            recent,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private methods
    // ─────────────────────────────────────────────────────────────────────────

    async fn fetch_new(&mut self) -> Result<Vec<Email>> {
        let last_seen = self.state.last_seen_uid.unwrap_or(0);
        let uids = self.source.list_uids().await?;

        let highest = match uids.last() {
            Some(&highest) if highest > last_seen => highest,
            _ => {
                debug!("No new messages");
                return Ok(Vec::new());
            }
        };

        let uid_range = format!("{}:{highest}", last_seen + 1);
        let fetched = self.source.fetch(&uid_range).await?;

        let mut emails = Vec::with_capacity(fetched.len());
        for message in fetched.iter().filter(|m| m.uid > last_seen && m.uid <= highest) {
            match parser::parse_email(message) {
                Ok(email) => emails.push(email),
                Err(e) => warn!(uid = message.uid, error = %e, "Skipping unparseable message"),
            }
        }
        emails.sort_by_key(|email| email.uid);

        // Advance past the whole batch, including messages that failed to parse.
        self.state.last_seen_uid = Some(highest);
        debug!(uid_range = %uid_range, new = emails.len(), "Fetched new messages");

        Ok(emails)
    }

    async fn scan_recent(&mut self, window: Duration) -> Result<Vec<Email>> {
        if !self.state.connected {
            self.connect().await?;
        }

        let result = self.fetch_recent(window).await;
        if let Err(e) = &result {
            if e.is_retryable() {
                self.state.connected = false;
            }
        }
        result
    }

    async fn fetch_recent(&mut self, window: Duration) -> Result<Vec<Email>> {
        let uids = self.source.list_uids().await?;
        let start = uids.len().saturating_sub(self.polling.recent_scan_limit);
        let newest = &uids[start..];
        if newest.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = newest
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let fetched = self.source.fetch(&uid_set).await?;

        let cutoff = window_start(window);
        let mut emails: Vec<Email> = fetched
            .iter()
            .filter_map(|message| match parser::parse_email(message) {
                Ok(email) => Some(email),
                Err(e) => {
                    warn!(uid = message.uid, error = %e, "Skipping unparseable message");
                    None
                }
            })
            .filter(|email| email.received_at >= cutoff)
            .collect();
        emails.sort_by(|a, b| b.uid.cmp(&a.uid));
        Ok(emails)
    }

    #[instrument(name = "MailboxMonitor::background", skip_all, fields(source = %self.source.describe()))]
    async fn run_background<F>(mut self, mut on_email: F, mut shutdown: Shutdown, recent: RecentMail) -> Self
    where
        F: FnMut(&Email) + Send + 'static,
    {
        let mut interval = tokio::time::interval(self.polling.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.polling.interval.as_secs_f64(), "Background monitor started");

        loop {
            let cancelled = tokio::select! {
                _ = interval.tick() => false,
                () = shutdown.triggered() => true,
            };
            if cancelled || shutdown.is_triggered() {
                break;
            }

            match self.poll_once().await {
                Ok(emails) => {
                    for email in &emails {
                        recent.push(email.clone());
                        if std::panic::catch_unwind(AssertUnwindSafe(|| on_email(email))).is_err() {
                            error!(uid = email.uid, "Email callback panicked");
                        }
                    }
                }
                Err(e) => warn!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Polling tick failed, retrying on next tick"
                ),
            }
        }

        if let Err(e) = self.source.close().await {
            debug!(error = %e, "Logout after monitor stop failed");
        }
        self.state.connected = false;
        info!(last_seen_uid = ?self.state.last_seen_uid, "Background monitor stopped");
        self
    }
}

#[async_trait]
impl<S: MailSource> MailProbe for MailboxMonitor<S> {
    async fn recent_emails(&mut self, window: Duration) -> Result<Vec<Email>> {
        self.scan_recent(window).await
    }
}

impl<S: MailSource> std::fmt::Debug for MailboxMonitor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxMonitor")
            .field("source", &self.source.describe())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Control handle for a monitor running in the background.
///
/// Created by [`MailboxMonitor::start_background`].
pub struct MonitorHandle<S: MailSource = ImapMailSource> {
    trigger: ShutdownTrigger,
    task: JoinHandle<MailboxMonitor<S>>,
    recent: RecentMail,
}

impl<S: MailSource> MonitorHandle<S> {
    /// Requests the loop to stop. Takes effect at the next tick; an in-flight fetch
    /// completes first.
    pub fn cancel(&self) {
        self.trigger.trigger();
    }

    /// Whether the background task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// A signal that fires when this monitor is cancelled.
    #[must_use]
    pub fn shutdown_signal(&self) -> Shutdown {
        self.trigger.subscribe()
    }

    /// Emails fetched by the loop and received within `window`, newest first.
    #[must_use]
    pub fn recent(&self, window: Duration) -> Vec<Email> {
        self.recent.since(window_start(window))
    }

    /// Cancels the loop, waits for it to release the connection, and returns the
    /// monitor with its position intact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MonitorTask`] if the task panicked or was aborted.
    pub async fn stop(self) -> Result<MailboxMonitor<S>> {
        self.trigger.trigger();
        self.task
            .await
            .map_err(|source| Error::MonitorTask { source })
    }
}

#[async_trait]
impl<S: MailSource> MailProbe for MonitorHandle<S> {
    async fn recent_emails(&mut self, window: Duration) -> Result<Vec<Email>> {
        Ok(self.recent(window))
    }
}

impl<S: MailSource> std::fmt::Debug for MonitorHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("running", &self.is_running())
            .field("cancelled", &self.trigger.is_triggered())
            .finish_non_exhaustive()
    }
}

/// Bounded buffer of emails fetched by the background loop.
#[derive(Debug, Clone, Default)]
struct RecentMail {
    inner: Arc<Mutex<VecDeque<Email>>>,
}

impl RecentMail {
    fn push(&self, email: Email) {
        let mut buffer = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if buffer.len() == RECENT_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(email);
    }

    fn since(&self, cutoff: DateTime<Utc>) -> Vec<Email> {
        let buffer = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut emails: Vec<Email> = buffer
            .iter()
            .filter(|email| email.received_at >= cutoff)
            .cloned()
            .collect();
        emails.sort_by(|a, b| b.uid.cmp(&a.uid));
        emails
    }
}

/// Earliest receive time inside `window`, saturating at the minimum timestamp.
pub(crate) fn window_start(window: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FetchedMessage, MailboxStatus};

    /// Scripted source: a fixed list of messages, counting fetches.
    struct ScriptedSource {
        messages: Vec<FetchedMessage>,
        fetch_calls: usize,
        open: bool,
    }

    impl ScriptedSource {
        fn with_uids(uids: impl IntoIterator<Item = u32>) -> Self {
            let messages = uids
                .into_iter()
                .map(|uid| FetchedMessage {
                    uid,
                    raw: format!("Subject: m{uid}\r\n\r\nbody {uid}").into_bytes(),
                    internal_date: Some(Utc::now()),
                })
                .collect();
            Self {
                messages,
                fetch_calls: 0,
                open: false,
            }
        }
    }

    #[async_trait]
    impl MailSource for ScriptedSource {
        async fn open(&mut self) -> Result<MailboxStatus> {
            self.open = true;
            Ok(MailboxStatus {
                uid_validity: Some(1),
                exists: u32::try_from(self.messages.len()).unwrap(),
            })
        }

        async fn list_uids(&mut self) -> Result<Vec<u32>> {
            Ok(self.messages.iter().map(|m| m.uid).collect())
        }

        async fn fetch(&mut self, uid_set: &str) -> Result<Vec<FetchedMessage>> {
            self.fetch_calls += 1;
            let wanted = |uid: u32| {
                uid_set.split(',').any(|part| match part.split_once(':') {
                    Some((lo, "*")) => uid >= lo.parse().unwrap(),
                    Some((lo, hi)) => uid >= lo.parse().unwrap() && uid <= hi.parse().unwrap(),
                    None => uid == part.parse::<u32>().unwrap(),
                })
            };
            Ok(self
                .messages
                .iter()
                .filter(|m| wanted(m.uid))
                .cloned()
                .collect())
        }

        async fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    #[tokio::test]
    async fn test_cold_start_seeds_bounded_backlog() {
        let mut monitor = MailboxMonitor::with_source(
            ScriptedSource::with_uids(1..=25),
            PollingConfig::default(),
        );
        monitor.connect().await.unwrap();
        assert_eq!(monitor.state().last_seen_uid, Some(15));

        let emails = monitor.poll_once().await.unwrap();
        let uids: Vec<u32> = emails.iter().map(|e| e.uid).collect();
        assert_eq!(uids, (16..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_small_mailbox_seeds_from_zero() {
        let mut monitor =
            MailboxMonitor::with_source(ScriptedSource::with_uids([4, 9]), PollingConfig::default());
        monitor.connect().await.unwrap();
        assert_eq!(monitor.state().last_seen_uid, Some(0));
        assert_eq!(monitor.poll_once().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_idle_ticks_do_not_refetch() {
        let mut monitor =
            MailboxMonitor::with_source(ScriptedSource::with_uids(1..=3), PollingConfig::default());
        assert_eq!(monitor.poll_once().await.unwrap().len(), 3);
        let position = monitor.state().last_seen_uid;

        for _ in 0..5 {
            assert!(monitor.poll_once().await.unwrap().is_empty());
        }
        assert_eq!(monitor.state().last_seen_uid, position);
        assert_eq!(monitor.source.fetch_calls, 1);
    }

    #[tokio::test]
    async fn test_check_recent_emails_reads_scattered_uids() {
        let mut source = ScriptedSource::with_uids([3, 8, 21]);
        source.messages[1].raw = b"Subject: Sign in\r\n\r\nYour code: 246810".to_vec();
        let mut monitor = MailboxMonitor::with_source(source, PollingConfig::default());

        let found = monitor
            .check_recent_emails(Duration::from_secs(300))
            .await
            .unwrap()
            .expect("code in recent mail");

        assert_eq!(found.value, "246810");
        assert_eq!(found.source.map(|s| s.uid), Some(8));
        assert_eq!(monitor.source.fetch_calls, 1);
    }

    #[test]
    fn test_recent_buffer_is_bounded_and_newest_first() {
        let recent = RecentMail::default();
        for uid in 0..60 {
            recent.push(Email {
                uid,
                subject: String::new(),
                sender: String::new(),
                recipient: String::new(),
                body: String::new(),
                received_at: Utc::now(),
                preview: String::new(),
            });
        }
        let emails = recent.since(Utc::now() - chrono::Duration::minutes(1));
        assert_eq!(emails.len(), RECENT_CAPACITY);
        assert_eq!(emails.first().map(|e| e.uid), Some(59));
        assert_eq!(emails.last().map(|e| e.uid), Some(10));
    }
}
