//! The mailbox access seam used by [`MailboxMonitor`](crate::MailboxMonitor).
//!
//! [`MailSource`] is the minimal set of mailbox operations the monitor needs. The
//! production implementation, [`ImapMailSource`], speaks IMAP4rev1 through
//! async-imap; tests provide in-memory implementations.

use crate::config::MailboxConfig;
use crate::connection;
use crate::error::{Error, Result};
use crate::imap::{self, ImapSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument, warn};

/// Mailbox selected by every source.
pub const INBOX: &str = "INBOX";

/// A message as returned by the server, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMessage {
    /// Stable unique identifier within the mailbox.
    pub uid: u32,
    /// Full RFC 5322 message.
    pub raw: Vec<u8>,
    /// Server-side receive time, when reported.
    pub internal_date: Option<DateTime<Utc>>,
}

/// State reported when the inbox is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStatus {
    /// UIDVALIDITY of the mailbox; a change invalidates all known UIDs.
    pub uid_validity: Option<u32>,
    /// Number of messages in the mailbox.
    pub exists: u32,
}

/// Operations the monitor performs against a mailbox.
///
/// Implementations are owned by exactly one monitor and are never shared, so
/// methods take `&mut self` and need no internal locking.
#[async_trait]
pub trait MailSource: Send + 'static {
    /// Connects, authenticates and selects the inbox, replacing any open session.
    async fn open(&mut self) -> Result<MailboxStatus>;

    /// Lists all UIDs in the inbox in ascending order.
    async fn list_uids(&mut self) -> Result<Vec<u32>>;

    /// Fetches the messages in a UID set (e.g. `"5:9"` or `"3,7"`).
    async fn fetch(&mut self, uid_set: &str) -> Result<Vec<FetchedMessage>>;

    /// Logs out and releases the connection. Closing a closed source is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Whether a session is currently open.
    fn is_open(&self) -> bool;

    /// Short description for logs (never includes credentials).
    fn describe(&self) -> String;
}

/// [`MailSource`] backed by a real IMAP server.
pub struct ImapMailSource {
    config: MailboxConfig,
    session: Option<Box<ImapSession>>,
}

impl ImapMailSource {
    /// Creates a source; no connection is made until [`MailSource::open`].
    #[must_use]
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Returns the configuration in use.
    #[must_use]
    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    fn session_mut(&mut self) -> Result<&mut ImapSession> {
        self.session.as_deref_mut().ok_or(Error::NotConnected)
    }

    /// Establishes transport, authenticates and selects the inbox.
    async fn initialize_session(config: &MailboxConfig) -> Result<(ImapSession, MailboxStatus)> {
        let imap_host = &config.imap_host;
        let target_addr = config.server_address();
        let timeouts = &config.timeouts;

        let stream = tokio::time::timeout(
            timeouts.connect,
            connection::establish_connection(imap_host, &target_addr, config.use_tls),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target_addr.clone(),
            timeout: timeouts.connect,
        })??;

        debug!("Transport established");

        let mut session = tokio::time::timeout(
            timeouts.auth,
            imap::authenticate(stream, &config.username, config.password()),
        )
        .await
        .map_err(|_| Error::AuthTimeout {
            username: config.username.clone(),
            timeout: timeouts.auth,
        })??;

        debug!("Authenticated");

        let status = tokio::time::timeout(timeouts.select, imap::select_mailbox(&mut session, INBOX))
            .await
            .map_err(|_| Error::SelectTimeout {
                mailbox: INBOX.to_string(),
                timeout: timeouts.select,
            })??;

        debug!(exists = status.exists, uid_validity = status.uid_validity, "Selected INBOX");

        Ok((session, status))
    }
}

#[async_trait]
impl MailSource for ImapMailSource {
    #[instrument(
        name = "ImapMailSource::open",
        skip_all,
        fields(username = %self.config.username, use_tls = self.config.use_tls)
    )]
    async fn open(&mut self) -> Result<MailboxStatus> {
        // A stale session is dropped without LOGOUT; the server will time it out.
        self.session = None;
        let (session, status) = Self::initialize_session(&self.config).await?;
        self.session = Some(Box::new(session));
        Ok(status)
    }

    async fn list_uids(&mut self) -> Result<Vec<u32>> {
        let timeout = self.config.timeouts.uid_fetch;
        let session = self.session_mut()?;
        tokio::time::timeout(timeout, imap::list_uids(session))
            .await
            .map_err(|_| Error::UidFetchTimeout { timeout })?
    }

    async fn fetch(&mut self, uid_set: &str) -> Result<Vec<FetchedMessage>> {
        let timeout = self.config.timeouts.message_fetch;
        let session = self.session_mut()?;
        tokio::time::timeout(timeout, imap::fetch_messages(session, uid_set))
            .await
            .map_err(|_| Error::FetchTimeout {
                uid_range: uid_set.to_string(),
                timeout,
            })?
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let timeout = self.config.timeouts.logout;
        match tokio::time::timeout(timeout, imap::logout(&mut session)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "IMAP logout timed out");
                Err(Error::LogoutTimeout { timeout })
            }
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn describe(&self) -> String {
        format!("imap://{}", self.config.server_address())
    }
}

impl std::fmt::Debug for ImapMailSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapMailSource")
            .field("config", &self.config)
            .field("connected", &self.session.is_some())
            .finish()
    }
}
