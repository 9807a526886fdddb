//! Error types for the email-auth-flow crate.
//!
//! All errors implement [`std::error::Error`] and provide context about what went wrong.
//! Errors are categorized by their retryability - see [`Error::is_retryable`].
//!
//! Failing to find an artifact in an email is *not* an error: extraction returns a
//! negative [`ExtractionResult`](crate::ExtractionResult) instead.

use crate::model::UserSession;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during mailbox, session, and authentication operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration / validation errors (NOT retryable)
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid configuration provided.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Configuration file could not be read or decoded.
    #[error("failed to load configuration from {}", path.display())]
    ConfigFile {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file could not be read or written.
    #[error("failed to access configuration file {}", path.display())]
    ConfigIo {
        /// The configuration file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid DNS name for TLS.
    #[error("invalid DNS name for host '{host}'")]
    InvalidDnsName {
        /// The invalid hostname.
        host: String,
        /// The underlying DNS name error.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network / connection errors (RETRYABLE)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to establish TCP connection.
    #[error("failed to connect to {target}")]
    TcpConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to establish TLS connection.
    #[error("failed to establish TLS connection to {target}")]
    TlsConnect {
        /// The target address that failed.
        target: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An operation needed a mailbox connection but none is open.
    #[error("mailbox is not connected")]
    NotConnected,

    // ─────────────────────────────────────────────────────────────────────────
    // Timeout errors (mixed retryability)
    // ─────────────────────────────────────────────────────────────────────────
    /// Connection timeout.
    #[error("connection timeout to {target} after {timeout:?}")]
    ConnectTimeout {
        /// The target address.
        target: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Authentication timeout.
    #[error("authentication timeout for {username} after {timeout:?}")]
    AuthTimeout {
        /// The username used for authentication.
        username: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Mailbox selection timeout.
    #[error("mailbox selection timeout for '{mailbox}' after {timeout:?}")]
    SelectTimeout {
        /// The mailbox name.
        mailbox: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// UID listing timeout.
    #[error("UID search timeout after {timeout:?}")]
    UidFetchTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Message fetch timeout.
    #[error("message fetch timeout for UID range {uid_range} after {timeout:?}")]
    FetchTimeout {
        /// The UID range being fetched.
        uid_range: String,
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Timeout waiting for an authentication artifact.
    #[error("timed out after {}s waiting for {artifact}", elapsed.as_secs())]
    WaitTimeout {
        /// The artifact that was awaited.
        artifact: String,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// Logout timeout (not critical).
    #[error("logout timeout after {timeout:?}")]
    LogoutTimeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol errors (RETRYABLE - could be transient server issues)
    // ─────────────────────────────────────────────────────────────────────────
    /// IMAP login failed.
    #[error("IMAP login failed for {username}")]
    ImapLogin {
        /// The username used for login.
        username: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// Failed to select mailbox.
    #[error("failed to select mailbox '{mailbox}'")]
    SelectMailbox {
        /// The mailbox name.
        mailbox: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP NOOP failed.
    #[error("IMAP NOOP command failed")]
    ImapNoop {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP search failed.
    #[error("IMAP search failed")]
    ImapSearch {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP fetch failed.
    #[error("IMAP fetch failed for UID range {uid_range}")]
    ImapFetch {
        /// The UID range that failed.
        uid_range: String,
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    /// IMAP logout failed.
    #[error("IMAP logout failed")]
    ImapLogout {
        /// The underlying IMAP error.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Email parsing errors (NOT retryable - malformed content won't change)
    // ─────────────────────────────────────────────────────────────────────────
    /// Failed to parse email message.
    #[error("failed to parse email with UID {uid}")]
    ParseEmail {
        /// UID of the offending message.
        uid: u32,
        /// The underlying parse error.
        #[source]
        source: mailparse::MailParseError,
    },

    /// Fetched message carried no body.
    #[error("message with UID {uid} has no body")]
    EmptyMessage {
        /// UID of the offending message.
        uid: u32,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Session store errors
    // ─────────────────────────────────────────────────────────────────────────
    /// No session is recorded for the user.
    #[error("no session found for user '{user_id}'")]
    SessionNotFound {
        /// The user identifier.
        user_id: String,
    },

    /// The session exists but has expired; the caller must re-authenticate.
    ///
    /// The record, already marked inactive and persisted, is attached.
    #[error("session for user '{user_id}' has expired")]
    SessionExpired {
        /// The user identifier.
        user_id: String,
        /// The expired (now inactive) record.
        session: Box<UserSession>,
    },

    /// Reading or writing a session record failed.
    #[error("session storage failure at {}", path.display())]
    Storage {
        /// The file or directory involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A session record could not be encoded or decoded.
    #[error("malformed session record at {}", path.display())]
    SessionFormat {
        /// The record path.
        path: PathBuf,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Runtime errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The background monitor task panicked or was aborted.
    #[error("background monitor task failed")]
    MonitorTask {
        /// The underlying join error.
        #[source]
        source: tokio::task::JoinError,
    },
}

impl Error {
    /// Returns `true` if this error represents a transient failure that might succeed on retry.
    ///
    /// The background monitor uses this to decide whether to drop the connection and
    /// reconnect on the next tick.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TcpConnect { .. }
            | Error::TlsConnect { .. }
            | Error::NotConnected
            | Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::UidFetchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. } => true,

            Error::InvalidConfig { .. }
            | Error::ConfigFile { .. }
            | Error::ConfigIo { .. }
            | Error::InvalidDnsName { .. }
            | Error::WaitTimeout { .. }
            | Error::LogoutTimeout { .. }
            | Error::ImapLogout { .. }
            | Error::ParseEmail { .. }
            | Error::EmptyMessage { .. }
            | Error::SessionNotFound { .. }
            | Error::SessionExpired { .. }
            | Error::Storage { .. }
            | Error::SessionFormat { .. }
            | Error::MonitorTask { .. } => false,
        }
    }

    /// Returns the error category for metrics/logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidConfig { .. }
            | Error::ConfigFile { .. }
            | Error::ConfigIo { .. }
            | Error::InvalidDnsName { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. } | Error::TlsConnect { .. } | Error::NotConnected => {
                ErrorCategory::Network
            }

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::UidFetchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::WaitTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapNoop { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. }
            | Error::MonitorTask { .. } => ErrorCategory::Protocol,

            Error::ParseEmail { .. } | Error::EmptyMessage { .. } => ErrorCategory::Parse,

            Error::SessionNotFound { .. } => ErrorCategory::NotFound,

            Error::SessionExpired { .. } => ErrorCategory::Session,

            Error::Storage { .. } | Error::SessionFormat { .. } => ErrorCategory::Storage,
        }
    }

    /// A short, human-readable remedy to show next to this error.
    #[must_use]
    pub fn remedy(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "check the mailbox settings in the config file or MAILBOX_* variables",
            ErrorCategory::Network | ErrorCategory::Protocol => {
                "verify the mailbox host, port and credentials, then reconfigure mailbox access"
            }
            ErrorCategory::Timeout => {
                "make sure the application under test actually sends the email, or raise the wait timeout"
            }
            ErrorCategory::Parse => "the message was skipped; no action needed unless it keeps happening",
            ErrorCategory::NotFound | ErrorCategory::Session => "authenticate the test user again",
            ErrorCategory::Storage => "check that the session directory exists and is writable",
        }
    }
}

/// Error categories for metrics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Configuration or validation errors.
    Configuration,
    /// Network connectivity errors.
    Network,
    /// Timeout errors.
    Timeout,
    /// IMAP protocol errors.
    Protocol,
    /// Email parsing errors.
    Parse,
    /// Requested record does not exist.
    NotFound,
    /// Session lifecycle errors (expiry).
    Session,
    /// Session persistence errors.
    Storage,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Protocol => write!(f, "protocol"),
            ErrorCategory::Parse => write!(f, "parse"),
            ErrorCategory::NotFound => write!(f, "not_found"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Storage => write!(f, "storage"),
        }
    }
}
