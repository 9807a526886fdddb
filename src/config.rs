//! Configuration for mailbox access.
//!
//! Use [`MailboxConfigBuilder`] to create a configuration in code, or
//! [`MailboxConfig::load`] to resolve it from a JSON file with `MAILBOX_*`
//! environment variables filling any field the file leaves unset:
//!
//! ```
//! use email_auth_flow::MailboxConfig;
//!
//! let config = MailboxConfig::builder()
//!     .username("qa-inbox@example.com")
//!     .password("app-password")
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.imap_host, "imap.example.com");
//! assert_eq!(config.effective_port(), 993);
//! ```
//!
//! | Field | File key | Environment | Default |
//! |-------|----------|-------------|---------|
//! | host | `host` | `MAILBOX_HOST` | discovered from the username domain |
//! | port | `port` | `MAILBOX_PORT` | 993 with TLS, 143 without |
//! | username | `username` | `MAILBOX_USERNAME` | required |
//! | secret | `password` | `MAILBOX_PASSWORD` | required |
//! | TLS | `use_tls` | `MAILBOX_USE_TLS` | `true` |
//! | poll interval | `poll_interval_secs` | `MAILBOX_POLL_INTERVAL_SECS` | 5 |

use crate::error::{Error, Result};
use crate::known_servers::ServerRegistry;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Environment variable names consulted by [`MailboxConfig::load`].
pub mod env {
    /// IMAP host.
    pub const HOST: &str = "MAILBOX_HOST";
    /// IMAP port.
    pub const PORT: &str = "MAILBOX_PORT";
    /// Login name.
    pub const USERNAME: &str = "MAILBOX_USERNAME";
    /// Login secret.
    pub const PASSWORD: &str = "MAILBOX_PASSWORD";
    /// `true`/`false`, `1`/`0`, `yes`/`no`.
    pub const USE_TLS: &str = "MAILBOX_USE_TLS";
    /// Background poll interval in seconds.
    pub const POLL_INTERVAL_SECS: &str = "MAILBOX_POLL_INTERVAL_SECS";
}

/// Standard IMAPS port.
pub const DEFAULT_TLS_PORT: u16 = 993;
/// Standard plain IMAP port.
pub const DEFAULT_PLAIN_PORT: u16 = 143;

/// Configuration for connecting to a mailbox.
///
/// Create using [`MailboxConfig::builder()`] or [`MailboxConfig::load`].
///
/// The secret is stored as a [`SecretString`] to prevent accidental logging.
#[derive(Clone)]
pub struct MailboxConfig {
    /// Login name, usually the mailbox address.
    pub username: String,
    password: SecretString,
    /// IMAP server hostname.
    pub imap_host: String,
    /// Explicit port; `None` means the standard port for the transport.
    pub imap_port: Option<u16>,
    /// Whether to wrap the connection in TLS.
    pub use_tls: bool,
    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
    /// Polling configuration for the monitor.
    pub polling: PollingConfig,
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("use_tls", &self.use_tls)
            .field("timeouts", &self.timeouts)
            .field("polling", &self.polling)
            .finish()
    }
}

/// Timeout configuration for the individual IMAP steps.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Timeout for establishing TCP/TLS connection.
    pub connect: Duration,
    /// Timeout for IMAP authentication.
    pub auth: Duration,
    /// Timeout for selecting a mailbox.
    pub select: Duration,
    /// Timeout for listing UIDs.
    pub uid_fetch: Duration,
    /// Timeout for fetching message content.
    pub message_fetch: Duration,
    /// Timeout for logout operation.
    pub logout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            auth: Duration::from_secs(30),
            select: Duration::from_secs(10),
            uid_fetch: Duration::from_secs(10),
            message_fetch: Duration::from_secs(30),
            logout: Duration::from_secs(5),
        }
    }
}

/// Polling configuration for the mailbox monitor.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between background polling ticks.
    pub interval: Duration,
    /// Messages examined by the first poll after a cold start.
    pub backlog: u32,
    /// Newest messages examined by a one-shot recent scan.
    pub recent_scan_limit: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            backlog: 10,
            recent_scan_limit: 20,
        }
    }
}

impl MailboxConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> MailboxConfigBuilder {
        MailboxConfigBuilder::default()
    }

    /// Returns the secret.
    ///
    /// The secret is intentionally not a public field to prevent accidental logging.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// The port to connect to: explicit, or the transport's standard port.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.imap_port.unwrap_or(if self.use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PLAIN_PORT
        })
    }

    /// Returns the full IMAP server address as "host:port".
    #[must_use]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.imap_host, self.effective_port())
    }

    /// Resolves configuration from an optional JSON file and the process environment.
    ///
    /// File values win; any field the file leaves unset falls back to the matching
    /// `MAILBOX_*` variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded, an environment value is
    /// malformed, or required fields are missing after resolution.
    #[instrument(name = "MailboxConfig::load", skip_all, fields(path = ?path))]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => MailboxFile::read(path)?,
            None => MailboxFile::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merges file values with a variable lookup. Exposed for callers with their own
    /// configuration sources.
    ///
    /// # Errors
    ///
    /// Returns an error if a looked-up value is malformed or required fields are missing.
    pub fn resolve<F>(file: MailboxFile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let port = match file.port {
            Some(port) => Some(port),
            None => lookup(env::PORT)
                .map(|raw| parse_env(env::PORT, &raw, |v| v.parse::<u16>().ok()))
                .transpose()?,
        };
        let use_tls = match file.use_tls {
            Some(flag) => Some(flag),
            None => lookup(env::USE_TLS)
                .map(|raw| parse_env(env::USE_TLS, &raw, parse_bool))
                .transpose()?,
        };
        let poll_secs = match file.poll_interval_secs {
            Some(secs) => Some(secs),
            None => lookup(env::POLL_INTERVAL_SECS)
                .map(|raw| parse_env(env::POLL_INTERVAL_SECS, &raw, |v| v.parse::<u64>().ok()))
                .transpose()?,
        };

        let mut builder = MailboxConfig::builder();
        if let Some(username) = file.username.or_else(|| lookup(env::USERNAME)) {
            builder = builder.username(username);
        }
        if let Some(password) = file.password.or_else(|| lookup(env::PASSWORD)) {
            builder = builder.password(password);
        }
        if let Some(host) = file.host.or_else(|| lookup(env::HOST)) {
            builder = builder.imap_host(host);
        }
        if let Some(port) = port {
            builder = builder.imap_port(port);
        }
        if let Some(use_tls) = use_tls {
            builder = builder.use_tls(use_tls);
        }
        if let Some(secs) = poll_secs {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// Writes the connection settings, secret included, to a credentials file.
    ///
    /// On Unix the file is created with mode `0600`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    #[instrument(name = "MailboxConfig::save_credentials", skip(self), fields(path = %path.display()))]
    pub fn save_credentials(&self, path: &Path) -> Result<()> {
        let file = MailboxFile {
            host: Some(self.imap_host.clone()),
            port: self.imap_port,
            username: Some(self.username.clone()),
            password: Some(self.password().to_string()),
            use_tls: Some(self.use_tls),
            poll_interval_secs: Some(self.polling.interval.as_secs()),
        };
        let json = serde_json::to_vec_pretty(&file).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        write_private(path, &json).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Credentials written");
        Ok(())
    }
}

/// File form of the mailbox configuration. Every field is optional.
#[derive(Default, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MailboxFile {
    /// IMAP host.
    pub host: Option<String>,
    /// IMAP port.
    pub port: Option<u16>,
    /// Login name.
    pub username: Option<String>,
    /// Login secret.
    pub password: Option<String>,
    /// TLS flag.
    pub use_tls: Option<bool>,
    /// Poll interval in seconds.
    pub poll_interval_secs: Option<u64>,
}

impl MailboxFile {
    /// Reads and decodes a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|source| Error::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| Error::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl std::fmt::Debug for MailboxFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxFile")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("use_tls", &self.use_tls)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .finish()
    }
}

fn parse_env<T>(key: &str, raw: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(raw.trim()).ok_or_else(|| Error::InvalidConfig {
        message: format!("{key} has an invalid value"),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // An existing file keeps its old mode on open; tighten it explicitly.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Builder for [`MailboxConfig`].
#[derive(Debug, Default)]
pub struct MailboxConfigBuilder {
    username: Option<String>,
    password: Option<SecretString>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    use_tls: Option<bool>,
    timeouts: Option<TimeoutConfig>,
    polling: Option<PollingConfig>,
    server_registry: Option<ServerRegistry>,
}

impl MailboxConfigBuilder {
    /// Sets the login name (required).
    ///
    /// When it is an email address, its domain is used to discover the IMAP host if
    /// none is set.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the secret (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Sets the IMAP server hostname explicitly.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port.
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Enables or disables TLS (default: enabled).
    #[must_use]
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = Some(use_tls);
        self
    }

    /// Sets a custom server registry for IMAP host discovery.
    #[must_use]
    pub fn server_registry(mut self, registry: ServerRegistry) -> Self {
        self.server_registry = Some(registry);
        self
    }

    /// Sets timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts
            .get_or_insert_with(TimeoutConfig::default)
            .connect = timeout;
        self
    }

    /// Sets polling configuration.
    #[must_use]
    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = Some(polling);
        self
    }

    /// Sets the background polling interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling
            .get_or_insert_with(PollingConfig::default)
            .interval = interval;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing, the poll interval is zero, or no
    /// host is set and none can be discovered from the username.
    pub fn build(self) -> Result<MailboxConfig> {
        let username = self
            .username
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig {
                message: "username is required".into(),
            })?;

        let password = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        let polling = self.polling.unwrap_or_default();
        if polling.interval.is_zero() {
            return Err(Error::InvalidConfig {
                message: "poll interval must be greater than zero".into(),
            });
        }

        // Resolve IMAP host: explicit > registry > built-in discovery
        let imap_host = match self.imap_host {
            Some(host) => host,
            None => self
                .server_registry
                .unwrap_or_default()
                .discover(&username)
                .ok_or_else(|| Error::InvalidConfig {
                    message: "host is required when the username is not an email address".into(),
                })?,
        };

        Ok(MailboxConfig {
            username,
            password,
            imap_host,
            imap_port: self.imap_port,
            use_tls: self.use_tls.unwrap_or(true),
            timeouts: self.timeouts.unwrap_or_default(),
            polling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_builder_minimal() {
        let config = MailboxConfig::builder()
            .username("qa@example.com")
            .password("secret")
            .build()
            .unwrap();

        assert_eq!(config.password(), "secret");
        assert_eq!(config.imap_host, "imap.example.com");
        assert_eq!(config.effective_port(), DEFAULT_TLS_PORT);
        assert!(config.use_tls);
        assert_eq!(config.polling.interval, Duration::from_secs(5));
        assert_eq!(config.polling.backlog, 10);
    }

    #[test]
    fn test_plain_transport_uses_plain_port() {
        let config = MailboxConfig::builder()
            .username("qa")
            .password("secret")
            .imap_host("localhost")
            .use_tls(false)
            .build()
            .unwrap();
        assert_eq!(config.server_address(), "localhost:143");
    }

    #[test]
    fn test_builder_missing_fields() {
        assert!(MailboxConfig::builder().password("secret").build().is_err());
        assert!(MailboxConfig::builder().username("qa@example.com").build().is_err());
    }

    #[test]
    fn test_username_without_domain_needs_host() {
        let err = MailboxConfig::builder()
            .username("qa-bot")
            .password("secret")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = MailboxConfig::builder()
            .username("qa@example.com")
            .password("secret")
            .poll_interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_password_not_in_debug() {
        let config = MailboxConfig::builder()
            .username("qa@example.com")
            .password("super-secret-password")
            .build()
            .unwrap();

        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("super-secret-password"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    #[test]
    fn test_file_values_win_over_environment() {
        let file = MailboxFile {
            host: Some("mail.file.test".into()),
            username: Some("file@example.com".into()),
            ..MailboxFile::default()
        };
        let env = lookup(&[
            (env::HOST, "mail.env.test"),
            (env::USERNAME, "env@example.com"),
            (env::PASSWORD, "from-env"),
            (env::PORT, "1993"),
            (env::USE_TLS, "no"),
            (env::POLL_INTERVAL_SECS, "2"),
        ]);

        let config = MailboxConfig::resolve(file, env).unwrap();
        assert_eq!(config.imap_host, "mail.file.test");
        assert_eq!(config.username, "file@example.com");
        assert_eq!(config.password(), "from-env");
        assert_eq!(config.effective_port(), 1993);
        assert!(!config.use_tls);
        assert_eq!(config.polling.interval, Duration::from_secs(2));
    }

    #[test]
    fn test_malformed_environment_value() {
        let env = lookup(&[
            (env::USERNAME, "qa@example.com"),
            (env::PASSWORD, "pw"),
            (env::PORT, "not-a-port"),
        ]);
        let err = MailboxConfig::resolve(MailboxFile::default(), env).unwrap_err();
        assert!(err.to_string().contains(env::PORT));
    }

    #[test]
    fn test_blank_environment_values_are_unset() {
        let env = lookup(&[
            (env::USERNAME, "qa@example.com"),
            (env::PASSWORD, "pw"),
            (env::HOST, "   "),
        ]);
        let config = MailboxConfig::resolve(MailboxFile::default(), env).unwrap();
        assert_eq!(config.imap_host, "imap.example.com");
    }

    #[test]
    fn test_credentials_round_trip_with_private_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailbox.json");
        let config = MailboxConfig::builder()
            .username("qa@example.com")
            .password("pw")
            .imap_host("mail.example.com")
            .build()
            .unwrap();

        config.save_credentials(&path).unwrap();
        let loaded = MailboxConfig::resolve(MailboxFile::read(&path).unwrap(), |_| None).unwrap();
        assert_eq!(loaded.imap_host, "mail.example.com");
        assert_eq!(loaded.password(), "pw");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
