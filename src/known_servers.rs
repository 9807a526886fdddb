//! IMAP host discovery from the mailbox username's domain.
//!
//! Used when neither the config file nor `MAILBOX_HOST` names a host.
//!
//! ```
//! use email_auth_flow::known_servers::ServerRegistry;
//!
//! let mut registry = ServerRegistry::default();
//! assert_eq!(registry.discover("qa@gmail.com").as_deref(), Some("imap.gmail.com"));
//!
//! registry.register("corp.test", "mail.corp.internal");
//! assert_eq!(registry.discover("qa@corp.test").as_deref(), Some("mail.corp.internal"));
//! ```

use email_address::EmailAddress;
use std::collections::HashMap;
use std::str::FromStr;

/// Providers commonly used for test inboxes, keyed by email domain.
const BUILTIN_SERVERS: &[(&str, &str)] = &[
    ("gmail.com", "imap.gmail.com"),
    ("googlemail.com", "imap.gmail.com"),
    ("outlook.com", "outlook.office365.com"),
    ("hotmail.com", "outlook.office365.com"),
    ("live.com", "outlook.office365.com"),
    ("yahoo.com", "imap.mail.yahoo.com"),
    ("icloud.com", "imap.mail.me.com"),
    ("me.com", "imap.mail.me.com"),
    ("fastmail.com", "imap.fastmail.com"),
    ("zoho.com", "imap.zoho.com"),
    ("gmx.com", "imap.gmx.com"),
    ("yandex.com", "imap.yandex.com"),
];

/// Domain-to-IMAP-host mappings: custom entries first, then built-ins, then `imap.{domain}`.
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    custom: HashMap<String, String>,
}

impl ServerRegistry {
    /// Adds or overrides a mapping. Domains are matched case-insensitively.
    pub fn register(&mut self, domain: impl Into<String>, imap_host: impl Into<String>) {
        self.custom
            .insert(domain.into().to_ascii_lowercase(), imap_host.into());
    }

    /// Resolves the IMAP host for a username that is an email address.
    ///
    /// Returns `None` when the username is not a valid address.
    #[must_use]
    pub fn discover(&self, username: &str) -> Option<String> {
        let address = EmailAddress::from_str(username).ok()?;
        let domain = address.domain().to_ascii_lowercase();

        if let Some(host) = self.custom.get(&domain) {
            return Some(host.clone());
        }

        let builtin = BUILTIN_SERVERS
            .iter()
            .find(|(known, _)| *known == domain)
            .map(|(_, host)| (*host).to_string());

        Some(builtin.unwrap_or_else(|| format!("imap.{domain}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup_is_case_insensitive() {
        let registry = ServerRegistry::default();
        assert_eq!(
            registry.discover("qa@Outlook.COM").as_deref(),
            Some("outlook.office365.com")
        );
    }

    #[test]
    fn test_unknown_domain_falls_back() {
        let registry = ServerRegistry::default();
        assert_eq!(
            registry.discover("qa@example.org").as_deref(),
            Some("imap.example.org")
        );
    }

    #[test]
    fn test_custom_overrides_builtin() {
        let mut registry = ServerRegistry::default();
        registry.register("GMAIL.com", "imap-proxy.internal");
        assert_eq!(
            registry.discover("qa@gmail.com").as_deref(),
            Some("imap-proxy.internal")
        );
    }

    #[test]
    fn test_non_address_username() {
        assert_eq!(ServerRegistry::default().discover("qa-bot"), None);
    }
}
