//! Data types shared by the monitor, the extractor, the session store and the orchestrator.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A fetched email. Immutable once built by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// IMAP UID of the message in the selected mailbox.
    pub uid: u32,
    /// Decoded `Subject` header.
    pub subject: String,
    /// Decoded `From` header.
    pub sender: String,
    /// Decoded `To` header.
    pub recipient: String,
    /// Text of all inline parts, joined by newlines.
    pub body: String,
    /// When the server received the message.
    pub received_at: DateTime<Utc>,
    /// Short, whitespace-collapsed excerpt of the body.
    pub preview: String,
}

impl Email {
    /// Returns a lightweight reference suitable for embedding in results.
    #[must_use]
    pub fn reference(&self) -> EmailRef {
        EmailRef {
            uid: self.uid,
            subject: self.subject.clone(),
            sender: self.sender.clone(),
        }
    }
}

/// Identifies the email an artifact came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRef {
    /// IMAP UID.
    pub uid: u32,
    /// Subject line.
    pub subject: String,
    /// Sender.
    pub sender: String,
}

/// Kind of authentication artifact delivered by email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// Single-use sign-in URL.
    MagicLink,
    /// Email address verification code.
    VerificationCode,
    /// Second-factor code sent by email.
    TwoFactorCode,
    /// SMS code forwarded to the mailbox.
    SmsCode,
}

impl ArtifactType {
    /// Stable snake_case name, also used as the session-data key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::MagicLink => "magic_link",
            ArtifactType::VerificationCode => "verification_code",
            ArtifactType::TwoFactorCode => "two_factor_code",
            ArtifactType::SmsCode => "sms_code",
        }
    }

    /// Whether the artifact is a URL rather than a numeric code.
    #[must_use]
    pub fn is_link(self) -> bool {
        matches!(self, ArtifactType::MagicLink)
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one piece of email content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Whether an artifact was found.
    pub success: bool,
    /// The artifact kind that was looked for.
    pub artifact_type: ArtifactType,
    /// The extracted link or code (empty when unsuccessful).
    pub value: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// The email the content came from, when known.
    pub source: Option<EmailRef>,
    /// Why nothing was found.
    pub reason: Option<String>,
}

impl ExtractionResult {
    /// A successful extraction. Confidence is clamped to `[0, 1]`.
    #[must_use]
    pub fn found(artifact_type: ArtifactType, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            artifact_type,
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: None,
            reason: None,
        }
    }

    /// A negative classification; a normal outcome, not an error.
    #[must_use]
    pub fn not_found(artifact_type: ArtifactType, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            artifact_type,
            value: String::new(),
            confidence: 0.0,
            source: None,
            reason: Some(reason.into()),
        }
    }

    /// Attaches the source email reference.
    #[must_use]
    pub fn with_source(mut self, source: EmailRef) -> Self {
        self.source = Some(source);
        self
    }

    /// Replaces the confidence, clamped to `[0, 1]`.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }
}

/// How a test user authenticates against the application under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Static bearer token.
    Bearer,
    /// OAuth access token, possibly with a provider-supplied expiry.
    #[serde(rename = "oauth")]
    OAuth,
    /// HTTP basic credentials.
    Basic,
    /// API key header.
    ApiKey,
    /// Username/password form login yielding a cookie.
    Form,
    /// Sign-in link delivered by email.
    MagicLink,
    /// Code sent to verify the email address.
    EmailVerification,
    /// Second-factor code delivered by email.
    #[serde(rename = "2fa")]
    TwoFactor,
    /// SMS code forwarded to the mailbox.
    Sms,
}

impl AuthType {
    /// The artifact this auth type waits for, or `None` if no email round-trip is needed.
    #[must_use]
    pub fn required_artifact(self) -> Option<ArtifactType> {
        match self {
            AuthType::MagicLink => Some(ArtifactType::MagicLink),
            AuthType::EmailVerification => Some(ArtifactType::VerificationCode),
            AuthType::TwoFactor => Some(ArtifactType::TwoFactorCode),
            AuthType::Sms => Some(ArtifactType::SmsCode),
            AuthType::Bearer
            | AuthType::OAuth
            | AuthType::Basic
            | AuthType::ApiKey
            | AuthType::Form => None,
        }
    }

    /// Computes when a session started at `started_at` expires.
    ///
    /// Bearer sessions last 24 hours, OAuth sessions use the provider expiry when
    /// present and one hour otherwise, everything else lasts 24 hours.
    #[must_use]
    pub fn session_expiry(
        self,
        started_at: DateTime<Utc>,
        provider_expiry: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        match self {
            AuthType::OAuth => provider_expiry.unwrap_or(started_at + ChronoDuration::hours(1)),
            _ => started_at + ChronoDuration::hours(24),
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthType::Bearer => "bearer",
            AuthType::OAuth => "oauth",
            AuthType::Basic => "basic",
            AuthType::ApiKey => "api_key",
            AuthType::Form => "form",
            AuthType::MagicLink => "magic_link",
            AuthType::EmailVerification => "email_verification",
            AuthType::TwoFactor => "2fa",
            AuthType::Sms => "sms",
        };
        f.write_str(name)
    }
}

/// A test user as configured by the surrounding tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestUser {
    /// Unique identifier; sessions are keyed by it.
    pub id: String,
    /// Environment name (e.g. `staging`).
    pub environment: String,
    /// How the user authenticates.
    pub auth_type: AuthType,
    /// Mailbox address the application sends to, used to filter incoming mail.
    #[serde(default)]
    pub email: Option<String>,
    /// Credential material (`token`, `username`, `password`, `api_key`, ...).
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    /// Provider-supplied OAuth token expiry.
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl TestUser {
    /// Creates a user with no credentials.
    #[must_use]
    pub fn new(id: impl Into<String>, environment: impl Into<String>, auth_type: AuthType) -> Self {
        Self {
            id: id.into(),
            environment: environment.into(),
            auth_type,
            email: None,
            credentials: BTreeMap::new(),
            token_expires_at: None,
        }
    }

    /// Sets the mailbox address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Adds one credential entry.
    #[must_use]
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    /// Sets the provider-supplied token expiry.
    #[must_use]
    pub fn with_token_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.token_expires_at = Some(expires_at);
        self
    }

    /// Looks up a credential.
    #[must_use]
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials.get(key).map(String::as_str)
    }
}

/// A browser cookie captured for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Domain attribute.
    #[serde(default)]
    pub domain: Option<String>,
    /// Path attribute.
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Expiry attribute.
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    /// `HttpOnly` flag.
    #[serde(default)]
    pub http_only: bool,
    /// `Secure` flag.
    #[serde(default)]
    pub secure: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// A host-only cookie on `/`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: default_cookie_path(),
            expires: None,
            http_only: true,
            secure: true,
        }
    }
}

/// Persisted per-user session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    /// The owning test user.
    pub user_id: String,
    /// Environment the session belongs to.
    pub environment: String,
    /// How the session was obtained.
    pub auth_type: AuthType,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// Last time the session was used or refreshed.
    pub last_used_at: DateTime<Utc>,
    /// Expiry time, if any.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Cookies to replay.
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    /// Headers to replay.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Browser local-storage entries.
    #[serde(default)]
    pub local_storage: BTreeMap<String, String>,
    /// Free-form data, e.g. extracted artifacts.
    #[serde(default)]
    pub session_data: BTreeMap<String, String>,
    /// Whether the session may still be used.
    pub active: bool,
}

impl UserSession {
    /// Whether `expires_at` lies at or before `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Whether the session is active and not expired at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }
}

/// Why an authentication attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureKind {
    /// The artifact did not arrive before the deadline.
    Timeout,
    /// The wait was cancelled by shutdown.
    Cancelled,
    /// Required credentials are missing from the test user.
    MissingCredentials,
    /// The session store failed.
    Storage,
}

/// Structured failure detail attached to an [`AuthenticationResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    /// Failure kind.
    pub kind: AuthFailureKind,
    /// Human-readable diagnostic.
    pub detail: String,
    /// Suggested remedy for the operator.
    pub remedy: String,
}

/// Result handed back to the driver by [`AuthFlowOrchestrator::authenticate`](crate::AuthFlowOrchestrator::authenticate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationResult {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// The resulting session.
    pub session: Option<UserSession>,
    /// Cookies the driver should apply.
    pub cookies: Vec<Cookie>,
    /// Headers the driver should apply.
    pub headers: BTreeMap<String, String>,
    /// Where the driver should navigate next (the magic link).
    pub redirect_url: Option<String>,
    /// Failure detail when unsuccessful.
    pub error: Option<AuthFailure>,
}

impl AuthenticationResult {
    /// A successful result carrying the session's cookies and headers.
    #[must_use]
    pub fn succeeded(message: impl Into<String>, session: UserSession) -> Self {
        Self {
            success: true,
            message: message.into(),
            cookies: session.cookies.clone(),
            headers: session.headers.clone(),
            session: Some(session),
            redirect_url: None,
            error: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failed(
        kind: AuthFailureKind,
        message: impl Into<String>,
        remedy: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            success: false,
            error: Some(AuthFailure {
                kind,
                detail: message.clone(),
                remedy: remedy.into(),
            }),
            message,
            session: None,
            cookies: Vec::new(),
            headers: BTreeMap::new(),
            redirect_url: None,
        }
    }

    /// Whether the failure was a wait timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == AuthFailureKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_bearer_expires_after_a_day() {
        let expiry = AuthType::Bearer.session_expiry(start(), None);
        assert_eq!(expiry, start() + ChronoDuration::hours(24));
    }

    #[test]
    fn test_oauth_prefers_provider_expiry() {
        let provider = start() + ChronoDuration::minutes(17);
        assert_eq!(AuthType::OAuth.session_expiry(start(), Some(provider)), provider);
        assert_eq!(
            AuthType::OAuth.session_expiry(start(), None),
            start() + ChronoDuration::hours(1)
        );
    }

    #[test]
    fn test_email_auth_types_require_artifacts() {
        assert_eq!(
            AuthType::MagicLink.required_artifact(),
            Some(ArtifactType::MagicLink)
        );
        assert_eq!(
            AuthType::TwoFactor.required_artifact(),
            Some(ArtifactType::TwoFactorCode)
        );
        assert_eq!(AuthType::Bearer.required_artifact(), None);
        assert_eq!(AuthType::Form.required_artifact(), None);
    }

    #[test]
    fn test_auth_type_serde_names() {
        let json = serde_json::to_string(&AuthType::TwoFactor).unwrap();
        assert_eq!(json, "\"2fa\"");
        let parsed: AuthType = serde_json::from_str("\"oauth\"").unwrap();
        assert_eq!(parsed, AuthType::OAuth);
        let parsed: AuthType = serde_json::from_str("\"email_verification\"").unwrap();
        assert_eq!(parsed, AuthType::EmailVerification);
    }

    #[test]
    fn test_confidence_is_clamped() {
        let result = ExtractionResult::found(ArtifactType::SmsCode, "1234", 1.7);
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);

        let mut result = ExtractionResult::found(ArtifactType::SmsCode, "1234", 0.5);
        result.set_confidence(-3.0);
        assert!(result.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_session_usability() {
        let session = UserSession {
            user_id: "u".into(),
            environment: "dev".into(),
            auth_type: AuthType::Bearer,
            started_at: start(),
            last_used_at: start(),
            expires_at: Some(start() + ChronoDuration::hours(1)),
            cookies: Vec::new(),
            headers: BTreeMap::new(),
            local_storage: BTreeMap::new(),
            session_data: BTreeMap::new(),
            active: true,
        };
        assert!(session.is_usable_at(start()));
        assert!(!session.is_usable_at(start() + ChronoDuration::hours(2)));
    }
}
