//! Drives one authentication attempt per test user.
//!
//! Auth types that need no email are simulated immediately. Email-based types go
//! through [`AuthFlowOrchestrator::wait_for_artifact`], a bounded sleep-and-retry
//! loop over a [`MailProbe`], and the artifact is merged into the user's session.
//!
//! ```text
//! Idle ──wait──▶ Waiting ──artifact──▶ Found
//!                   │
//!                   ├──deadline──▶ TimedOut
//!                   └──shutdown──▶ Cancelled
//! ```

use crate::error::Error;
use crate::extractor;
use crate::model::{
    ArtifactType, AuthFailureKind, AuthType, AuthenticationResult, Cookie, Email, ExtractionResult,
    TestUser,
};
use crate::monitor::MailProbe;
use crate::shutdown::Shutdown;
use crate::store::SessionStore;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Value stored under `auth_method` once an emailed artifact was received.
pub const EMAIL_VERIFIED: &str = "email_verified";

/// Name of the cookie issued by simulated form logins.
pub const FORM_SESSION_COOKIE: &str = "session";

/// Optional classifier consulted for low-confidence extractions.
///
/// It may only raise confidence; results are clamped to `[0, 1]`. The regex
/// extractor works without one.
#[async_trait]
pub trait ConfidenceBooster: Send + Sync {
    /// Returns a confidence for `value` being the `kind` artifact in `text`, or
    /// `None` to abstain.
    async fn assess(&self, kind: ArtifactType, value: &str, text: &str) -> Option<f64>;
}

/// Tuning for [`AuthFlowOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long [`authenticate`](AuthFlowOrchestrator::authenticate) waits for an email.
    pub wait_timeout: Duration,
    /// Pause between probes.
    pub retry_interval: Duration,
    /// Emails received this long before the wait began still count.
    pub arrival_grace: Duration,
    /// Extractions below this confidence are offered to the booster.
    pub boost_threshold: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(120),
            retry_interval: Duration::from_secs(2),
            arrival_grace: Duration::from_secs(60),
            boost_threshold: 0.8,
        }
    }
}

/// Where the current attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthFlowState {
    /// No wait in progress.
    #[default]
    Idle,
    /// Polling for the artifact.
    Waiting,
    /// The artifact arrived.
    Found,
    /// The deadline passed first.
    TimedOut,
    /// Shutdown was requested while waiting.
    Cancelled,
}

/// How [`AuthFlowOrchestrator::wait_for_artifact`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// A matching artifact was extracted.
    Found(ExtractionResult),
    /// The timeout elapsed; nothing matched.
    TimedOut {
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The shutdown signal fired.
    Cancelled {
        /// Time spent waiting.
        elapsed: Duration,
    },
}

/// Runs authentication attempts against a mail probe and a session store.
pub struct AuthFlowOrchestrator<P: MailProbe> {
    probe: P,
    store: SessionStore,
    config: OrchestratorConfig,
    booster: Option<Box<dyn ConfidenceBooster>>,
    shutdown: Shutdown,
    state: AuthFlowState,
    /// UIDs of emails whose artifact was already handed out.
    consumed: HashSet<u32>,
}

impl<P: MailProbe> AuthFlowOrchestrator<P> {
    /// Creates an orchestrator with default tuning.
    pub fn new(probe: P, store: SessionStore) -> Self {
        Self {
            probe,
            store,
            config: OrchestratorConfig::default(),
            booster: None,
            shutdown: Shutdown::never(),
            state: AuthFlowState::Idle,
            consumed: HashSet::new(),
        }
    }

    /// Replaces the tuning.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a confidence booster.
    #[must_use]
    pub fn with_booster(mut self, booster: impl ConfidenceBooster + 'static) -> Self {
        self.booster = Some(Box::new(booster));
        self
    }

    /// Aborts waits when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Current state of the attempt.
    #[must_use]
    pub fn state(&self) -> AuthFlowState {
        self.state
    }

    /// The session store in use.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Releases the probe, e.g. to stop a background monitor handle.
    pub fn into_probe(self) -> P {
        self.probe
    }

    /// Authenticates `user` and returns a result for the driver.
    ///
    /// Failures are reported in the result, never as errors.
    #[instrument(name = "AuthFlowOrchestrator::authenticate", skip_all, fields(user_id = %user.id, auth_type = %user.auth_type))]
    pub async fn authenticate(&mut self, user: &TestUser) -> AuthenticationResult {
        self.state = AuthFlowState::Idle;

        let Some(kind) = user.auth_type.required_artifact() else {
            return self.simulate(user);
        };

        let timeout = self.config.wait_timeout;
        match self
            .wait_for_artifact(kind, user.email.as_deref(), timeout)
            .await
        {
            WaitOutcome::Found(result) => self.record_artifact(user, &result),
            WaitOutcome::TimedOut { elapsed } => {
                let error = Error::WaitTimeout {
                    artifact: kind.to_string(),
                    elapsed,
                };
                AuthenticationResult::failed(AuthFailureKind::Timeout, error.to_string(), error.remedy())
            }
            WaitOutcome::Cancelled { elapsed } => AuthenticationResult::failed(
                AuthFailureKind::Cancelled,
                format!("stopped waiting for {kind} after {}s", elapsed.as_secs()),
                "authenticate the test user again",
            ),
        }
    }

    /// Polls for an artifact of `kind` until one is found or `timeout` elapses.
    ///
    /// The deadline is checked before every probe, so a zero timeout returns
    /// without polling. When `context_hint` is given, only emails whose recipient
    /// contains it (case-insensitively) are considered. Probe errors are logged and
    /// retried. A slow probe may overrun the deadline by one round-trip.
    /// An email whose artifact was already returned is never returned again.
    #[instrument(name = "AuthFlowOrchestrator::wait_for_artifact", skip(self), fields(artifact = %kind))]
    pub async fn wait_for_artifact(
        &mut self,
        kind: ArtifactType,
        context_hint: Option<&str>,
        timeout: Duration,
    ) -> WaitOutcome {
        let started = Instant::now();
        let wall_start = Utc::now();
        self.state = AuthFlowState::Waiting;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                self.state = AuthFlowState::TimedOut;
                info!(elapsed_secs = elapsed.as_secs(), "Timed out waiting for artifact");
                return WaitOutcome::TimedOut { elapsed };
            }

            if let Some(result) = self.probe_once(kind, context_hint, wall_start).await {
                self.state = AuthFlowState::Found;
                info!(
                    confidence = result.confidence,
                    uid = ?result.source.as_ref().map(|s| s.uid),
                    "Artifact found"
                );
                return WaitOutcome::Found(result);
            }

            let remaining = timeout.saturating_sub(started.elapsed());
            if !self
                .shutdown
                .sleep(self.config.retry_interval.min(remaining))
                .await
            {
                self.state = AuthFlowState::Cancelled;
                return WaitOutcome::Cancelled {
                    elapsed: started.elapsed(),
                };
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private methods
    // ─────────────────────────────────────────────────────────────────────────

    async fn probe_once(
        &mut self,
        kind: ArtifactType,
        context_hint: Option<&str>,
        wall_start: DateTime<Utc>,
    ) -> Option<ExtractionResult> {
        let since_start = (Utc::now() - wall_start).to_std().unwrap_or_default();
        let emails = match self
            .probe
            .recent_emails(since_start + self.config.arrival_grace)
            .await
        {
            Ok(emails) => emails,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "Mail probe failed, retrying");
                return None;
            }
        };

        let hint = context_hint.map(str::to_lowercase);
        for email in &emails {
            if self.consumed.contains(&email.uid)
                || !hint.as_deref().map_or(true, |h| matches_recipient(email, h))
            {
                continue;
            }
            let mut result = extractor::extract_for_type(kind, email);
            if !result.success {
                debug!(uid = email.uid, reason = ?result.reason, "No artifact in email");
                continue;
            }
            if result.confidence < self.config.boost_threshold {
                if let Some(booster) = self.booster.as_deref() {
                    boost(booster, &mut result, email).await;
                }
            }
            self.consumed.insert(email.uid);
            return Some(result);
        }
        None
    }

    /// Merges a found artifact into the user's session and builds the success result.
    fn record_artifact(&self, user: &TestUser, artifact: &ExtractionResult) -> AuthenticationResult {
        let session = match self.store.get_session(&user.id) {
            Ok(session) if session.active => Ok(session),
            Ok(_) | Err(Error::SessionNotFound { .. } | Error::SessionExpired { .. }) => {
                self.store.start_session(user)
            }
            Err(e) => Err(e),
        };

        let mut session = match session {
            Ok(session) => session,
            Err(e) => return storage_failure(&e),
        };

        let kind = artifact.artifact_type;
        session
            .session_data
            .insert(kind.as_str().to_string(), artifact.value.clone());
        session
            .session_data
            .insert("auth_method".to_string(), EMAIL_VERIFIED.to_string());

        if let Err(e) = self.store.update_session(&mut session) {
            return storage_failure(&e);
        }

        let mut result = AuthenticationResult::succeeded(format!("{kind} received"), session);
        if kind.is_link() {
            result.redirect_url = Some(artifact.value.clone());
        }
        result
    }

    /// Issues headers or cookies for auth types that need no email.
    fn simulate(&self, user: &TestUser) -> AuthenticationResult {
        let credentials = match simulated_credentials(user) {
            Ok(credentials) => credentials,
            Err(missing) => {
                return AuthenticationResult::failed(
                    AuthFailureKind::MissingCredentials,
                    format!("{} authentication needs the '{missing}' credential", user.auth_type),
                    format!("add '{missing}' to the credentials of user '{}'", user.id),
                )
            }
        };

        let mut session = match self.store.start_session(user) {
            Ok(session) => session,
            Err(e) => return storage_failure(&e),
        };
        match credentials {
            SimulatedCredentials::Header(name, value) => {
                session.headers.insert(name.to_string(), value);
            }
            SimulatedCredentials::Cookie(cookie) => session.cookies.push(cookie),
        }
        if let Err(e) = self.store.save(&session) {
            return storage_failure(&e);
        }

        debug!(expires_at = ?session.expires_at, "Simulated session stored");
        AuthenticationResult::succeeded(format!("{} credentials applied", user.auth_type), session)
    }
}

impl<P: MailProbe> std::fmt::Debug for AuthFlowOrchestrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlowOrchestrator")
            .field("store", &self.store)
            .field("config", &self.config)
            .field("booster", &self.booster.is_some())
            .field("state", &self.state)
            .field("consumed", &self.consumed.len())
            .finish_non_exhaustive()
    }
}

enum SimulatedCredentials {
    Header(&'static str, String),
    Cookie(Cookie),
}

/// Builds the header or cookie for a non-email auth type; `Err` names the
/// missing credential.
fn simulated_credentials(user: &TestUser) -> Result<SimulatedCredentials, &'static str> {
    let require = |key: &'static str| user.credential(key).ok_or(key);

    match user.auth_type {
        AuthType::Bearer | AuthType::OAuth => Ok(SimulatedCredentials::Header(
            "Authorization",
            format!("Bearer {}", require("token")?),
        )),
        AuthType::Basic => {
            let pair = format!("{}:{}", require("username")?, require("password")?);
            Ok(SimulatedCredentials::Header(
                "Authorization",
                format!("Basic {}", STANDARD.encode(pair)),
            ))
        }
        AuthType::ApiKey => Ok(SimulatedCredentials::Header(
            "X-API-Key",
            require("api_key")?.to_string(),
        )),
        AuthType::Form => {
            let username = require("username")?;
            require("password")?;
            let token = format!("{username}:{}", Utc::now().timestamp());
            Ok(SimulatedCredentials::Cookie(Cookie::new(
                FORM_SESSION_COOKIE,
                STANDARD.encode(token),
            )))
        }
        AuthType::MagicLink | AuthType::EmailVerification | AuthType::TwoFactor | AuthType::Sms => {
            Err("email")
        }
    }
}

/// Applies a booster score, which may only raise the confidence.
async fn boost(booster: &dyn ConfidenceBooster, result: &mut ExtractionResult, email: &Email) {
    let Some(score) = booster
        .assess(result.artifact_type, &result.value, &email.body)
        .await
    else {
        return;
    };
    let boosted = score.clamp(0.0, 1.0);
    if boosted > result.confidence {
        debug!(from = result.confidence, to = boosted, "Booster raised confidence");
        result.set_confidence(boosted);
    }
}

fn matches_recipient(email: &Email, hint_lowercase: &str) -> bool {
    email.recipient.to_lowercase().contains(hint_lowercase)
}

fn storage_failure(error: &Error) -> AuthenticationResult {
    AuthenticationResult::failed(
        AuthFailureKind::Storage,
        format!("could not persist the session: {error}"),
        error.remedy(),
    )
}
