//! Escalation controller.
//!
//! Wraps page fetches in an explicit state machine:
//!
//! ```text
//! Stealth --challenge--> Escalated --challenge--> ManualWait
//!    \                       |                       |
//!     +--------------- exhausted policy -------------+--> Aborted
//! ```
//!
//! Rate limits back off in place, malformed pages and transport failures get
//! a bounded number of retries, and a missing subject aborts immediately.
//! States only move forward within one harvest.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use super::classifier::{classify, identity_invalidated, Classification, PagePayload};
use super::error::{FetchError, HarvestError, HarvestResult};
use super::session::{
    ChallengeResolver, FetchSession, FetchTarget, RawResponse, SessionMode, SessionPool,
};
use crate::config::SourceConfig;

/// Retry and escalation limits.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationPolicy {
    /// Total attempts for a rate-limited request before giving up.
    pub rate_limit_attempts: u32,
    pub backoff_base: Duration,
    /// Upper bound for any single backoff sleep, `Retry-After` included.
    pub backoff_cap: Duration,
    /// Retries for a malformed response.
    pub malformed_retries: u32,
    /// Retries for a transport failure.
    pub network_retries: u32,
    pub manual_wait_timeout: Duration,
    /// Manual waits allowed per harvest.
    pub manual_waits: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            rate_limit_attempts: 4,
            backoff_base: Duration::from_millis(1500),
            backoff_cap: Duration::from_secs(30),
            malformed_retries: 2,
            network_retries: 2,
            manual_wait_timeout: Duration::from_secs(90),
            manual_waits: 1,
        }
    }
}

/// Controller state. Ordered: a harvest only ever moves to a later state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControllerState {
    Stealth,
    Escalated,
    ManualWait,
    Aborted,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Stealth => "stealth",
            ControllerState::Escalated => "escalated",
            ControllerState::ManualWait => "manual_wait",
            ControllerState::Aborted => "aborted",
        }
    }

    /// Session mode used while in this state.
    pub fn session_mode(&self) -> SessionMode {
        match self {
            ControllerState::Stealth => SessionMode::Stealth,
            _ => SessionMode::Escalated,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ControllerState,
    pub to: ControllerState,
    pub reason: String,
}

/// Exponential backoff with ±10% jitter, capped.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
    let raw = base.saturating_mul(exp).min(cap);
    let jitter = rand::rng().random_range(0.9..1.1);
    raw.mul_f64(jitter).min(cap)
}

/// Drives one harvest's fetches through the escalation state machine.
///
/// Owns its session exclusively; call [`finish`](Self::finish) to hand a
/// healthy session back to the pool.
pub struct EscalationController {
    subject: String,
    pool: Arc<SessionPool>,
    resolver: Arc<dyn ChallengeResolver>,
    source: Arc<SourceConfig>,
    policy: EscalationPolicy,
    state: ControllerState,
    session: Option<Box<dyn FetchSession>>,
    manual_waits: u32,
    failure: Option<HarvestError>,
    transitions: Vec<Transition>,
}

impl EscalationController {
    pub fn new(
        subject: &str,
        pool: Arc<SessionPool>,
        resolver: Arc<dyn ChallengeResolver>,
        source: Arc<SourceConfig>,
        policy: EscalationPolicy,
    ) -> Self {
        Self {
            subject: subject.to_string(),
            pool,
            resolver,
            source,
            policy,
            state: ControllerState::Stealth,
            session: None,
            manual_waits: 0,
            failure: None,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Every state change so far, in order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Fetch one page, retrying and escalating per policy.
    pub async fn request(&mut self, target: &FetchTarget) -> HarvestResult<PagePayload> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let mut rate_limited = 0u32;
        let mut malformed = 0u32;
        let mut network = 0u32;

        loop {
            let response = match self.fetch_once(target).await {
                Ok(response) => response,
                Err(FetchError::SessionExpired) => return Err(self.expire().await),
                Err(FetchError::Network(msg)) => {
                    network += 1;
                    if network > self.policy.network_retries {
                        return Err(self.abort(HarvestError::Network(msg)).await);
                    }
                    let delay = self.backoff(network);
                    warn!(
                        "{}: network error ({}), retry {}/{} in {:?}",
                        self.subject, msg, network, self.policy.network_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            if identity_invalidated(&response, &self.source) {
                return Err(self.expire().await);
            }

            let verdict = classify(&response, &self.source);
            debug!(
                "{}: cursor {} -> {} ({})",
                self.subject,
                target.cursor,
                verdict.label(),
                self.state
            );

            match verdict {
                Classification::Ok(page) => return Ok(page),
                Classification::Challenge => self.on_challenge().await?,
                Classification::RateLimited => {
                    rate_limited += 1;
                    if rate_limited >= self.policy.rate_limit_attempts {
                        return Err(self
                            .abort(HarvestError::RateLimited {
                                attempts: rate_limited,
                            })
                            .await);
                    }
                    let delay = self.rate_limit_delay(&response, rate_limited);
                    warn!(
                        "{}: rate limited (attempt {}/{}), backing off {:?}",
                        self.subject, rate_limited, self.policy.rate_limit_attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Classification::NotFound => {
                    let err = HarvestError::SubjectNotFound(self.subject.clone());
                    return Err(self.abort(err).await);
                }
                Classification::Malformed(reason) => {
                    malformed += 1;
                    if malformed > self.policy.malformed_retries {
                        return Err(self
                            .abort(HarvestError::UpstreamProtocolError(reason))
                            .await);
                    }
                    warn!(
                        "{}: malformed response ({}), retry {}/{}",
                        self.subject, reason, malformed, self.policy.malformed_retries
                    );
                    tokio::time::sleep(self.backoff(malformed)).await;
                }
            }
        }
    }

    /// End the harvest, returning a healthy session to the pool.
    pub async fn finish(mut self) -> Vec<Transition> {
        if let Some(session) = self.session.take() {
            if self.state == ControllerState::Aborted {
                let mut session = session;
                session.close().await;
            } else {
                self.pool.checkin(session).await;
            }
        }
        self.transitions
    }

    async fn fetch_once(&mut self, target: &FetchTarget) -> Result<RawResponse, FetchError> {
        if self.session.is_none() {
            let session = self.pool.checkout(self.state.session_mode()).await?;
            self.session = Some(session);
        }
        match self.session.as_mut() {
            Some(session) => session.fetch(target).await,
            None => Err(FetchError::Network("no session".to_string())),
        }
    }

    async fn on_challenge(&mut self) -> HarvestResult<()> {
        match self.state {
            ControllerState::Stealth => {
                self.transition(ControllerState::Escalated, "challenged in stealth mode");
                // Next fetch opens an escalated session.
                if let Some(mut session) = self.session.take() {
                    session.close().await;
                }
                Ok(())
            }
            ControllerState::Escalated | ControllerState::ManualWait => {
                if self.manual_waits >= self.policy.manual_waits {
                    return Err(self.abort(HarvestError::ChallengeUnresolved).await);
                }
                if self.state == ControllerState::Escalated {
                    self.transition(ControllerState::ManualWait, "challenged in escalated mode");
                }
                self.manual_waits += 1;

                let resolved = self
                    .resolver
                    .wait_for_resolution(&self.subject, self.policy.manual_wait_timeout)
                    .await;
                if resolved {
                    info!("{}: challenge resolved, retrying", self.subject);
                    Ok(())
                } else {
                    Err(self.abort(HarvestError::ChallengeUnresolved).await)
                }
            }
            ControllerState::Aborted => Err(self
                .failure
                .clone()
                .unwrap_or(HarvestError::ChallengeUnresolved)),
        }
    }

    /// The identity was rejected: forget it and abort this walk.
    async fn expire(&mut self) -> HarvestError {
        if let Some(mut session) = self.session.take() {
            session.invalidate().await;
        }
        self.abort(HarvestError::SessionExpired).await
    }

    /// Abort from outside a request, e.g. when a deadline expires between
    /// fetches. The held session is closed, never returned to the pool.
    pub async fn cancel(&mut self, err: HarvestError) -> HarvestError {
        self.transition(ControllerState::Aborted, &err.to_string());
        self.failure = Some(err.clone());
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
        err
    }

    async fn abort(&mut self, err: HarvestError) -> HarvestError {
        self.transition(ControllerState::Aborted, &err.to_string());
        self.failure = Some(err.clone());

        if let Some(mut session) = self.session.take() {
            if matches!(err, HarvestError::SubjectNotFound(_)) {
                self.pool.checkin(session).await;
            } else {
                session.close().await;
            }
        }
        err
    }

    fn transition(&mut self, to: ControllerState, reason: &str) {
        let from = self.state;
        if to <= from {
            return;
        }
        info!("{}: {} -> {} ({})", self.subject, from, to, reason);
        self.transitions.push(Transition {
            from,
            to,
            reason: reason.to_string(),
        });
        self.state = to;
    }

    fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.policy.backoff_base, self.policy.backoff_cap)
    }

    fn rate_limit_delay(&self, response: &RawResponse, attempt: u32) -> Duration {
        match response.retry_after {
            Some(retry_after) => retry_after.min(self.policy.backoff_cap),
            None => self.backoff(attempt),
        }
    }
}
