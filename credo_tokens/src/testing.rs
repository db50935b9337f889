//! A scripted token service for exercising renewal paths

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use credo_clock::{DurationSecs, TestClock, UnixTime};

use crate::{
    error::TokenServiceError,
    service::{RevocableToken, TokenService},
    AccessToken, AuthorizationCodeRef, DeviceIdRef, RefreshToken, RefreshTokenRef, Scope,
    TokenGrant, TokenLifetimeConfig, TokenType,
};

/// A call observed by [`MockTokenService`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenCall {
    /// An authorization code exchange
    AuthorizationCode(String),
    /// A refresh with the given refresh token
    Refresh(String),
    /// An anonymous exchange with the given device ID
    Anonymous(String),
    /// A revocation of the given secret
    Revoke(String),
}

type Outcome = Result<TokenGrant, TokenServiceError>;

/// A token service answering from per-operation queues of scripted outcomes
///
/// An operation with nothing left in its queue fails with a 500 status.
#[derive(Debug)]
pub struct MockTokenService {
    lifetime: TokenLifetimeConfig<TestClock>,
    lifetime_secs: DurationSecs,
    code: Mutex<VecDeque<Outcome>>,
    refresh: Mutex<VecDeque<Outcome>>,
    anonymous: Mutex<VecDeque<Outcome>>,
    revoke_fails: AtomicBool,
    delay: Option<Duration>,
    calls: Mutex<Vec<TokenCall>>,
}

impl Default for MockTokenService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTokenService {
    /// Constructs a mock issuing one-hour tokens stamped at time 1000
    pub fn new() -> Self {
        Self::with_clock(TestClock::new(UnixTime(1_000)))
    }

    /// Constructs a mock stamping tokens from the given clock
    pub fn with_clock(clock: TestClock) -> Self {
        Self {
            lifetime: TokenLifetimeConfig::default().with_clock(clock),
            lifetime_secs: DurationSecs(3600),
            code: Mutex::default(),
            refresh: Mutex::default(),
            anonymous: Mutex::default(),
            revoke_fails: AtomicBool::new(false),
            delay: None,
            calls: Mutex::default(),
        }
    }

    /// Sets the lifetime of issued tokens
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime_secs = lifetime;
        self
    }

    /// Delays every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Constructs a grant as the authority would issue it now
    pub fn grant(&self, access: &str, refresh: Option<&str>) -> TokenGrant {
        TokenGrant {
            token: self.lifetime.create_token(
                AccessToken::new(access.to_owned()),
                TokenType::from_static("bearer"),
                Scope::from_static("read"),
                self.lifetime_secs,
            ),
            refresh_token: refresh.map(|r| RefreshToken::new(r.to_owned())),
        }
    }

    /// Queues a successful authorization code exchange
    pub fn on_code_grant(self, access: &str, refresh: &str) -> Self {
        let grant = self.grant(access, Some(refresh));
        push(&self.code, Ok(grant));
        self
    }

    /// Queues a successful refresh
    pub fn on_refresh_grant(self, access: &str, refresh: Option<&str>) -> Self {
        let grant = self.grant(access, refresh);
        push(&self.refresh, Ok(grant));
        self
    }

    /// Queues a rejected refresh
    pub fn on_refresh_failure(self) -> Self {
        push(&self.refresh, Err(rejected("invalid_grant")));
        self
    }

    /// Queues a successful anonymous exchange
    pub fn on_anonymous_grant(self, access: &str) -> Self {
        let grant = self.grant(access, None);
        push(&self.anonymous, Ok(grant));
        self
    }

    /// Queues a rejected anonymous exchange
    pub fn on_anonymous_failure(self) -> Self {
        push(&self.anonymous, Err(rejected("unsupported_grant_type")));
        self
    }

    /// Makes every revocation fail
    pub fn revoke_fails(self) -> Self {
        self.revoke_fails.store(true, Ordering::Relaxed);
        self
    }

    /// All calls observed so far, in order
    pub fn calls(&self) -> Vec<TokenCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The number of refresh calls observed
    pub fn refresh_calls(&self) -> usize {
        self.count(|c| matches!(c, TokenCall::Refresh(_)))
    }

    /// The number of anonymous exchanges observed
    pub fn anonymous_calls(&self) -> usize {
        self.count(|c| matches!(c, TokenCall::Anonymous(_)))
    }

    /// The number of revocations observed
    pub fn revoke_calls(&self) -> usize {
        self.count(|c| matches!(c, TokenCall::Revoke(_)))
    }

    fn count(&self, f: impl Fn(&TokenCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| f(c))
            .count()
    }

    async fn answer(&self, call: TokenCall, queue: &Mutex<VecDeque<Outcome>>) -> Outcome {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(TokenServiceError::ErrorWithBody {
                    status: 500,
                    body: "no scripted response".into(),
                })
            })
    }
}

fn push(queue: &Mutex<VecDeque<Outcome>>, outcome: Outcome) {
    queue
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push_back(outcome);
}

fn rejected(error: &str) -> TokenServiceError {
    TokenServiceError::ErrorWithBody {
        status: 400,
        body: format!(r#"{{"error":"{error}"}}"#),
    }
}

#[async_trait]
impl TokenService for MockTokenService {
    async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.answer(TokenCall::AuthorizationCode(code.as_str().to_owned()), &self.code)
            .await
    }

    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.answer(TokenCall::Refresh(refresh_token.as_str().to_owned()), &self.refresh)
            .await
    }

    async fn exchange_anonymous(
        &self,
        device_id: &DeviceIdRef,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.answer(TokenCall::Anonymous(device_id.as_str().to_owned()), &self.anonymous)
            .await
    }

    async fn revoke(&self, token: RevocableToken<'_>) -> Result<(), TokenServiceError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(TokenCall::Revoke(token.secret().to_owned()));

        if self.revoke_fails.load(Ordering::Relaxed) {
            Err(TokenServiceError::ErrorWithBody {
                status: 503,
                body: "unavailable".into(),
            })
        } else {
            Ok(())
        }
    }
}
