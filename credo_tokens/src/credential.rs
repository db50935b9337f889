use credo_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, Scope, ScopeRef, TokenType,
    TokenTypeRef,
};

/// An access token as issued by the authority, with lifetime information
/// stamped locally at receipt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    access_token: AccessToken,
    token_type: TokenType,
    #[serde(default = "empty_scope")]
    scope: Scope,
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

fn empty_scope() -> Scope {
    Scope::from_static("")
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be renewed
    Stale,
    /// The token is no longer valid
    Expired,
}

impl IssuedToken {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the kind of token, used as the authorization scheme
    #[inline]
    pub fn token_type(&self) -> &TokenTypeRef {
        &self.token_type
    }

    /// Gets the scopes granted to the token
    #[inline]
    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    /// Gets the token's lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was received
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the interval during which the token is valid
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's current lifetime status
    #[inline]
    pub fn token_status(&self) -> TokenStatus {
        self.token_status_with_clock(&System)
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// A session obtained without a user login
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonymousSession {
    token: IssuedToken,
}

impl AnonymousSession {
    /// The session's current access token
    #[inline]
    pub fn token(&self) -> &IssuedToken {
        &self.token
    }
}

/// A session obtained through an interactive login, renewable with its
/// refresh token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    token: IssuedToken,
    refresh_token: RefreshToken,
}

impl UserSession {
    /// The session's current access token
    #[inline]
    pub fn token(&self) -> &IssuedToken {
        &self.token
    }

    /// The long-lived secret used to renew the session
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }
}

/// The credential currently held by a client
///
/// The zero-value, [`Credential::Absent`], stands for "nothing acquired yet"
/// and is what a fresh install or a revoked session holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credential {
    /// No credential has been acquired
    #[default]
    Absent,
    /// An anonymous, installed-client session
    Anonymous(AnonymousSession),
    /// A user session backed by a refresh token
    User(UserSession),
}

impl Credential {
    /// Constructs an anonymous credential
    ///
    /// A token with an empty access token authenticates nothing, so the
    /// result is [`Credential::Absent`] in that case.
    pub fn anonymous(token: IssuedToken) -> Self {
        if token.access_token.as_str().is_empty() {
            Credential::Absent
        } else {
            Credential::Anonymous(AnonymousSession { token })
        }
    }

    /// Constructs a user credential
    ///
    /// An empty refresh token cannot renew anything, so the result is an
    /// anonymous credential in that case. An empty access token yields
    /// [`Credential::Absent`].
    pub fn user(token: IssuedToken, refresh_token: RefreshToken) -> Self {
        if refresh_token.as_str().is_empty() {
            Credential::anonymous(token)
        } else if token.access_token.as_str().is_empty() {
            Credential::Absent
        } else {
            Credential::User(UserSession {
                token,
                refresh_token,
            })
        }
    }

    /// Whether this is the zero-value
    ///
    /// A session whose access token is empty, as may be read back from
    /// persistence, counts as absent.
    #[inline]
    pub fn is_absent(&self) -> bool {
        self.access_token().map_or(true, |a| a.as_str().is_empty())
    }

    /// Whether this credential can be renewed with a refresh token
    #[inline]
    pub fn is_renewable(&self) -> bool {
        matches!(self, Credential::User(_))
    }

    /// The issued token, unless absent
    pub fn token(&self) -> Option<&IssuedToken> {
        match self {
            Credential::Absent => None,
            Credential::Anonymous(s) => Some(s.token()),
            Credential::User(s) => Some(s.token()),
        }
    }

    /// The access token, unless absent
    #[inline]
    pub fn access_token(&self) -> Option<&AccessTokenRef> {
        self.token().map(IssuedToken::access_token)
    }

    /// The refresh token, if this is a user session
    pub fn refresh_token(&self) -> Option<&RefreshTokenRef> {
        match self {
            Credential::User(s) => Some(s.refresh_token()),
            _ => None,
        }
    }

    /// Whether both credentials carry the same access token
    ///
    /// Two absent credentials are considered the same.
    #[inline]
    pub fn same_access_token(&self, other: &Credential) -> bool {
        self.access_token() == other.access_token()
    }

    /// A short label for the kind of credential, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Absent => "absent",
            Credential::Anonymous(_) => "anonymous",
            Credential::User(_) => "user",
        }
    }

    /// Whether the credential should be renewed as of the provided time
    ///
    /// An absent credential always needs renewal.
    pub fn needs_renewal_at(&self, time: UnixTime) -> bool {
        self.is_absent()
            || self
                .token()
                .map_or(true, |t| t.token_status_at(time) != TokenStatus::Fresh)
    }
}

/// A successful response from the token service
#[derive(Clone, Debug)]
pub struct TokenGrant {
    /// The newly issued access token
    pub token: IssuedToken,
    /// The refresh token, if the authority sent one
    pub refresh_token: Option<RefreshToken>,
}

impl TokenGrant {
    /// Converts the grant into a credential
    ///
    /// Grants carrying a non-empty refresh token become user sessions; all
    /// others become anonymous sessions.
    pub fn into_credential(self) -> Credential {
        match self.refresh_token {
            Some(rt) => Credential::user(self.token, rt),
            None => Credential::anonymous(self.token),
        }
    }

    /// Whether the grant carries a usable refresh token
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .map_or(false, |rt| !rt.as_str().is_empty())
    }

    /// Merges a refresh grant into the session it renewed
    ///
    /// Authorities omit the refresh token from refresh responses, so the
    /// prior one carries over unless a replacement was sent.
    pub fn renewing(self, prior: &UserSession) -> Credential {
        let refresh_token = match self.refresh_token {
            Some(rt) if !rt.as_str().is_empty() => rt,
            _ => prior.refresh_token.clone(),
        };

        Credential::user(self.token, refresh_token)
    }
}

/// Configuration for determining how long a token should be considered fresh
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    freshness_period: f64,
    min_staleness_period: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a freshness period of 75%, with a minimum stale period of 30 seconds, and using
    /// the system clock.
    fn default() -> Self {
        Self {
            freshness_period: 0.75,
            min_staleness_period: DurationSecs(30),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token using this configuration will be considered stale when the `freshness_period`
    /// (represented as a ratio of the token's lifetime) has passed. The token will always
    /// be considered stale with at least `min_staleness_period` remaining.
    pub fn new(freshness_period: f64, min_staleness_period: DurationSecs) -> Self {
        Self {
            freshness_period,
            min_staleness_period,
            clock: System,
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            freshness_period: self.freshness_period,
            min_staleness_period: self.min_staleness_period,
            clock,
        }
    }

    /// The clock used to stamp tokens
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn time_to_stale(&self, issued: UnixTime, valid_duration: DurationSecs) -> UnixTime {
        let fresh_for = valid_duration * self.freshness_period;
        let latest = DurationSecs(valid_duration.0.saturating_sub(self.min_staleness_period.0));
        issued + fresh_for.min(latest)
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Stamps a freshly received access token with its lifetime
    pub fn create_token(
        &self,
        access_token: AccessToken,
        token_type: TokenType,
        scope: Scope,
        valid_duration: DurationSecs,
    ) -> IssuedToken {
        let issued = self.clock.now();
        IssuedToken {
            access_token,
            token_type,
            scope,
            lifetime: valid_duration,
            issued,
            stale: self.time_to_stale(issued, valid_duration),
            expiry: issued + valid_duration,
        }
    }
}
