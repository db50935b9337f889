//! The token service: the authority that issues, renews and revokes credentials

use async_trait::async_trait;

use crate::{
    error::TokenServiceError, AccessTokenRef, AuthorizationCodeRef, DeviceIdRef, RefreshTokenRef,
    TokenGrant,
};

#[cfg(feature = "oauth2")]
pub mod dto;
#[cfg(feature = "oauth2")]
pub mod oauth2;

#[cfg(feature = "oauth2")]
pub use oauth2::{FormBody, JsonBody, OAuth2Config, OAuth2TokenService, RequestType};

/// A token that can be revoked with the authority
#[derive(Clone, Copy, Debug)]
pub enum RevocableToken<'a> {
    /// An access token
    Access(&'a AccessTokenRef),
    /// A refresh token, which also invalidates access tokens issued from it
    Refresh(&'a RefreshTokenRef),
}

impl<'a> RevocableToken<'a> {
    /// The raw secret to revoke
    pub fn secret(&self) -> &'a str {
        match self {
            RevocableToken::Access(t) => t.as_str(),
            RevocableToken::Refresh(t) => t.as_str(),
        }
    }

    /// The OAuth2 `token_type_hint` for this token
    pub fn type_hint(&self) -> &'static str {
        match self {
            RevocableToken::Access(_) => "access_token",
            RevocableToken::Refresh(_) => "refresh_token",
        }
    }
}

/// An authority able to issue and renew credentials
///
/// Each operation is a single round trip. Failures are reported as
/// [`TokenServiceError`] and are never retried by the operation itself.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Exchanges the code from an interactive login for a user credential
    async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &str,
    ) -> Result<TokenGrant, TokenServiceError>;

    /// Renews a user credential
    ///
    /// Authorities do not resend the refresh token, so the grant generally
    /// has none; callers carry the prior one over.
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenGrant, TokenServiceError>;

    /// Obtains an anonymous credential for this installation
    async fn exchange_anonymous(
        &self,
        device_id: &DeviceIdRef,
    ) -> Result<TokenGrant, TokenServiceError>;

    /// Asks the authority to revoke a token
    async fn revoke(&self, token: RevocableToken<'_>) -> Result<(), TokenServiceError>;
}
