//! A token service backed by an OAuth2 authority

use std::marker::PhantomData;

use async_trait::async_trait;
use credo_clock::{Clock, System};

use super::{
    dto::{
        self, AuthorizationCodeGrant, GrantPayload, InstalledClientGrant, RefreshTokenGrant,
        RevocationRequest,
    },
    RevocableToken, TokenService,
};
use crate::{
    error::TokenServiceError, AuthorizationCodeRef, ClientId, ClientSecret, DeviceIdRef,
    RefreshTokenRef, Scope, TokenGrant, TokenLifetimeConfig,
};

/// The grant used to obtain anonymous sessions for installed clients
pub const DEFAULT_INSTALLED_CLIENT_GRANT: &str =
    "https://oauth.reddit.com/grants/installed_client";

/// Endpoints and client credentials for an OAuth2 authority
#[derive(Clone, Debug)]
pub struct OAuth2Config {
    token_url: reqwest::Url,
    revoke_url: reqwest::Url,
    client_id: ClientId,
    client_secret: Option<ClientSecret>,
    installed_client_grant: String,
}

impl OAuth2Config {
    /// Constructs a configuration for a public client with no secret
    pub fn new(token_url: reqwest::Url, revoke_url: reqwest::Url, client_id: ClientId) -> Self {
        Self {
            token_url,
            revoke_url,
            client_id,
            client_secret: None,
            installed_client_grant: DEFAULT_INSTALLED_CLIENT_GRANT.to_owned(),
        }
    }

    /// Authenticates to the authority with a client secret
    pub fn with_client_secret(mut self, client_secret: ClientSecret) -> Self {
        self.client_secret = Some(client_secret);
        self
    }

    /// Overrides the grant type used to obtain anonymous sessions
    pub fn with_installed_client_grant(mut self, grant_type: impl Into<String>) -> Self {
        self.installed_client_grant = grant_type.into();
        self
    }

    /// The token endpoint
    pub fn token_url(&self) -> &reqwest::Url {
        &self.token_url
    }

    /// The revocation endpoint
    pub fn revoke_url(&self) -> &reqwest::Url {
        &self.revoke_url
    }

    /// The client identifier
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }
}

/// A [`TokenService`] talking to an OAuth2 authority over HTTP
///
/// Requests are authenticated with HTTP basic authentication using the
/// client ID and, when configured, the client secret. Grants are sent as
/// URL-encoded form data unless [`using_json_body()`][Self::using_json_body()]
/// is called.
#[derive(Debug)]
pub struct OAuth2TokenService<C = System, T = FormBody> {
    client: reqwest::Client,
    config: OAuth2Config,
    lifetime_config: TokenLifetimeConfig<C>,
    content_type: PhantomData<fn() -> T>,
}

impl<C> OAuth2TokenService<C, FormBody> {
    /// Constructs a new OAuth2 token service
    pub fn new(
        client: reqwest::Client,
        config: OAuth2Config,
        lifetime_config: TokenLifetimeConfig<C>,
    ) -> Self {
        Self {
            client,
            config,
            lifetime_config,
            content_type: PhantomData,
        }
    }

    /// Configures the service to send grants to the authority as JSON
    pub fn using_json_body(self) -> OAuth2TokenService<C, JsonBody> {
        OAuth2TokenService {
            client: self.client,
            config: self.config,
            lifetime_config: self.lifetime_config,
            content_type: PhantomData,
        }
    }
}

impl<C, T> OAuth2TokenService<C, T> {
    /// The authority configuration
    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    fn post(&self, url: &reqwest::Url) -> reqwest::RequestBuilder {
        self.client.post(url.clone()).basic_auth(
            &self.config.client_id,
            self.config.client_secret.as_ref().map(|s| s.as_str()),
        )
    }
}

impl<C: Clock, T: RequestType> OAuth2TokenService<C, T> {
    #[tracing::instrument(
        err,
        skip(self, grant),
        fields(
            token_url = %self.config.token_url,
            client_id = %self.config.client_id,
            grant_type = grant.grant_type(),
        ),
    )]
    async fn request_token<G: GrantPayload>(
        &self,
        grant: &G,
    ) -> Result<TokenGrant, TokenServiceError> {
        tracing::trace!("requesting token from authority");

        let req = T::attach_payload(self.post(&self.config.token_url), grant);
        let resp = req
            .send()
            .await
            .map_err(|e| TokenServiceError::RequestSend(e.into()))?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received token response from issuing authority"
        );

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(|e| TokenServiceError::BodyReadError(e.into()))?;
            return Err(TokenServiceError::ErrorWithBody {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| TokenServiceError::BodyReadError(e.into()))?;
        let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

        let token = self.lifetime_config.create_token(
            resp.access_token,
            resp.token_type,
            resp.scope.unwrap_or_else(|| Scope::from_static("")),
            resp.expires_in,
        );

        tracing::info!(
            has_refresh_token = resp.refresh_token.is_some(),
            lifetime = token.lifetime().0,
            stale = token.stale().0,
            expiry = token.expiry().0,
            "received new tokens"
        );

        Ok(TokenGrant {
            token,
            refresh_token: resp.refresh_token,
        })
    }
}

#[async_trait]
impl<C, T> TokenService for OAuth2TokenService<C, T>
where
    C: Clock + Send + Sync,
    T: RequestType,
{
    async fn exchange_authorization_code(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &str,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.request_token(&AuthorizationCodeGrant { code, redirect_uri })
            .await
    }

    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.request_token(&RefreshTokenGrant { refresh_token })
            .await
    }

    async fn exchange_anonymous(
        &self,
        device_id: &DeviceIdRef,
    ) -> Result<TokenGrant, TokenServiceError> {
        self.request_token(&InstalledClientGrant {
            grant_type: &self.config.installed_client_grant,
            device_id,
        })
        .await
    }

    #[tracing::instrument(
        err,
        skip(self, token),
        fields(revoke_url = %self.config.revoke_url, token_type_hint = token.type_hint()),
    )]
    async fn revoke(&self, token: RevocableToken<'_>) -> Result<(), TokenServiceError> {
        let payload = RevocationRequest {
            token: token.secret(),
            token_type_hint: token.type_hint(),
        };

        let resp = T::attach_payload(self.post(&self.config.revoke_url), &payload)
            .send()
            .await
            .map_err(|e| TokenServiceError::RequestSend(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(|e| TokenServiceError::BodyReadError(e.into()))?;
            return Err(TokenServiceError::ErrorWithBody {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("token revoked");
        Ok(())
    }
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: Send + Sync + 'static {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches grants to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches grants to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
