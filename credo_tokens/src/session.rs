//! Acquisition, renewal and revocation of the current credential

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::watch;

use crate::{
    error::{AuthError, TokenServiceError},
    service::{RevocableToken, TokenService},
    AuthorizationCodeRef, Credential, CredentialStore, DeviceId, DeviceIdRef, TokenGrant,
};

type RenewalResult = Result<Credential, Arc<TokenServiceError>>;

/// The credential lifecycle shared by every request made on behalf of a client
///
/// A session ties the [`CredentialStore`] to the [`TokenService`] that can
/// fill it. Clones share the same store, service and renewal state.
///
/// Renewal is single-flight: while one renewal is in progress, every other
/// caller asking for one waits on it and receives the same outcome. The
/// renewal itself runs as a separate task, so it completes and updates the
/// store even if all of its callers give up waiting.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    service: Arc<dyn TokenService>,
    device_id: DeviceId,
    in_flight: Mutex<Option<watch::Receiver<Option<RenewalResult>>>>,
}

impl Session {
    /// Constructs a new session
    pub fn new(
        store: Arc<CredentialStore>,
        service: Arc<dyn TokenService>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                service,
                device_id,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// The store holding the current credential
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// The identifier of this installation, used for anonymous sessions
    pub fn device_id(&self) -> &DeviceIdRef {
        &self.inner.device_id
    }

    /// The credential currently held
    pub async fn current(&self) -> Credential {
        self.inner.store.current().await
    }

    /// Gets a credential to send with a request
    ///
    /// A held credential is returned as is, without checking its expiry. If
    /// nothing is held, an anonymous session is obtained first.
    pub async fn ensure(&self) -> Result<Credential, AuthError> {
        let current = self.inner.store.current().await;
        if !current.is_absent() {
            return Ok(current);
        }

        tracing::debug!("no credential held, obtaining an anonymous session");
        self.renew_shared(Credential::Absent)
            .await
            .map_err(AuthError::CredentialAbsent)
    }

    /// Renews the credential after `observed` was rejected by the server
    ///
    /// If the store already holds a different credential, someone else has
    /// renewed it and that credential is returned without contacting the
    /// token service. Otherwise user sessions are refreshed and anything else
    /// gets a new anonymous session. On failure the store is left untouched.
    pub async fn renew(&self, observed: &Credential) -> Result<Credential, AuthError> {
        self.renew_shared(observed.clone())
            .await
            .map_err(AuthError::RenewalUnavailable)
    }

    /// Completes an interactive login, replacing the current credential with
    /// the resulting user session
    pub async fn login(
        &self,
        code: &AuthorizationCodeRef,
        redirect_uri: &str,
    ) -> Result<Credential, TokenServiceError> {
        let grant = self
            .inner
            .service
            .exchange_authorization_code(code, redirect_uri)
            .await?;

        if !grant.has_refresh_token() {
            tracing::warn!("authority issued no refresh token for login");
        }

        let credential = grant.into_credential();
        if credential.is_absent() {
            return Err(TokenServiceError::EmptyAccessToken);
        }

        self.inner.store.replace(credential.clone()).await;
        tracing::info!(kind = credential.kind(), "logged in");
        Ok(credential)
    }

    /// Revokes the current credential with the authority and forgets it
    ///
    /// The store is cleared even when the authority could not be reached;
    /// the revocation failure is still reported.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let current = self.inner.store.current().await;

        let revoked = match &current {
            Credential::Absent => Ok(()),
            Credential::Anonymous(session) => {
                self.inner
                    .service
                    .revoke(RevocableToken::Access(session.token().access_token()))
                    .await
            }
            Credential::User(session) => {
                self.inner
                    .service
                    .revoke(RevocableToken::Refresh(session.refresh_token()))
                    .await
            }
        };

        self.inner.store.clear().await;

        match revoked {
            Ok(()) => {
                tracing::info!(kind = current.kind(), "logged out");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    "unable to revoke credential, forgot it locally"
                );
                Err(AuthError::RevocationFailure(error))
            }
        }
    }

    async fn renew_shared(&self, observed: Credential) -> RenewalResult {
        let mut outcome = {
            let mut in_flight = lock(&self.inner.in_flight);
            match &*in_flight {
                Some(rx) => {
                    tracing::trace!("joining renewal already in progress");
                    rx.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    *in_flight = Some(rx.clone());

                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let slot = ReleaseOnDrop(&inner.in_flight);
                        let result = inner.perform_renewal(&observed).await;
                        drop(slot);
                        let _ = tx.send(Some(result));
                    });

                    rx
                }
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };

        result.unwrap_or_else(|| Err(Arc::new(TokenServiceError::Interrupted)))
    }
}

impl Inner {
    async fn perform_renewal(&self, observed: &Credential) -> RenewalResult {
        let current = self.store.current().await;
        if !current.is_absent() && !current.same_access_token(observed) {
            tracing::debug!(
                kind = current.kind(),
                "credential already renewed, using current"
            );
            return Ok(current);
        }

        let result = match &current {
            Credential::User(session) => {
                tracing::debug!("refreshing user session");
                self.service
                    .refresh(session.refresh_token())
                    .await
                    .map(|grant| {
                        if grant.has_refresh_token() {
                            tracing::debug!("authority rotated the refresh token");
                        }
                        grant.renewing(session)
                    })
            }
            Credential::Anonymous(_) | Credential::Absent => {
                tracing::debug!(from = current.kind(), "requesting anonymous session");
                self.service
                    .exchange_anonymous(&self.device_id)
                    .await
                    .map(TokenGrant::into_credential)
            }
        };

        let result = result.and_then(|credential| {
            if credential.is_absent() {
                Err(TokenServiceError::EmptyAccessToken)
            } else {
                Ok(credential)
            }
        });

        match result {
            Ok(credential) => {
                self.store.replace(credential.clone()).await;
                tracing::info!(
                    from = current.kind(),
                    to = credential.kind(),
                    "renewed credential"
                );
                Ok(credential)
            }
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    kind = current.kind(),
                    "unable to renew credential"
                );
                Err(Arc::new(error))
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Frees the in-flight slot when a renewal task ends, even by panic or
/// cancellation, so that the next caller starts a fresh renewal
struct ReleaseOnDrop<'a>(&'a Mutex<Option<watch::Receiver<Option<RenewalResult>>>>);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.inner.store)
            .field("device_id", &self.inner.device_id)
            .field("renewing", &lock(&self.inner.in_flight).is_some())
            .finish()
    }
}
