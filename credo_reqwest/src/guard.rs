use std::error;

use credo_tokens::{AuthError, Session};
use predicates::Predicate;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next, Result};

use crate::{authorization_header, AttachedCredential, HttpsOnly};

/// A middleware that attaches the session's credential to outgoing requests
///
/// If the session holds no credential, an anonymous session is obtained
/// first. Should that fail, the request is sent without authentication and
/// whatever the server answers is returned to the caller.
///
/// The credential is not checked for expiry here; a rejected credential is
/// dealt with by the [`ReactiveRenewer`][crate::ReactiveRenewer].
#[derive(Clone, Debug)]
pub struct PreSendGuard<P> {
    session: Session,
    predicate: P,
}

impl PreSendGuard<HttpsOnly> {
    /// Construct a new guard from a session
    ///
    /// By default, this guard only authenticates requests sent via HTTPS. To
    /// change this behavior, provide a custom predicate with
    /// [`with_predicate()`][Self::with_predicate()].
    pub fn new(session: Session) -> Self {
        Self {
            session,
            predicate: HttpsOnly,
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> PreSendGuard<P> {
        PreSendGuard {
            session: self.session,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for PreSendGuard<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !self.predicate.eval(&req) {
            tracing::trace!(url = %req.url(), "request not eligible for authentication");
            return next.run(req, extensions).await;
        }

        if req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request already carries authorization, leaving it in place");
            return next.run(req, extensions).await;
        }

        match self.session.ensure().await {
            Ok(credential) => {
                if let Some(token) = credential.token() {
                    let value =
                        authorization_header(token).map_err(reqwest_middleware::Error::middleware)?;
                    req.headers_mut().insert(header::AUTHORIZATION, value);
                    extensions.insert(AttachedCredential(credential));
                }
            }
            Err(AuthError::CredentialAbsent(source)) => {
                let source: &dyn error::Error = &*source;
                tracing::warn!(
                    error = source,
                    "no credential available, sending request unauthenticated"
                );
            }
            Err(err) => {
                let err: &dyn error::Error = &err;
                tracing::warn!(error = err, "sending request unauthenticated");
            }
        }

        next.run(req, extensions).await
    }
}
