use std::error;

use credo_tokens::Session;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};

use crate::{authorization_header, AttachedCredential};

/// A middleware that renews a rejected credential and resends the request once
///
/// When a request authenticated by the [`PreSendGuard`][crate::PreSendGuard]
/// comes back with an authentication failure, the session's credential is
/// renewed and the request is sent again with the new credential. The resent
/// request is never renewed a second time: whatever it gets back, even
/// another authentication failure, is returned to the caller.
///
/// If the credential cannot be renewed, or the request body cannot be
/// replayed, the original response is returned unchanged.
#[derive(Clone, Debug)]
pub struct ReactiveRenewer {
    session: Session,
    statuses: Vec<StatusCode>,
}

impl ReactiveRenewer {
    /// Construct a new renewer treating `401 Unauthorized` as an
    /// authentication failure
    pub fn new(session: Session) -> Self {
        Self {
            session,
            statuses: vec![StatusCode::UNAUTHORIZED],
        }
    }

    /// Replaces the set of statuses treated as authentication failures
    pub fn with_auth_failure_statuses(
        mut self,
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    fn is_auth_failure(&self, status: StatusCode) -> bool {
        self.statuses.contains(&status)
    }
}

#[async_trait::async_trait]
impl Middleware for ReactiveRenewer {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let replay = req.try_clone();
        let resp = next.clone().run(req, extensions).await?;

        if !self.is_auth_failure(resp.status()) {
            return Ok(resp);
        }

        let Some(AttachedCredential(attached)) = extensions.get::<AttachedCredential>().cloned()
        else {
            tracing::trace!(
                status = resp.status().as_u16(),
                "request was not sent with a managed credential, not renewing"
            );
            return Ok(resp);
        };

        let Some(mut replay) = replay else {
            tracing::debug!(
                status = resp.status().as_u16(),
                "request body cannot be replayed, not renewing"
            );
            return Ok(resp);
        };

        tracing::debug!(
            status = resp.status().as_u16(),
            kind = attached.kind(),
            "credential rejected, renewing"
        );

        let renewed = match self.session.renew(&attached).await {
            Ok(renewed) => renewed,
            Err(err) => {
                let err: &dyn error::Error = &err;
                tracing::warn!(error = err, "unable to renew credential, returning rejection");
                return Ok(resp);
            }
        };

        let Some(token) = renewed.token() else {
            return Ok(resp);
        };

        let value = authorization_header(token).map_err(reqwest_middleware::Error::middleware)?;
        replay.headers_mut().insert(header::AUTHORIZATION, value);
        extensions.insert(AttachedCredential(renewed));

        tracing::debug!("resending request with renewed credential");
        next.run(replay, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use credo_tokens::{testing::MockTokenService, Credential};
    use reqwest::Client;
    use reqwest_middleware::ClientBuilder;

    use super::*;
    use crate::{
        test_support::{anonymous, session_holding, user, ScriptedServer},
        PreSendGuard,
    };

    fn client(
        session: Session,
        server: Arc<ScriptedServer>,
    ) -> reqwest_middleware::ClientWithMiddleware {
        ClientBuilder::new(Client::default())
            .with(PreSendGuard::new(session.clone()))
            .with(ReactiveRenewer::new(session))
            .with_arc(server)
            .build()
    }

    mod when_the_credential_is_accepted {
        use super::*;

        #[tokio::test]
        async fn renewer_passes_the_response_through() {
            let (session, service) =
                session_holding(user("abc", "xyz"), MockTokenService::new()).await;
            let server = Arc::new(ScriptedServer::default());

            let resp = client(session, server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(server.seen().len(), 1);
            assert!(service.calls().is_empty());
        }
    }

    mod when_a_user_credential_is_rejected {
        use super::*;

        #[tokio::test]
        async fn renewer_refreshes_and_resends_once() {
            let (session, service) = session_holding(
                user("abc", "xyz"),
                MockTokenService::new().on_refresh_grant("def", None),
            )
            .await;
            let server = Arc::new(ScriptedServer::rejecting(&["bearer abc"]));

            let resp = client(session.clone(), server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(
                server.seen(),
                vec![Some("bearer abc".to_owned()), Some("bearer def".to_owned())]
            );
            assert_eq!(service.refresh_calls(), 1);
            assert_eq!(service.anonymous_calls(), 0);

            let current = session.current().await;
            assert_eq!(current.access_token().unwrap().as_str(), "def");
            assert_eq!(current.refresh_token().unwrap().as_str(), "xyz");
        }

        #[tokio::test]
        async fn a_second_rejection_is_returned_without_renewing_again() {
            let (session, service) = session_holding(
                user("abc", "xyz"),
                MockTokenService::new()
                    .on_refresh_grant("def", None)
                    .on_refresh_grant("ghi", None),
            )
            .await;
            let server = Arc::new(ScriptedServer::rejecting(&["bearer abc", "bearer def"]));

            let resp = client(session, server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(server.seen().len(), 2);
            assert_eq!(service.refresh_calls(), 1);
        }

        #[tokio::test]
        async fn failed_refresh_returns_the_original_rejection() {
            let (session, service) = session_holding(
                user("abc", "xyz"),
                MockTokenService::new().on_refresh_failure(),
            )
            .await;
            let server = Arc::new(ScriptedServer::rejecting(&["bearer abc"]));

            let resp = client(session.clone(), server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(server.seen(), vec![Some("bearer abc".to_owned())]);
            assert_eq!(service.refresh_calls(), 1);
            assert_eq!(session.current().await, user("abc", "xyz"));
        }

        #[tokio::test]
        async fn concurrent_rejections_share_one_refresh() {
            let (session, service) = session_holding(
                user("abc", "xyz"),
                MockTokenService::new()
                    .with_delay(std::time::Duration::from_millis(20))
                    .on_refresh_grant("def", None),
            )
            .await;
            let server = Arc::new(ScriptedServer::rejecting(&["bearer abc"]));
            let client = client(session, server.clone());

            let mut handles = Vec::new();
            for _ in 0..6 {
                let client = client.clone();
                handles.push(tokio::spawn(async move {
                    client.get("https://example.com").send().await.unwrap().status()
                }));
            }

            for handle in handles {
                assert_eq!(handle.await.unwrap(), StatusCode::OK);
            }
            assert_eq!(service.refresh_calls(), 1);
        }
    }

    mod when_an_anonymous_credential_is_rejected {
        use super::*;

        #[tokio::test]
        async fn renewer_requests_a_new_anonymous_session() {
            let (session, service) = session_holding(
                anonymous("anon1"),
                MockTokenService::new().on_anonymous_grant("anon2"),
            )
            .await;
            let server = Arc::new(ScriptedServer::rejecting(&["bearer anon1"]));

            let resp = client(session, server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(server.seen()[1], Some("bearer anon2".to_owned()));
            assert_eq!(service.anonymous_calls(), 1);
            assert_eq!(service.refresh_calls(), 0);
        }
    }

    mod when_the_request_was_not_authenticated_by_the_guard {
        use super::*;

        #[tokio::test]
        async fn renewer_leaves_the_rejection_alone() {
            let (session, service) =
                session_holding(Credential::Absent, MockTokenService::new()).await;
            let server = Arc::new(ScriptedServer::rejecting(&["Bearer overridden!"]));

            let resp = client(session, server.clone())
                .get("https://example.com")
                .bearer_auth("overridden!")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(server.seen().len(), 1);
            assert!(service.calls().is_empty());
        }
    }

    mod with_custom_auth_failure_statuses {
        use super::*;

        #[tokio::test]
        async fn renewer_renews_on_the_configured_status() {
            let (session, service) = session_holding(
                user("abc", "xyz"),
                MockTokenService::new().on_refresh_grant("def", None),
            )
            .await;
            let server = Arc::new(
                ScriptedServer::rejecting(&["bearer abc"])
                    .with_rejection_status(StatusCode::FORBIDDEN),
            );

            let client = ClientBuilder::new(Client::default())
                .with(PreSendGuard::new(session.clone()))
                .with(ReactiveRenewer::new(session).with_auth_failure_statuses([
                    StatusCode::UNAUTHORIZED,
                    StatusCode::FORBIDDEN,
                ]))
                .with_arc(server.clone())
                .build();

            let resp = client.get("https://example.com").send().await.unwrap();

            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(service.refresh_calls(), 1);
        }

        #[tokio::test]
        async fn renewer_ignores_statuses_not_configured() {
            let (session, service) =
                session_holding(user("abc", "xyz"), MockTokenService::new()).await;
            let server = Arc::new(
                ScriptedServer::rejecting(&["bearer abc"])
                    .with_rejection_status(StatusCode::FORBIDDEN),
            );

            let resp = client(session, server.clone())
                .get("https://example.com")
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::FORBIDDEN);
            assert!(service.calls().is_empty());
        }
    }
}
