use credo_tokens::Session;
use predicates::Predicate;
use reqwest::{Request, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};

use crate::{HttpsOnly, PreSendGuard, ReactiveRenewer};

/// Composes the [`PreSendGuard`] and [`ReactiveRenewer`] in order
///
/// The guard always runs before the renewer, so a request is authenticated
/// before it is sent, and a resent request passes through neither again.
#[derive(Clone, Debug)]
pub struct RequestPipeline<P> {
    guard: PreSendGuard<P>,
    renewer: ReactiveRenewer,
}

impl RequestPipeline<HttpsOnly> {
    /// Construct a new pipeline around a session
    pub fn new(session: Session) -> Self {
        Self {
            guard: PreSendGuard::new(session.clone()),
            renewer: ReactiveRenewer::new(session),
        }
    }

    /// Replaces the default predicate deciding which requests are
    /// authenticated
    pub fn with_predicate<P>(self, predicate: P) -> RequestPipeline<P> {
        RequestPipeline {
            guard: self.guard.with_predicate(predicate),
            renewer: self.renewer,
        }
    }
}

impl<P> RequestPipeline<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    /// Replaces the set of statuses treated as authentication failures
    pub fn with_auth_failure_statuses(
        mut self,
        statuses: impl IntoIterator<Item = StatusCode>,
    ) -> Self {
        self.renewer = self.renewer.with_auth_failure_statuses(statuses);
        self
    }

    /// Appends the pipeline to an existing middleware stack
    ///
    /// Middleware added to `builder` before this call runs before the guard;
    /// middleware added after runs between the renewer and the transport,
    /// and so also sees resent requests.
    pub fn attach(self, builder: ClientBuilder) -> ClientBuilder {
        builder.with(self.guard).with(self.renewer)
    }

    /// Builds a client sending every request through the pipeline
    pub fn build(self, client: reqwest::Client) -> ClientWithMiddleware {
        self.attach(ClientBuilder::new(client)).build()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use credo_tokens::{testing::MockTokenService, Credential};
    use reqwest::Client;

    use super::*;
    use crate::{
        test_support::{session_holding, ScriptedServer},
        ExactHostMatch,
    };

    #[tokio::test]
    async fn bootstraps_then_renews_through_one_client() {
        let (session, service) = session_holding(
            Credential::Absent,
            MockTokenService::new()
                .on_anonymous_grant("anon1")
                .on_anonymous_grant("anon2"),
        )
        .await;
        let server = Arc::new(ScriptedServer::rejecting(&["bearer anon1"]));

        let client = RequestPipeline::new(session.clone())
            .attach(ClientBuilder::new(Client::default()))
            .with_arc(server.clone())
            .build();

        let resp = client.get("https://example.com").send().await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            server.seen(),
            vec![
                Some("bearer anon1".to_owned()),
                Some("bearer anon2".to_owned())
            ]
        );
        assert_eq!(service.anonymous_calls(), 2);
        assert_eq!(
            session.current().await.access_token().unwrap().as_str(),
            "anon2"
        );
    }

    #[tokio::test]
    async fn predicate_limits_authentication_to_matching_hosts() {
        let (session, _) = session_holding(
            Credential::Absent,
            MockTokenService::new().on_anonymous_grant("anon1"),
        )
        .await;
        let server = Arc::new(ScriptedServer::default());

        let client = RequestPipeline::new(session)
            .with_predicate(ExactHostMatch::new("oauth.example.com"))
            .attach(ClientBuilder::new(Client::default()))
            .with_arc(server.clone())
            .build();

        client.get("https://example.com").send().await.unwrap();
        client.get("https://oauth.example.com").send().await.unwrap();

        assert_eq!(server.seen(), vec![None, Some("bearer anon1".to_owned())]);
    }
}
