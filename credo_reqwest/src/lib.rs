//! Middleware to authenticate outgoing requests and recover from rejected
//! credentials
//!
//! Two middlewares cooperate around a shared [`Session`]:
//!
//! * [`PreSendGuard`] attaches the current credential to each request,
//!   obtaining an anonymous session first if none is held.
//! * [`ReactiveRenewer`] watches for authentication failures on requests the
//!   guard authenticated, renews the credential, and resends the request once.
//!
//! [`RequestPipeline`] composes both in the required order.
//!
//! ```
//! use std::sync::Arc;
//!
//! use credo_reqwest::RequestPipeline;
//! use credo_tokens::{CredentialStore, DeviceId, Session};
//! # use credo_tokens::testing::MockTokenService;
//! #
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let service = Arc::new(MockTokenService::new().on_anonymous_grant("anon1"));
//!
//! let session = Session::new(
//!     Arc::new(CredentialStore::in_memory()),
//!     service,
//!     DeviceId::from_static("device-1"),
//! );
//!
//! let client = RequestPipeline::new(session).build(reqwest::Client::default());
//!
//! let req = client.get("https://example.com/api/v1/me");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! If a request already has an `Authorization` header by the time the guard
//! runs, that value is left in place and the request is never renewed. The
//! guard can also be restricted to particular backends with a predicate.
//! These predicates can be composed together to evaluate more complex
//! requirements.
//!
//! ```
//! use credo_reqwest::{ExactHostMatch, HttpsOnly, RequestPipeline};
//! use predicates::prelude::PredicateBooleanExt;
//! # use std::sync::Arc;
//! # use credo_tokens::{testing::MockTokenService, CredentialStore, DeviceId, Session};
//! # let session = Session::new(
//! #     Arc::new(CredentialStore::in_memory()),
//! #     Arc::new(MockTokenService::new()),
//! #     DeviceId::from_static("device-1"),
//! # );
//!
//! RequestPipeline::new(session)
//!     .with_predicate(HttpsOnly.and(ExactHostMatch::new("oauth.example.com")));
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use credo_clock::Clock;
use credo_tokens::{Credential, IssuedToken};
use predicates::{prelude::*, reflection};
use reqwest::{header, Request};

mod guard;
mod pipeline;
mod renewer;

pub use guard::PreSendGuard;
pub use pipeline::RequestPipeline;
pub use renewer::ReactiveRenewer;

/// The credential the [`PreSendGuard`] attached to a request
///
/// Stored in the request extensions so that later middleware knows which
/// credential the server saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedCredential(pub Credential);

/// Builds the `Authorization` header value for a credential
///
/// The value is `<token type> <access token>` and is marked sensitive.
fn authorization_header(
    token: &IssuedToken,
) -> Result<header::HeaderValue, header::InvalidHeaderValue> {
    if tracing::enabled!(tracing::Level::TRACE) {
        let now = credo_clock::System.now();

        tracing::trace!(
            token.status = ?token.token_status_at(now),
            token.lifetime = token.lifetime().0,
            token.issued = token.issued().0,
            token.stale = token.stale().0,
            token.until_stale = token.until_stale_at(now).0,
            token.expiry = token.expiry().0,
            token.until_expired = token.until_expired_at(now).0,
            "attaching access token"
        );
    }

    let token_type = token.token_type().as_str();
    let access_token = token.access_token().as_str();

    let mut value = BytesMut::with_capacity(token_type.len() + access_token.len() + 1);
    value.put_slice(token_type.as_bytes());
    value.put_u8(b' ');
    value.put_slice(access_token.as_bytes());

    let mut value = header::HeaderValue::from_maybe_shared(value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

/// Only authenticate a request if it is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only authenticate a request if it is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url().host_str().unwrap_or("<no host>").to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
