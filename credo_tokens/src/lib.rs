//! Credential lifecycle management for clients of OAuth2-protected APIs
//!
//! A client talking to such an API always holds at most one [`Credential`]:
//! nothing yet, an anonymous session obtained for the installation, or a user
//! session backed by a refresh token. This crate keeps that credential in a
//! [`CredentialStore`], writes it through to durable storage, and renews it
//! against a [`TokenService`][service::TokenService] when the API rejects it.
//!
//! The [`Session`] ties these together. Its two core operations are the ones
//! an HTTP middleware needs:
//!
//! * [`Session::ensure()`] returns the credential to attach to an outgoing
//!   request, obtaining an anonymous session first if nothing is held.
//! * [`Session::renew()`] replaces a credential that the server rejected.
//!   Concurrent renewals of the same credential share a single request to the
//!   token service.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use credo_tokens::{
//!     service::{OAuth2Config, OAuth2TokenService},
//!     ClientId, CredentialStore, DeviceId, Session, TokenLifetimeConfig,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OAuth2Config::new(
//!     reqwest::Url::parse("https://www.example.com/api/v1/access_token")?,
//!     reqwest::Url::parse("https://www.example.com/api/v1/revoke_token")?,
//!     ClientId::from_static("my-client"),
//! );
//!
//! let service = OAuth2TokenService::new(
//!     reqwest::Client::new(),
//!     config,
//!     TokenLifetimeConfig::default(),
//! );
//!
//! let session = Session::new(
//!     Arc::new(CredentialStore::in_memory()),
//!     Arc::new(service),
//!     DeviceId::from_static("5b4f2c8e-installation"),
//! );
//!
//! let credential = session.ensure().await?;
//! tracing::info!(kind = credential.kind(), "ready to make requests");
//! # Ok(())
//! # }
//! ```
//!
//! Credentials can also be renewed ahead of time, before they go stale, by
//! spawning a [background refresher][refresher::spawn_refresher].
//!
//! # Features
//!
//! The following features are enabled by default:
//!
//! * `oauth2`: Provides [`OAuth2TokenService`][service::OAuth2TokenService],
//!   a token service speaking to an OAuth2 authority with [reqwest].
//! * `file`: Provides [`FilePersistence`][persistence::FilePersistence],
//!   storing credentials on the local filesystem.
//! * `rand`: Provides [`RandomEarlyJitter`][jitter::RandomEarlyJitter] based
//!   on the random number generator provided by the [rand] crate.
//!
//! The `test-util` feature exposes a scripted token service for testing code
//! built on this crate.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
mod braids;
mod credential;
pub mod error;
pub mod jitter;
pub mod persistence;
pub mod refresher;
pub mod service;
mod session;
mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use braids::*;
pub use credential::{
    AnonymousSession, Credential, IssuedToken, TokenGrant, TokenLifetimeConfig, TokenStatus,
    UserSession,
};
pub use error::{AuthError, TokenServiceError};
pub use session::Session;
pub use store::{ChangeListener, CredentialStore};
