//! Errors raised while obtaining or renewing credentials

use std::{error, sync::Arc};

use thiserror::Error;

/// A boxed, thread-safe error
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// An error while talking to the token service
#[derive(Debug, Error)]
pub enum TokenServiceError {
    /// The authority answered with an error status
    #[error("error requesting token from authority ({status}): {body}")]
    ErrorWithBody {
        /// The HTTP status returned by the authority
        status: u16,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] BoxError),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] BoxError),
    /// The authority answered without an access token
    #[error("authority issued an empty access token")]
    EmptyAccessToken,
    /// The request was abandoned before an outcome was known
    #[error("token request did not complete")]
    Interrupted,
}

/// A failure of the authentication pipeline
///
/// None of these are fatal: the request they concern proceeds, or the
/// response that triggered them is returned unchanged.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was held and none could be obtained
    #[error("no credential could be obtained")]
    CredentialAbsent(#[source] Arc<TokenServiceError>),
    /// Authentication failed and the credential could not be renewed
    #[error("credential renewal unavailable")]
    RenewalUnavailable(#[source] Arc<TokenServiceError>),
    /// The authority did not acknowledge a revocation
    #[error("credential revocation failed")]
    RevocationFailure(#[source] TokenServiceError),
}
