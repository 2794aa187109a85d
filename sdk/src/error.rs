//! Client error types.
//!
//! Only two failure kinds originate inside the client itself: a required
//! payload key being absent, and a request that cannot be matched to an
//! operation. Everything the server decides (authorization, validation,
//! conflicts) stays in the HTTP response, which is returned untouched.

use thiserror::Error;

/// Errors surfaced by [`NeedToKnowClient`](crate::NeedToKnowClient).
#[derive(Error, Debug)]
pub enum NtkError {
    /// A required key was absent from the request payload. Raised before
    /// any network I/O happens.
    #[error("missing required key in data: {0}")]
    MissingKey(&'static str),

    /// A polymorphic operation could not pick a server call from the
    /// payload: none of the selector keys were present, or more than one
    /// was.
    #[error("could not match keys to a method")]
    NoMethodMatch,

    /// An operation name passed to [`call`](crate::NeedToKnowClient::call)
    /// does not resolve to a known handler.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A payload field carried a value outside its allowed set.
    #[error("invalid field value: {0}")]
    Validation(String),

    /// The token endpoint answered with a body that has no `token` field.
    #[error("malformed token response: {0}")]
    MalformedToken(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NtkError>;
