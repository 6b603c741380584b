//! Error types for the request-execution layer.
//!
//! Every fallible operation in this crate returns [`Result`]. The variants
//! follow the status taxonomy callers care about: argument problems are
//! reported before anything touches the network, `401` responses get their
//! own variant because they drive the token refresh cycle, and transport
//! timeouts are kept apart from other network failures.

use crate::{http::StatusCode, response::ErrorResponse};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while building, executing or decoding a request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed URI template, missing variable or missing required value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The server rejected the credentials (HTTP 401).
    #[error("Authentication rejected ({status}): {body}")]
    AuthenticationRejected {
        /// Status code returned by the server.
        status: StatusCode,
        /// Raw response body, if it could be read.
        body: String,
    },

    /// Login or refresh completed but yielded no usable token.
    #[error("No {0} available")]
    MissingToken(&'static str),

    /// The transport gave up waiting for the server.
    #[error("Request timed out")]
    Timeout,

    /// Connection refused, DNS failure, broken body stream, ...
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport failure reported by a non-reqwest transport.
    #[error("Transport error: {0}")]
    TransportMessage(String),

    /// Non-2xx status other than 401 when a typed body was requested.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code returned by the server.
        status: StatusCode,
        /// Raw response body, if it could be read.
        body: String,
    },

    /// Structured error payload returned by the Dify API.
    #[error("API error: {0}")]
    Api(ErrorResponse),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A user supplied hook or status handler failed.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl Error {
    /// Maps a reqwest failure onto the crate taxonomy, keeping timeouts distinct.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Transport(err)
        }
    }

    /// Builds the error matching a non-success status.
    pub(crate) fn from_status(status: StatusCode, body: String) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            Error::AuthenticationRejected { status, body }
        } else {
            Error::Status { status, body }
        }
    }

    /// Returns `true` when the failure is a credential rejection that a token
    /// refresh may cure.
    pub fn is_authentication_rejected(&self) -> bool {
        match self {
            Error::AuthenticationRejected { .. } => true,
            Error::Api(err) => err.status == u32::from(StatusCode::UNAUTHORIZED.as_u16()),
            _ => false,
        }
    }

    /// Returns `true` for transport timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// Status code carried by the error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::AuthenticationRejected { status, .. } | Error::Status { status, .. } => {
                Some(*status)
            }
            Error::Api(err) => u16::try_from(err.status)
                .ok()
                .and_then(|s| StatusCode::from_u16(s).ok()),
            _ => None,
        }
    }
}
