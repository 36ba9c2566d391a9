// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error taxonomy for the connectivity layer.
//!
//! Every failure surfaced by chain construction, tunneling or credential
//! provisioning is classified by [`ErrorKind`]. Chain failures are wrapped in
//! [`Error::Hop`] so callers can tell which hop broke.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AuthorizationDenied,
    Transient,
    HandshakeFailed,
    TransportLost,
    UserCancelled,
    ConnectionFailed,
    InvalidEndpoint,
    Config,
    Io,
    Internal,
}

/// Errors produced by the connectivity layer
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown instance, or the instance lacks the requested address field
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing permission, or an expired/invalid credential rejected by the remote end
    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Cloud API throttled or unreachable. Not retried automatically.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Protocol-level negotiation failure
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An established session dropped unexpectedly
    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("cancelled by user")]
    UserCancelled,

    /// A direct dial or proxied stream could not be opened
    #[error("connection to {target} failed: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("invalid endpoint '{spec}': {reason}")]
    InvalidEndpoint { spec: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Local failure unrelated to the remote side, e.g. key generation
    #[error("internal error: {0}")]
    Internal(String),

    /// Failure while building hop `hop` of a chain
    #[error("hop {hop} ({endpoint}) failed: {source}")]
    Hop {
        hop: usize,
        endpoint: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn connection_failed(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_endpoint(spec: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidEndpoint {
            spec: spec.into(),
            reason: reason.to_string(),
        }
    }

    /// Attach the failing hop's position and label.
    pub fn at_hop(self, hop: usize, endpoint: impl Into<String>) -> Self {
        match self {
            // Cancellation is never attributed to a hop.
            Self::UserCancelled => Self::UserCancelled,
            other => Self::Hop {
                hop,
                endpoint: endpoint.into(),
                source: Box::new(other),
            },
        }
    }

    /// Classification, looking through [`Error::Hop`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AuthorizationDenied(_) => ErrorKind::AuthorizationDenied,
            Self::Transient(_) => ErrorKind::Transient,
            Self::HandshakeFailed(_) => ErrorKind::HandshakeFailed,
            Self::TransportLost(_) => ErrorKind::TransportLost,
            Self::UserCancelled => ErrorKind::UserCancelled,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::InvalidEndpoint { .. } => ErrorKind::InvalidEndpoint,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Hop { source, .. } => source.kind(),
        }
    }

    /// Index of the failing hop, if this error came from chain construction.
    pub fn hop(&self) -> Option<usize> {
        match self {
            Self::Hop { hop, .. } => Some(*hop),
            _ => None,
        }
    }

    /// Whether the caller may reasonably retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::TransportLost | ErrorKind::ConnectionFailed
        )
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::UserCancelled => 130,
            ErrorKind::InvalidEndpoint | ErrorKind::Config => 2,
            ErrorKind::AuthorizationDenied | ErrorKind::HandshakeFailed => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::Transient => 75,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_wrapping_preserves_kind() {
        let err = Error::AuthorizationDenied("key expired".to_string()).at_hop(1, "ec2-user@i-1");
        assert_eq!(err.kind(), ErrorKind::AuthorizationDenied);
        assert_eq!(err.hop(), Some(1));
        assert_eq!(
            err.to_string(),
            "hop 1 (ec2-user@i-1) failed: authorization denied: key expired"
        );
    }

    #[test]
    fn test_cancellation_is_not_attributed_to_hop() {
        let err = Error::UserCancelled.at_hop(0, "bastion");
        assert!(matches!(err, Error::UserCancelled));
        assert_eq!(err.hop(), None);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::UserCancelled.exit_code(), 130);
        assert_eq!(Error::NotFound("i-1".into()).exit_code(), 4);
        assert_eq!(Error::TransportLost("eof".into()).exit_code(), 1);
        assert_ne!(
            Error::UserCancelled.exit_code(),
            Error::TransportLost("eof".into()).exit_code()
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Transient("throttled".into()).is_retryable());
        assert!(!Error::NotFound("i-1".into()).is_retryable());
        assert!(Error::connection_failed("10.0.0.1:22", "refused").is_retryable());
    }
}
