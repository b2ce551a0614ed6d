use std::error::Error as StdError;

use courier_common::types::ReplyKind;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared across channel traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport cannot deliver this kind of reply at all. Retrying
    /// will not help.
    #[error("reply kind {kind} is not supported by this channel")]
    Unsupported { kind: ReplyKind },

    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// Operation is currently unavailable (not connected/ready).
    #[error("channel operation unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn unsupported(kind: ReplyKind) -> Self {
        Self::Unsupported { kind }
    }

    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether sending again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unsupported { .. } | Self::InvalidInput { .. })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_is_not_retryable() {
        let err = Error::unsupported(ReplyKind::Voice);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "reply kind VOICE is not supported by this channel"
        );
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::unavailable("socket closed").is_retryable());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = Error::external("post message", io);
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "channel operation failed: post message: timed out"
        );
        assert!(!Error::invalid_input("empty receiver").is_retryable());
    }
}
