//! Unified error types for the order workflow service.
//!
//! Every fallible operation in the crate returns [`Result`]. Transport layers map
//! errors onto a four-way taxonomy through [`Error::kind`].

use sea_orm::DbErr;
use thiserror::Error;

/// Coarse classification used when reporting an error to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid credentials
    Unauthorized,
    /// Authenticated but not allowed to act on the resource
    Forbidden,
    /// Precondition failed; carries a user-facing message
    InvalidState,
    /// Invariant violation or infrastructure failure
    Internal,
}

/// Crate-wide error type
#[derive(Debug, Error)]
pub enum Error {
    /// Token missing, malformed, expired or issued before the user's password epoch
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller's role or relation to the resource does not permit the action
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// What the caller is missing
        reason: String,
    },

    /// The resource is in a state that does not allow the requested action
    #[error("{message}")]
    InvalidState {
        /// User-facing explanation
        message: String,
    },

    /// A balance decrease would push the balance below zero
    #[error("Insufficient funds: balance {current}, required {required}")]
    InsufficientFunds {
        /// Balance at the moment of the check, in kopecks
        current: i64,
        /// Amount that was requested, in kopecks
        required: i64,
    },

    /// A referenced record does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of record
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Invariant violation
    #[error("Internal error: {message}")]
    Internal {
        /// Diagnostic message, not meant for end users
        message: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Messaging collaborator failed to deliver
    #[error("Messaging error: {message}")]
    Messaging {
        /// Transport error text
        message: String,
    },

    /// Database error from `SeaORM`
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

impl Error {
    /// Shorthand for [`Error::Forbidden`].
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidState`].
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Classifies the error for a transport layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidState { .. } | Self::InsufficientFunds { .. } | Self::NotFound { .. } => {
                ErrorKind::InvalidState
            }
            Self::Internal { .. }
            | Self::Config { .. }
            | Self::Messaging { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::EnvVar(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(Error::forbidden("nope").kind(), ErrorKind::Forbidden);
        assert_eq!(
            Error::InsufficientFunds {
                current: 1,
                required: 2
            }
            .kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(Error::not_found("Order", 7).kind(), ErrorKind::InvalidState);
        assert_eq!(Error::internal("boom").kind(), ErrorKind::Internal);
        assert_eq!(
            Error::Database(DbErr::Custom("x".to_string())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_invalid_state_message_is_user_facing() {
        let err = Error::invalid_state("Order is already taken");
        assert_eq!(err.to_string(), "Order is already taken");
    }
}
