use thiserror::Error;

/// Errors produced while building, serializing, or validating a [`crate::Message`].
///
/// This is the leaf error type for `hydrogen-core`; `hydrogen-client` wraps
/// it into its own top-level error the same way `ethers-providers`' client
/// errors wrap `serde_json::Error` and friends.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message envelope: {0}")]
    Malformed(String),

    #[error("unknown messageType: {0}")]
    UnknownMessageType(String),

    #[error("missing required field `{0}` for messageType `{1}`")]
    MissingField(&'static str, &'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },
}

impl Error {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument { field, reason: reason.into() }
    }
}
