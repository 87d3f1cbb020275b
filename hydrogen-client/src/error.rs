use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error for the client runtime, covering the taxonomy in spec
/// section 7: transport, protocol, correlation, delivery, application,
/// shutdown, and argument errors.
///
/// Mirrors the teacher's two-tier `WsClientError` / `ProviderError` split:
/// leaf errors convert in with `#[from]`, and a dedicated trait
/// ([`CorrelationError`]) exposes the inner application-level error object
/// the way `ethers_providers::RpcError` exposes a `JsonRpcError`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to server")]
    NotConnected,

    #[error("connection closed unexpectedly")]
    UnexpectedClose,

    #[error("websocket handshake or I/O error: {0}")]
    Transport(String),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error(transparent)]
    Message(#[from] hydrogen_core::Error),

    #[error("timed out waiting for response after {0:?}")]
    Timeout(std::time::Duration),

    #[error("server returned an error response: {0}")]
    Application(ApplicationError),

    #[error("unknown pending request: {0}")]
    UnknownCorrelation(Uuid),

    #[error("client is shutting down")]
    Shutdown,

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("internal channel closed; the client runtime has stopped")]
    DeadChannel,
}

/// The application-level error payload carried by a wire `ERROR` message or
/// a `RESPONSE` with `status: "error"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationError {
    pub error_code: String,
    pub error_message: String,
    pub details: Option<serde_json::Value>,
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error_message, self.error_code)
    }
}

impl ClientError {
    pub fn invalid_argument(field: &'static str, reason: impl Into<String>) -> Self {
        ClientError::InvalidArgument { field, reason: reason.into() }
    }
}

/// Bridges transport-layer errors to an application's own telemetry, per
/// spec section 7's "pluggable error-handler registry".
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, error: &ClientError);
}

/// An [`ErrorHandler`] that only logs via `tracing`. The default when no
/// handler is registered.
#[derive(Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn handle(&self, error: &ClientError) {
        tracing::error!(%error, "transport error");
    }
}

pub type SharedErrorHandler = Arc<dyn ErrorHandler>;

/// Exposes the inner [`ApplicationError`] a [`ClientError`] carries, if any,
/// mirroring the teacher's `RpcError` trait for bridging a transport's own
/// error type to a common `JsonRpcError`-shaped view.
pub trait CorrelationError {
    fn as_application_error(&self) -> Option<&ApplicationError>;
}

impl CorrelationError for ClientError {
    fn as_application_error(&self) -> Option<&ApplicationError> {
        match self {
            ClientError::Application(inner) => Some(inner),
            _ => None,
        }
    }
}
