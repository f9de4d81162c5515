//! Gateway boundary: the trait every caller holds and the error it returns.

use std::fmt;

use async_trait::async_trait;
use bks_schemas::{NewAppointment, NewClient, RemoteAppointment, RemoteClient};
use serde_json::Value;
use tracing::{error, info, warn};

/// Outcome of a remote create: the normalized response payload, or why not.
pub type PushResult = Result<Value, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Sync flag off or no base URL. Not a fault; no request was made.
    Disabled,
    /// Connect failure, timeout, or body read failure.
    Transport(String),
    /// Non-2xx status.
    Status(u16),
    /// Body could not be decoded as JSON.
    Malformed(String),
    /// Decoded body had a shape no envelope rule accepts.
    UnexpectedShape(String),
}

impl GatewayError {
    /// Worth another attempt later. Malformed/shape errors after a 2xx are
    /// not retried: the remote may already have stored the record.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status(code) => *code >= 500 || *code == 429 || *code == 408,
            GatewayError::Disabled
            | GatewayError::Malformed(_)
            | GatewayError::UnexpectedShape(_) => false,
        }
    }

    /// Fetch-path logging; level depends on the failure class.
    pub fn log(&self, op: &str) {
        match self {
            GatewayError::Disabled => info!(op, "remote sync disabled; skipping"),
            GatewayError::UnexpectedShape(_) => {
                warn!(op, error = %self, "unexpected remote response shape")
            }
            GatewayError::Transport(_)
            | GatewayError::Status(_)
            | GatewayError::Malformed(_) => error!(op, error = %self, "remote call failed"),
        }
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Disabled => f.write_str("sync disabled"),
            GatewayError::Transport(msg) => write!(f, "transport error: {msg}"),
            GatewayError::Status(code) => write!(f, "remote returned status {code}"),
            GatewayError::Malformed(msg) => write!(f, "malformed response: {msg}"),
            GatewayError::UnexpectedShape(msg) => write!(f, "unexpected response shape: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Sole point of contact with the remote service.
///
/// Fetches never fail: any fault is logged and yields an empty sequence.
/// Creates return a [`PushResult`] and never panic or raise.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Flag on and base URL configured.
    fn is_enabled(&self) -> bool;

    async fn fetch_clients(&self) -> Vec<RemoteClient>;

    async fn fetch_appointments(&self) -> Vec<RemoteAppointment>;

    async fn create_client(&self, client: &NewClient) -> PushResult;

    async fn create_appointment(&self, appointment: &NewAppointment) -> PushResult;

    /// Enabled and the remote answers `GET /clients` with 2xx.
    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_displays_exact_reason() {
        assert_eq!(GatewayError::Disabled.to_string(), "sync disabled");
    }

    #[test]
    fn retry_classification() {
        assert!(GatewayError::Transport("refused".into()).is_retryable());
        assert!(GatewayError::Status(503).is_retryable());
        assert!(GatewayError::Status(429).is_retryable());
        assert!(!GatewayError::Status(422).is_retryable());
        assert!(!GatewayError::Malformed("x".into()).is_retryable());
        assert!(!GatewayError::Disabled.is_retryable());
    }
}
