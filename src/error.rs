// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy and deterministic classification.
//!
//! Every failure that crosses a component boundary is one of five kinds.
//! Classification of raw failures (message text plus optional status code)
//! is a pure function: identical input always yields the same kind, and
//! the first matching rule wins. Retry policy keys off the kind, so
//! classification determinism is what makes retry behavior reproducible.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five failure kinds recognized by the sync core.
///
/// `Network` and `ExternalService` are transient and retryable by default;
/// the other three propagate on first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Network,
    Auth,
    DataIntegrity,
    BusinessLogic,
    ExternalService,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Auth => write!(f, "auth"),
            Self::DataIntegrity => write!(f, "data_integrity"),
            Self::BusinessLogic => write!(f, "business_logic"),
            Self::ExternalService => write!(f, "external_service"),
        }
    }
}

/// Error type for all sync-core operations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("business logic error: {0}")]
    BusinessLogic(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    /// Distinguished fail-fast rejection from an open circuit breaker.
    /// Never retried locally; the breaker is the sole gate for the service.
    #[error("circuit breaker open for '{service}', request rejected")]
    CircuitOpen { service: String },

    /// Operation requires an active streaming connection.
    #[error("no active connection for game '{0}'")]
    NotConnected(String),
}

impl SyncError {
    /// The taxonomy kind of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::NotConnected(_) => ErrorClass::Network,
            Self::Auth(_) => ErrorClass::Auth,
            Self::DataIntegrity(_) => ErrorClass::DataIntegrity,
            Self::BusinessLogic(_) => ErrorClass::BusinessLogic,
            Self::ExternalService(_) | Self::CircuitOpen { .. } => ErrorClass::ExternalService,
        }
    }

    /// Whether this error may be retried under the given allow-list.
    ///
    /// `CircuitOpen` is never retryable regardless of the list: the breaker
    /// already decided the service should not be called.
    #[must_use]
    pub fn is_retryable(&self, allowed: &[ErrorClass]) -> bool {
        if matches!(self, Self::CircuitOpen { .. }) {
            return false;
        }
        allowed.contains(&self.class())
    }

    /// Classify a raw failure into an error kind.
    ///
    /// Rules are evaluated in a fixed order (Network, Auth, DataIntegrity,
    /// BusinessLogic) and the first match wins; anything unmatched falls
    /// back to `ExternalService`.
    #[must_use]
    pub fn classify(message: &str, status: Option<u16>) -> ErrorClass {
        let msg = message.to_ascii_lowercase();

        // Network: transport-level failures and gateway statuses.
        if matches!(status, Some(408 | 429 | 502 | 503 | 504))
            || msg.contains("timeout")
            || msg.contains("timed out")
            || msg.contains("connection")
            || msg.contains("econnrefused")
            || msg.contains("network")
            || msg.contains("socket")
            || msg.contains("dns")
        {
            return ErrorClass::Network;
        }

        // Auth: credential and permission failures.
        if matches!(status, Some(401 | 403))
            || msg.contains("unauthorized")
            || msg.contains("forbidden")
            || msg.contains("auth")
            || msg.contains("token")
            || msg.contains("credential")
        {
            return ErrorClass::Auth;
        }

        // DataIntegrity: the payload itself is unusable.
        if matches!(status, Some(400 | 422))
            || msg.contains("invalid")
            || msg.contains("malformed")
            || msg.contains("corrupt")
            || msg.contains("parse")
            || msg.contains("schema")
            || msg.contains("integrity")
        {
            return ErrorClass::DataIntegrity;
        }

        // BusinessLogic: the operation is well-formed but not allowed.
        if matches!(status, Some(409 | 412))
            || msg.contains("not allowed")
            || msg.contains("denied")
            || msg.contains("insufficient")
            || msg.contains("conflict")
            || msg.contains("limit exceeded")
        {
            return ErrorClass::BusinessLogic;
        }

        ErrorClass::ExternalService
    }

    /// Build a classified error from a raw failure.
    #[must_use]
    pub fn from_raw(message: impl Into<String>, status: Option<u16>) -> Self {
        let message = message.into();
        match Self::classify(&message, status) {
            ErrorClass::Network => Self::Network(message),
            ErrorClass::Auth => Self::Auth(message),
            ErrorClass::DataIntegrity => Self::DataIntegrity(message),
            ErrorClass::BusinessLogic => Self::BusinessLogic(message),
            ErrorClass::ExternalService => Self::ExternalService(message),
        }
    }
}
