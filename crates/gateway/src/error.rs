// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error kinds surfaced by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing, invalid, expired, or revoked token.
    AuthRejected(String),
    /// Too many handshakes from one client IP.
    RateLimited,
    /// Malformed or incomplete event payload.
    Validation(String),
    /// Event refers to a room, note, or scope that does not exist.
    ScopeNotFound(String),
    /// Shared store unreachable or breaker open.
    StoreUnavailable,
    /// A store operation failed but the store may recover.
    StoreOperationFailed(String),
    /// Unexpected internal fault.
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code, also used as the metrics error key.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthRejected(_) => "AUTH_REJECTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Validation(_) => "VALIDATION",
            Self::ScopeNotFound(_) => "SCOPE_NOT_FOUND",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::StoreOperationFailed(_) => "STORE_OPERATION_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::AuthRejected(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::ScopeNotFound(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable | Self::StoreOperationFailed(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable detail, when the kind carries one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::AuthRejected(d)
            | Self::Validation(d)
            | Self::ScopeNotFound(d)
            | Self::StoreOperationFailed(d)
            | Self::Internal(d) => Some(d),
            Self::RateLimited | Self::StoreUnavailable => None,
        }
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let message = match self {
            Self::AuthRejected(_) => "authentication rejected",
            Self::RateLimited => "too many connections",
            Self::Validation(_) => "invalid payload",
            Self::ScopeNotFound(_) => "unknown scope",
            Self::StoreUnavailable => "shared store unavailable",
            Self::StoreOperationFailed(_) => "shared store operation failed",
            Self::Internal(_) => "internal error",
        };
        ErrorBody { message: message.to_owned(), details: self.detail().map(str::to_owned) }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        (self.http_status(), Json(ErrorResponse { error: self.to_error_body() }))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail() {
            Some(d) => write!(f, "{}: {d}", self.code()),
            None => f.write_str(self.code()),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Body of the `error` event unicast to an offending session, and of
/// HTTP error responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Top-level HTTP error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}
