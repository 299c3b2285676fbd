//! Error taxonomy for the narrative provider boundary.

use std::time::Duration;
use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the narrative provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited - caller should retry after the specified duration.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        context: Option<ErrorContext>,
    },

    /// The response arrived but is not the contract shape - permanent,
    /// fail fast.
    #[error("invalid response from {provider}/{model}: {message}")]
    InvalidResponse {
        provider: &'static str,
        model: String,
        message: String,
    },

    /// Provider-side failure - may be retryable (5xx) or not.
    #[error("{provider}/{model} error: {message}")]
    Provider {
        provider: &'static str,
        model: String,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Request exceeded the hard wall-clock timeout - retryable.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, etc.) - fail fast.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn invalid_response(
        provider: &'static str,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidResponse {
            provider,
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn provider(
        provider: &'static str,
        model: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::Provider {
            provider,
            model: model.into(),
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn provider_with_context(
        provider: &'static str,
        model: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            model: model.into(),
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error class is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidResponse { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Short error code for logging and typed failure surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Provider { .. } => "provider_error",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }
}
