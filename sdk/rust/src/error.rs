//! Typed errors for the lgql SDK.

use lgql_runtime::{FieldError, SchemaError, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Transport errors
    TransportError,
    Timeout,
    EndpointNotFound,

    // GraphQL errors
    ParseError,
    ValidationError,
    ExecutionError,

    // Schema errors
    SchemaError,

    // Live channel errors
    StreamFailed,
    SubscriptionStopped,

    // Store errors
    StoreError,

    // Serialization errors
    SerializeError,
    DeserializeError,

    // Internal errors
    InternalError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "TRANSPORT_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::EndpointNotFound => "ENDPOINT_NOT_FOUND",
            Self::ParseError => "PARSE_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::SchemaError => "SCHEMA_ERROR",
            Self::StreamFailed => "STREAM_FAILED",
            Self::SubscriptionStopped => "SUBSCRIPTION_STOPPED",
            Self::StoreError => "STORE_ERROR",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Maps a GraphQL `extensions.code` to an SDK code.
    pub fn from_graphql(code: &str) -> Self {
        match code {
            "GRAPHQL_PARSE_FAILED" => Self::ParseError,
            "GRAPHQL_VALIDATION_FAILED" => Self::ValidationError,
            _ => Self::ExecutionError,
        }
    }

    /// Returns true if retrying the same call may succeed. Live channels
    /// are never retried automatically; callers re-subscribe.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError | Self::Timeout)
    }

    /// Returns true if the request itself is at fault.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ParseError | Self::ValidationError | Self::EndpointNotFound
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// SDK error.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct SdkError {
    /// Typed error code.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Extension data for debugging.
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl SdkError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extensions: None,
        }
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransportError, message)
    }

    pub fn timeout(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::Timeout, format!("timed out waiting for {what}"))
    }

    pub fn endpoint_not_found(endpoint: &str) -> Self {
        Self::new(
            ErrorCode::EndpointNotFound,
            format!("no endpoint named `{endpoint}`"),
        )
    }

    /// A live channel terminated with an error.
    pub fn stream_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StreamFailed, message)
    }

    pub fn stopped() -> Self {
        Self::new(ErrorCode::SubscriptionStopped, "subscription was stopped")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl From<SchemaError> for SdkError {
    fn from(error: SchemaError) -> Self {
        Self::new(ErrorCode::SchemaError, error.to_string())
    }
}

impl From<StoreError> for SdkError {
    fn from(error: StoreError) -> Self {
        Self::new(ErrorCode::StoreError, error.to_string())
    }
}

impl From<&FieldError> for SdkError {
    fn from(error: &FieldError) -> Self {
        let code = error
            .extensions
            .as_ref()
            .and_then(|e| e.get("code"))
            .and_then(serde_json::Value::as_str)
            .map_or(ErrorCode::ExecutionError, ErrorCode::from_graphql);
        let mut sdk = Self::new(code, error.message.clone());
        if let Some(path) = &error.path {
            sdk = sdk.with_extension("path", path);
        }
        sdk
    }
}

impl Serialize for SdkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SdkError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

/// Type alias for SDK results.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Result extension for mapping foreign errors.
pub trait ResultExt<T> {
    /// Maps the error to an SdkError with the given code.
    fn map_sdk_err(self, code: ErrorCode) -> SdkResult<T>;

    /// Maps the error to an SdkError with the given code and message. The
    /// original message is kept as an extension.
    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_sdk_err(self, code: ErrorCode) -> SdkResult<T> {
        self.map_err(|e| SdkError::new(code, e.to_string()))
    }

    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T> {
        self.map_err(|e| {
            SdkError::new(code, message).with_extension("original_error", e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lgql_runtime::PathSegment;
    use serde_json::json;

    #[test]
    fn test_error_code_properties() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(!ErrorCode::StreamFailed.is_retryable());
        assert!(ErrorCode::ValidationError.is_client_error());
        assert!(!ErrorCode::InternalError.is_client_error());
    }

    #[test]
    fn test_field_error_conversion() {
        let field = FieldError::new("cannot query field `nope` on type `Query`")
            .with_code("GRAPHQL_VALIDATION_FAILED");
        let error = SdkError::from(&field);
        assert_eq!(error.code, ErrorCode::ValidationError);

        let field = FieldError::new("exploded").with_path(vec![PathSegment::Field("a".into())]);
        let error = SdkError::from(&field);
        assert_eq!(error.code, ErrorCode::ExecutionError);
        assert_eq!(error.extensions.unwrap()["path"], json!(["a"]));
    }

    #[test]
    fn test_error_serialization() {
        let err = SdkError::stream_failed("boom");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"code": "STREAM_FAILED", "message": "boom"})
        );
        assert_eq!(err.to_string(), "[STREAM_FAILED] boom");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), StoreError> = Err(StoreError::MalformedSelector("x".into()));
        let error = result
            .map_sdk_err_with(ErrorCode::InternalError, "mirror write failed")
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::InternalError);
        assert_eq!(
            error.extensions.unwrap()["original_error"],
            json!("malformed selector: x")
        );
    }
}
