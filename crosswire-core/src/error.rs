//! The unified RPC error type and self-describing error details.

use std::sync::Arc;

use crate::code::Code;
use crate::metadata::Metadata;

/// A self-describing error detail.
///
/// Details carry a fully-qualified type name and protobuf-encoded bytes,
/// mapping to `google.protobuf.Any` on the wire. Decoding to a concrete
/// message is deferred to the caller via [`ErrorDetail::decode`]; this
/// crate never fixes a detail type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorDetail {
    type_url: String,
    value: Vec<u8>,
}

impl ErrorDetail {
    /// Create a new error detail from a type URL and protobuf-encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
        }
    }

    /// The fully-qualified type name, without the `type.googleapis.com/`
    /// prefix some servers send.
    pub fn type_name(&self) -> &str {
        self.type_url
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_url)
    }

    /// The raw type URL as received.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// The protobuf-encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Whether this detail carries a message of the given type name.
    pub fn is_type(&self, type_name: &str) -> bool {
        self.type_name() == type_name
    }

    /// Decode the detail into a concrete protobuf message.
    pub fn decode<M: prost::Message + Default>(&self) -> Result<M, prost::DecodeError> {
        M::decode(self.value.as_slice())
    }
}

/// The unified RPC error.
///
/// Carries the status [`Code`], a human-readable message, optional typed
/// [`ErrorDetail`]s, optional metadata (trailers attached to the error),
/// and an optional underlying cause.
#[derive(Clone, Debug)]
pub struct RpcError {
    code: Code,
    message: String,
    details: Vec<ErrorDetail>,
    metadata: Option<Metadata>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RpcError {
    /// Create a new error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
            metadata: None,
            source: None,
        }
    }

    /// Create a new error with just a code.
    pub fn from_code(code: Code) -> Self {
        Self::new(code, "")
    }

    /// Create a `Canceled` error.
    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    /// Create a `DeadlineExceeded` error.
    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    /// Create an `InvalidArgument` error.
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Create an `Unimplemented` error.
    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    /// Create an `Internal` error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Create an `Unknown` error.
    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// The status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The error message. Empty when the server sent none.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The typed error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Metadata attached to the error, if any.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Attach an error detail.
    pub fn add_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Attach an underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Decode every detail of the given type.
    pub fn details_of_type<M: prost::Message + Default>(&self, type_name: &str) -> Vec<M> {
        self.details
            .iter()
            .filter(|detail| detail.is_type(type_name))
            .filter_map(|detail| detail.decode().ok())
            .collect()
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_accessors() {
        let err = RpcError::new(Code::NotFound, "resource missing");
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.message(), "resource missing");
        assert!(err.details().is_empty());
        assert!(err.metadata().is_none());
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::new(Code::Internal, "boom");
        assert_eq!(err.to_string(), "internal: boom");

        let err = RpcError::from_code(Code::Canceled);
        assert_eq!(err.to_string(), "canceled");
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let err = RpcError::unknown("frame decode failed").with_source(io);
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "short read");
    }

    #[test]
    fn test_detail_type_name_strips_prefix() {
        let detail = ErrorDetail::new("type.googleapis.com/google.rpc.RetryInfo", vec![]);
        assert_eq!(detail.type_name(), "google.rpc.RetryInfo");
        assert!(detail.is_type("google.rpc.RetryInfo"));

        let detail = ErrorDetail::new("google.rpc.ErrorInfo", vec![1, 2]);
        assert_eq!(detail.type_name(), "google.rpc.ErrorInfo");
    }

    #[test]
    fn test_error_with_metadata() {
        let mut meta = Metadata::new();
        meta.insert("x-reason", "quota");
        let err = RpcError::new(Code::ResourceExhausted, "slow down").with_metadata(meta);
        assert_eq!(err.metadata().unwrap().get("x-reason"), Some("quota"));
    }
}
