//! Request and response descriptors exchanged between the interceptor
//! chain and the transport.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Uri};

use crosswire_core::{Code, Metadata, RpcError};

/// Idempotency level of an RPC, used to decide whether a unary Connect
/// call may be transformed into a cacheable GET request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Idempotency {
    /// No idempotency guarantee.
    #[default]
    Unknown,
    /// The RPC has no side effects and is safe to send as a GET.
    NoSideEffects,
    /// The RPC is idempotent but may have side effects.
    Idempotent,
}

/// An outgoing HTTP request descriptor.
///
/// Built by the client facade, transformed by the interceptor chain, and
/// handed to the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Fully resolved request URI (`host` + `/package.Service/Method`).
    pub uri: Uri,
    /// HTTP method; protocols may rewrite POST into GET.
    pub method: Method,
    /// Request headers.
    pub headers: Metadata,
    /// Request body. `None` after a GET transform or for streams, where
    /// frames flow through the transport sink instead.
    pub body: Option<Bytes>,
    /// Request trailers, for transports that can send them.
    pub trailers: Option<Metadata>,
    /// Idempotency of the RPC being carried.
    pub idempotency: Idempotency,
    /// Effective timeout for the call, if any.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a POST request descriptor with empty headers.
    pub fn post(uri: Uri) -> Self {
        Self {
            uri,
            method: Method::POST,
            headers: Metadata::new(),
            body: None,
            trailers: None,
            idempotency: Idempotency::Unknown,
            timeout: None,
        }
    }
}

/// An incoming HTTP response descriptor.
///
/// Produced by the transport and normalized by the protocol interceptor:
/// after the chain runs, `error` reflects the RPC status regardless of how
/// the protocol encoded it, and `body` holds the bare message bytes.
#[derive(Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Metadata,
    /// Response body, if any.
    pub body: Option<Bytes>,
    /// Response trailers. Empty when the transport exposes none.
    pub trailers: Metadata,
    /// The normalized RPC error, if the call failed.
    pub error: Option<RpcError>,
    /// Opaque transport tracing data (timings, negotiated protocol),
    /// passed through the chain untouched.
    pub tracing: Option<std::sync::Arc<dyn std::any::Any + Send + Sync>>,
}

impl HttpResponse {
    /// Create a successful response descriptor.
    pub fn ok(headers: Metadata, body: Option<Bytes>) -> Self {
        Self {
            status: 200,
            headers,
            body,
            trailers: Metadata::new(),
            error: None,
            tracing: None,
        }
    }

    /// The normalized status code: `Ok` unless an error is present.
    pub fn code(&self) -> Code {
        self.error.as_ref().map(RpcError::code).unwrap_or(Code::Ok)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("trailers", &self.trailers)
            .field("error", &self.error)
            .field("tracing", &self.tracing.is_some())
            .finish()
    }
}

/// One event on a streaming RPC.
///
/// A valid stream yields `Headers` at most once (first), zero or more
/// `Message` events, and exactly one terminal `Complete`; nothing follows
/// `Complete`.
#[derive(Debug, Clone)]
pub enum StreamEvent<T> {
    /// Response headers arrived.
    Headers(Metadata),
    /// A message arrived.
    Message(T),
    /// The stream terminated.
    Complete {
        /// Final status code.
        code: Code,
        /// The error, when `code` is not `Ok`.
        error: Option<RpcError>,
        /// Trailers attached to the termination, if any.
        trailers: Option<Metadata>,
    },
}

impl<T> StreamEvent<T> {
    /// A successful completion without trailers.
    pub fn complete_ok(trailers: Option<Metadata>) -> Self {
        StreamEvent::Complete {
            code: Code::Ok,
            error: None,
            trailers,
        }
    }

    /// A failed completion carrying the error's code.
    pub fn complete_err(error: RpcError) -> Self {
        StreamEvent::Complete {
            code: error.code(),
            error: Some(error),
            trailers: None,
        }
    }

    /// Whether this is the terminal event.
    pub fn is_complete(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. })
    }

    /// Map the message payload type, leaving other events untouched.
    pub fn map_message<U>(self, f: impl FnOnce(T) -> U) -> StreamEvent<U> {
        match self {
            StreamEvent::Headers(meta) => StreamEvent::Headers(meta),
            StreamEvent::Message(message) => StreamEvent::Message(f(message)),
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => StreamEvent::Complete {
                code,
                error,
                trailers,
            },
        }
    }
}
