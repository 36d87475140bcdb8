//! Per-protocol request/response translators.
//!
//! Each wire protocol is an [`Interceptor`](crate::Interceptor) installed
//! innermost in the chain. All three present the same RPC abstraction but
//! encode it differently:
//!
//! - Connect unary puts status into the HTTP code and a JSON error body;
//!   Connect streaming ends with a JSON end-of-stream envelope.
//! - gRPC carries status exclusively in HTTP trailers after the frame
//!   sequence.
//! - gRPC-Web synthesizes trailers into a final enveloped frame because
//!   the transport exposes no HTTP trailers.

use std::sync::Arc;

use crate::config::ProtocolSettings;
use crate::interceptor::Interceptor;

mod connect;
mod grpc;
mod grpc_web;
pub mod pb;

pub use connect::ConnectInterceptor;
pub use grpc::GrpcInterceptor;
pub use grpc_web::GrpcWebInterceptor;

/// The wire protocol a client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// The Connect protocol (unary and streaming over plain HTTP).
    #[default]
    Connect,
    /// gRPC over HTTP/2 with real trailers.
    Grpc,
    /// gRPC-Web with trailers synthesized into the body.
    GrpcWeb,
}

impl Protocol {
    /// Protocol name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Connect => "connect",
            Protocol::Grpc => "grpc",
            Protocol::GrpcWeb => "grpc-web",
        }
    }

    /// Create the protocol interceptor for one RPC.
    pub(crate) fn interceptor(&self, settings: Arc<ProtocolSettings>) -> Arc<dyn Interceptor> {
        match self {
            Protocol::Connect => Arc::new(ConnectInterceptor::new(settings)),
            Protocol::Grpc => Arc::new(GrpcInterceptor::new(settings)),
            Protocol::GrpcWeb => Arc::new(GrpcWebInterceptor::new(settings)),
        }
    }
}

// Header names shared across the protocol translators.
pub(crate) mod headers {
    pub const CONTENT_TYPE: &str = "content-type";
    pub const CONTENT_ENCODING: &str = "content-encoding";
    pub const ACCEPT_ENCODING: &str = "accept-encoding";
    pub const TE: &str = "te";

    pub const CONNECT_PROTOCOL_VERSION: &str = "connect-protocol-version";
    pub const CONNECT_TIMEOUT_MS: &str = "connect-timeout-ms";
    pub const CONNECT_CONTENT_ENCODING: &str = "connect-content-encoding";
    pub const CONNECT_ACCEPT_ENCODING: &str = "connect-accept-encoding";
    /// Marks a unary request transformed into a cacheable GET.
    pub const GET_REQUEST_MARKER: &str = "get-request";

    pub const GRPC_TIMEOUT: &str = "grpc-timeout";
    pub const GRPC_ENCODING: &str = "grpc-encoding";
    pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
    pub const GRPC_STATUS: &str = "grpc-status";
    pub const GRPC_MESSAGE: &str = "grpc-message";
    pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";
}
