//! The HTTP transport seam.
//!
//! The engine does not implement HTTP. It drives a [`Transport`], which
//! accepts a request descriptor and yields either a single response or a
//! duplex pair of byte sink and event source. Implementations wrap an
//! HTTP client (hyper, reqwest, a browser fetch shim, or an in-memory
//! fake for tests).

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crosswire_core::RpcError;

use crate::descriptor::{HttpRequest, HttpResponse, StreamEvent};

/// Thread-safe, idempotent cancellation hook for an open stream.
pub type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// A duplex connection for a streaming RPC.
pub struct StreamConn {
    /// Outbound frames. Each `Bytes` is one fully framed envelope; the
    /// transport writes them to the request body in order. Dropping the
    /// sender half-closes the request.
    pub sink: mpsc::UnboundedSender<Bytes>,
    /// Inbound events. The transport must emit `Headers` once when
    /// response headers arrive, `Message(bytes)` per inbound frame or
    /// body chunk, and a final `Complete` carrying the transport-level
    /// status and any HTTP trailers.
    pub events: BoxStream<'static, StreamEvent<Bytes>>,
    /// Aborts the underlying request.
    pub cancel: CancelFn,
}

impl std::fmt::Debug for StreamConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConn").finish_non_exhaustive()
    }
}

/// A pluggable HTTP transport.
///
/// Timeouts configured on the request descriptor are enforced here; on
/// expiry the transport surfaces an error the protocol layer maps to
/// `DeadlineExceeded`.
pub trait Transport: Send + Sync {
    /// Perform a unary HTTP exchange.
    fn perform_unary(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, RpcError>>;

    /// Open a streaming HTTP exchange.
    fn open_stream(&self, request: HttpRequest) -> Result<StreamConn, RpcError>;
}
