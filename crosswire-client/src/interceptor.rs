//! Interceptors and the per-RPC interceptor chain.
//!
//! Interceptors add cross-cutting logic to RPC calls: authentication
//! headers, logging, metrics, request/response transformation. The
//! protocol translators (Connect, gRPC, gRPC-Web) are themselves
//! interceptors, always installed innermost in the chain.
//!
//! # Ordering
//!
//! Outgoing transforms (unary requests, stream starts, outbound frames)
//! run through user interceptors in configured order and reach the
//! protocol interceptor last, so users observe requests before protocol
//! framing. Incoming transforms run the protocol interceptor first
//! (unframing) and then user interceptors in reverse order, so each user
//! interceptor brackets the protocol layer symmetrically.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crosswire_core::{Metadata, RpcError};

use crate::descriptor::{HttpRequest, HttpResponse, StreamEvent};

/// The continuation of a unary call: the next interceptor, or the
/// transport itself at the innermost position.
pub type UnaryFunc =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, RpcError>> + Send + Sync>;

/// A per-RPC interceptor.
///
/// Implementations may hook the unary path, the stream path, or both;
/// every hook defaults to a passthrough.
pub trait Interceptor: Send + Sync {
    /// Wrap a unary call. The returned function receives the request,
    /// may transform it, invokes `next`, and may transform the response.
    /// Async work happens naturally inside the returned future.
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        next
    }

    /// Transform the request that opens a stream.
    fn on_stream_start(&self, request: HttpRequest) -> Result<HttpRequest, RpcError> {
        Ok(request)
    }

    /// Transform one outbound frame.
    fn on_stream_input(&self, frame: Bytes) -> Result<Bytes, RpcError> {
        Ok(frame)
    }

    /// Transform one inbound event.
    fn on_stream_output(&self, event: StreamEvent<Bytes>) -> StreamEvent<Bytes> {
        event
    }
}

/// Constructs a fresh interceptor instance for each RPC.
///
/// Per-call construction gives interceptors private per-call state; the
/// gRPC-Web translator, for example, captures response headers to resolve
/// the compression pool for later frames.
pub trait InterceptorFactory: Send + Sync {
    /// Create the interceptor for one RPC.
    fn create(&self) -> Arc<dyn Interceptor>;
}

impl<F> InterceptorFactory for F
where
    F: Fn() -> Arc<dyn Interceptor> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Interceptor> {
        self()
    }
}

/// The composed interceptor chain for one RPC.
///
/// Holds user interceptors in configured order followed by the protocol
/// interceptor.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Build the chain for one call: user factories in configured order,
    /// then the protocol interceptor innermost.
    pub fn new(
        factories: &[Arc<dyn InterceptorFactory>],
        protocol: Arc<dyn Interceptor>,
    ) -> Self {
        let mut interceptors: Vec<_> = factories.iter().map(|f| f.create()).collect();
        interceptors.push(protocol);
        Self { interceptors }
    }

    /// Compose the unary continuation. Wrapping happens in reverse so the
    /// first configured interceptor sees the request first.
    pub fn unary(&self, next: UnaryFunc) -> UnaryFunc {
        let mut wrapped = next;
        for interceptor in self.interceptors.iter().rev() {
            wrapped = interceptor.wrap_unary(wrapped);
        }
        wrapped
    }

    /// Run the stream-start transforms: user order, protocol last.
    pub fn stream_start(&self, mut request: HttpRequest) -> Result<HttpRequest, RpcError> {
        for interceptor in &self.interceptors {
            request = interceptor.on_stream_start(request)?;
        }
        Ok(request)
    }

    /// Run the outbound frame transforms: user order, protocol last.
    pub fn stream_input(&self, mut frame: Bytes) -> Result<Bytes, RpcError> {
        for interceptor in &self.interceptors {
            frame = interceptor.on_stream_input(frame)?;
        }
        Ok(frame)
    }

    /// Run the inbound event transforms: protocol first, users reversed.
    pub fn stream_output(&self, mut event: StreamEvent<Bytes>) -> StreamEvent<Bytes> {
        for interceptor in self.interceptors.iter().rev() {
            event = interceptor.on_stream_output(event);
        }
        event
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

/// An interceptor that adds a header to every request and stream start.
///
/// # Example
///
/// ```ignore
/// use crosswire_client::HeaderInterceptor;
///
/// let config = ProtocolClientConfig::new("https://api.example.com")
///     .interceptor(HeaderInterceptor::factory("authorization", "Bearer token123"));
/// ```
#[derive(Clone)]
pub struct HeaderInterceptor {
    name: String,
    value: String,
}

impl HeaderInterceptor {
    /// Create a new header interceptor.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Create a factory producing this interceptor for every call.
    pub fn factory(
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Arc<dyn InterceptorFactory> {
        let interceptor: Arc<dyn Interceptor> = Arc::new(Self::new(name, value));
        Arc::new(move || interceptor.clone())
    }

    fn apply(&self, headers: &mut Metadata) {
        headers.insert(&self.name, self.value.clone());
    }
}

impl Interceptor for HeaderInterceptor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let this = self.clone();
        Arc::new(move |mut request: HttpRequest| {
            this.apply(&mut request.headers);
            next(request)
        })
    }

    fn on_stream_start(&self, mut request: HttpRequest) -> Result<HttpRequest, RpcError> {
        self.apply(&mut request.headers);
        Ok(request)
    }
}
