//! Client configuration and per-call options.

use std::sync::Arc;
use std::time::Duration;

use crosswire_core::{
    BoxedCompression, CompressionRegistry, Encoding, Metadata, RequestCompression,
};

use crate::interceptor::InterceptorFactory;
use crate::protocol::Protocol;

/// Configuration for a [`ProtocolClient`](crate::ProtocolClient).
///
/// Immutable after the client is constructed. Built fluently:
///
/// ```ignore
/// use crosswire_client::{ProtocolClientConfig, Protocol};
/// use crosswire_core::{BoxedCompression, GzipCompression, RequestCompression};
///
/// let config = ProtocolClientConfig::new("https://api.example.com")
///     .protocol(Protocol::Grpc)
///     .use_proto()
///     .accept_compression(BoxedCompression::new(GzipCompression::default()))
///     .timeout(std::time::Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct ProtocolClientConfig {
    pub(crate) host: String,
    pub(crate) protocol: Protocol,
    pub(crate) encoding: Encoding,
    pub(crate) request_compression: Option<RequestCompression>,
    pub(crate) accept_compressions: CompressionRegistry,
    pub(crate) interceptors: Vec<Arc<dyn InterceptorFactory>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) enable_get: bool,
}

impl ProtocolClientConfig {
    /// Create a configuration targeting the given host, speaking the
    /// Connect protocol with protobuf encoding by default.
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self {
            host: host.into(),
            protocol: Protocol::Connect,
            encoding: Encoding::Proto,
            request_compression: None,
            accept_compressions: CompressionRegistry::new(),
            interceptors: Vec::new(),
            timeout: None,
            enable_get: false,
        }
    }

    /// Select the wire protocol.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Select the message encoding.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Use protobuf message encoding.
    pub fn use_proto(self) -> Self {
        self.encoding(Encoding::Proto)
    }

    /// Use JSON message encoding.
    pub fn use_json(self) -> Self {
        self.encoding(Encoding::Json)
    }

    /// Compress outgoing messages with the given policy.
    pub fn request_compression(mut self, compression: RequestCompression) -> Self {
        self.request_compression = Some(compression);
        self
    }

    /// Accept the given pool for response decompression. Registration
    /// order determines preference in the accept-encoding headers.
    pub fn accept_compression(mut self, pool: BoxedCompression) -> Self {
        self.accept_compressions.register(pool);
        self
    }

    /// Add an interceptor factory. Factories run once per RPC; configured
    /// order is outermost-first.
    pub fn interceptor(mut self, factory: Arc<dyn InterceptorFactory>) -> Self {
        self.interceptors.push(factory);
        self
    }

    /// Set the default timeout for all calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Allow unary Connect RPCs marked side-effect free to be sent as
    /// cacheable GET requests.
    pub fn enable_get(mut self, enabled: bool) -> Self {
        self.enable_get = enabled;
        self
    }

    pub(crate) fn protocol_settings(&self) -> ProtocolSettings {
        ProtocolSettings {
            encoding: self.encoding,
            request_compression: self.request_compression.clone(),
            accept: self.accept_compressions.clone(),
            enable_get: self.enable_get,
        }
    }
}

impl std::fmt::Debug for ProtocolClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClientConfig")
            .field("host", &self.host)
            .field("protocol", &self.protocol)
            .field("encoding", &self.encoding)
            .field("timeout", &self.timeout)
            .field("enable_get", &self.enable_get)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// The slice of client configuration the protocol interceptors consume.
#[derive(Clone, Debug)]
pub(crate) struct ProtocolSettings {
    pub(crate) encoding: Encoding,
    pub(crate) request_compression: Option<RequestCompression>,
    pub(crate) accept: CompressionRegistry,
    pub(crate) enable_get: bool,
}

/// Per-call options: extra headers and a timeout override.
///
/// ```ignore
/// use crosswire_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("x-request-id", "abc-123");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) headers: Metadata,
    pub(crate) timeout: Option<Duration>,
}

impl CallOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the client's default timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add a header for this call.
    ///
    /// Headers beginning with `connect-` or `grpc-` are reserved by the
    /// protocols and are dropped when the request is built.
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Add a binary header (`-bin` suffix), encoding the bytes as
    /// unpadded base64.
    pub fn binary_header(mut self, name: impl AsRef<str>, value: &[u8]) -> Self {
        self.headers.append_binary(name, value);
        self
    }

    /// Collect the non-reserved headers into a request header map.
    pub(crate) fn apply_headers(&self, headers: &mut Metadata) {
        for (name, values) in self.headers.iter() {
            if is_reserved_header(name) {
                continue;
            }
            for value in values {
                headers.append(name, value.clone());
            }
        }
    }
}

/// Whether a header name is reserved by the protocols.
///
/// Per connect-go: headers beginning with `Connect-` and `Grpc-` are
/// reserved, along with the content negotiation headers the client owns.
pub(crate) fn is_reserved_header(name: &str) -> bool {
    name.starts_with("connect-")
        || name.starts_with("grpc-")
        || name == "content-type"
        || name == "content-encoding"
        || name == "accept-encoding"
        || name == "content-length"
        || name == "te"
}

/// Maximum Connect timeout value in milliseconds (10 digits).
/// Larger values are treated as "no timeout" per the Connect protocol.
const MAX_TIMEOUT_MS: u128 = 9_999_999_999;

/// Render a duration as the `Connect-Timeout-Ms` header value.
///
/// Returns `None` for zero or oversized durations.
pub(crate) fn connect_timeout_value(timeout: Duration) -> Option<String> {
    let millis = timeout.as_millis();
    if millis == 0 || millis > MAX_TIMEOUT_MS {
        return None;
    }
    Some(millis.to_string())
}
