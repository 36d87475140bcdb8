//! Message compression: the codec trait, gzip support, and per-client
//! compression configuration.

use std::io;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

/// Compression codec for per-message (envelope) payloads.
///
/// Streaming RPCs compress each message individually; unary Connect
/// requests compress the whole body. The wire name appears in
/// `Content-Encoding`, `Connect-Content-Encoding`, or `Grpc-Encoding`
/// depending on the protocol.
pub trait Compression: Send + Sync + 'static {
    /// The encoding name for HTTP headers (e.g. "gzip").
    fn name(&self) -> &'static str;

    /// Compress data.
    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    /// Decompress data.
    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// A boxed compression pool for type-erased storage.
#[derive(Clone)]
pub struct BoxedCompression(Arc<dyn Compression>);

impl BoxedCompression {
    /// Create a new boxed pool.
    pub fn new<C: Compression>(pool: C) -> Self {
        BoxedCompression(Arc::new(pool))
    }

    /// The encoding name for HTTP headers.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Compress data.
    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    /// Decompress data.
    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.decompress(data)
    }
}

impl std::fmt::Debug for BoxedCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCompression").field(&self.name()).finish()
    }
}

/// Gzip compression using flate2.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompression {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

impl Default for GzipCompression {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl GzipCompression {
    /// Create a gzip pool with the specified compression level.
    ///
    /// Level ranges from 0 (no compression) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Compression for GzipCompression {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        Ok(Bytes::from(decompressed))
    }
}

/// Identity pool (no compression). Passes data through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCompression;

impl Compression for IdentityCompression {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// Request-side compression policy: a pool plus a minimum size threshold.
///
/// Messages smaller than `min_bytes` are sent uncompressed regardless of
/// the configured pool.
#[derive(Clone, Debug)]
pub struct RequestCompression {
    /// Minimum payload size before compression is applied.
    pub min_bytes: usize,
    /// The pool used to compress outgoing payloads.
    pub pool: BoxedCompression,
}

impl RequestCompression {
    /// Create a policy that compresses every message with the given pool.
    pub fn new(pool: BoxedCompression) -> Self {
        Self { min_bytes: 0, pool }
    }

    /// Set the minimum payload size threshold.
    pub fn with_min_bytes(mut self, min_bytes: usize) -> Self {
        self.min_bytes = min_bytes;
        self
    }

    /// Whether a payload of the given size should be compressed.
    pub fn should_compress(&self, len: usize) -> bool {
        len >= self.min_bytes
    }
}

/// An ordered registry of compression pools a client accepts in responses.
#[derive(Clone, Debug, Default)]
pub struct CompressionRegistry {
    pools: Vec<BoxedCompression>,
}

impl CompressionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool. Order determines preference in the accept header.
    pub fn register(&mut self, pool: BoxedCompression) {
        self.pools.push(pool);
    }

    /// Resolve a wire name to a registered pool.
    ///
    /// `identity`, the empty string, and an absent header all resolve to
    /// `None` (no decompression needed).
    pub fn get(&self, name: Option<&str>) -> Option<BoxedCompression> {
        let name = name?;
        if name.is_empty() || name == "identity" {
            return None;
        }
        self.pools.iter().find(|pool| pool.name() == name).cloned()
    }

    /// Whether a wire name is acceptable: identity, absent, or registered.
    pub fn supports(&self, name: Option<&str>) -> bool {
        match name {
            None | Some("") | Some("identity") => true,
            Some(name) => self.pools.iter().any(|pool| pool.name() == name),
        }
    }

    /// Render the accept header value, e.g. `gzip, identity`.
    ///
    /// Returns `None` when no pools are registered.
    pub fn accept_header(&self) -> Option<String> {
        if self.pools.is_empty() {
            return None;
        }
        let names: Vec<_> = self.pools.iter().map(BoxedCompression::name).collect();
        Some(format!("{}, identity", names.join(", ")))
    }

    /// Whether no pools are registered.
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
