//! Core protocol types for the crosswire RPC client.
//!
//! This crate provides the protocol-neutral plumbing shared by the
//! `crosswire-client` engine and by generated service stubs:
//!
//! - [`code`]: the status code enum shared by all three wire protocols
//! - [`error`]: the unified RPC error type with typed details
//! - [`metadata`]: ordered, case-insensitive request/response metadata
//! - [`envelope`]: length-prefixed frame packing and unpacking
//! - [`encoding`]: protobuf/JSON message encoding
//! - [`compression`]: the compression trait, gzip support, and the
//!   per-client compression registry

mod code;
mod compression;
mod encoding;
mod envelope;
mod error;
mod metadata;

pub use code::Code;
pub use compression::{
    BoxedCompression, Compression, CompressionRegistry, GzipCompression, IdentityCompression,
    RequestCompression,
};
pub use encoding::Encoding;
pub use envelope::{
    ENVELOPE_HEADER_LEN, EnvelopeError, envelope_flags, message_length, pack, unpack,
};
pub use error::{ErrorDetail, RpcError};
pub use metadata::Metadata;
