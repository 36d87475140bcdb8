//! Multi-protocol RPC client engine for Rust.
//!
//! This crate drives RPCs over three wire protocols interchangeably
//! (the Connect protocol, unary and streaming; gRPC; and gRPC-Web)
//! against a single service definition. HTTP itself is pluggable: the
//! engine consumes a [`Transport`] and exposes one API regardless of the
//! protocol selected.
//!
//! ## Unary calls
//!
//! ```ignore
//! use crosswire_client::{ProtocolClient, ProtocolClientConfig, Protocol};
//!
//! let config = ProtocolClientConfig::new("https://demo.connectrpc.com")
//!     .protocol(Protocol::Connect)
//!     .use_proto();
//! let client = ProtocolClient::new(config, transport);
//!
//! let response = client
//!     .unary::<SayRequest, SayResponse>("buf.connect.demo.eliza.v1.ElizaService/Say", &request)
//!     .await;
//! println!("{:?}", response.into_result()?);
//! ```
//!
//! ## Streaming
//!
//! ```ignore
//! use futures::StreamExt;
//!
//! let stream = client.stream::<ConverseRequest, ConverseResponse>(
//!     "buf.connect.demo.eliza.v1.ElizaService/Converse",
//! )?;
//! stream.send(&ConverseRequest { sentence: "hi".into() }).close_send();
//!
//! let mut results = stream.results();
//! while let Some(event) = results.next().await {
//!     // Headers, zero or more Messages, then exactly one Complete.
//! }
//! ```
//!
//! ## Interceptors
//!
//! User interceptors wrap every call symmetrically around the protocol
//! translator: requests and outbound frames see them in configured
//! order before protocol framing, responses and inbound events after
//! protocol unframing in reverse order.

mod client;
pub mod config;
mod descriptor;
mod interceptor;
pub mod protocol;
mod streaming;
pub mod transport;

pub use client::{ProtocolClient, ResponseMessage};
pub use config::{CallOptions, ProtocolClientConfig};
pub use descriptor::{HttpRequest, HttpResponse, Idempotency, StreamEvent};
pub use interceptor::{
    HeaderInterceptor, Interceptor, InterceptorChain, InterceptorFactory, UnaryFunc,
};
pub use protocol::Protocol;
pub use streaming::{BidirectionalStream, EventStream};
pub use transport::{CancelFn, StreamConn, Transport};

// Re-export the core types callers need at the API boundary.
pub use crosswire_core::{
    BoxedCompression, Code, Compression, CompressionRegistry, Encoding, ErrorDetail,
    GzipCompression, Metadata, RequestCompression, RpcError,
};
