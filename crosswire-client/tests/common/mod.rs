//! Shared test support: an in-memory transport and interop-style test
//! messages.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crosswire_client::transport::{StreamConn, Transport};
use crosswire_client::{HttpRequest, HttpResponse, RpcError, StreamEvent};

type UnaryHandler =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, RpcError>> + Send + Sync>;
type StreamHandler = Arc<dyn Fn(HttpRequest) -> Result<StreamConn, RpcError> + Send + Sync>;

/// An in-memory transport backed by per-test handler closures.
#[derive(Default)]
pub struct MockTransport {
    unary: Option<UnaryHandler>,
    stream: Option<StreamHandler>,
}

impl MockTransport {
    /// Answer unary calls with a synchronous handler.
    pub fn unary<F>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Result<HttpResponse, RpcError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            unary: Some(Arc::new(move |request| {
                let handler = handler.clone();
                Box::pin(async move { handler(request) })
            })),
            stream: None,
        }
    }

    /// Answer unary calls with an async handler (for timeout tests).
    pub fn unary_async<F>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, RpcError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            unary: Some(Arc::new(handler)),
            stream: None,
        }
    }

    /// Answer stream opens with a handler.
    pub fn stream<F>(handler: F) -> Self
    where
        F: Fn(HttpRequest) -> Result<StreamConn, RpcError> + Send + Sync + 'static,
    {
        Self {
            unary: None,
            stream: Some(Arc::new(handler)),
        }
    }
}

impl Transport for MockTransport {
    fn perform_unary(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'static, Result<HttpResponse, RpcError>> {
        match &self.unary {
            Some(handler) => handler(request),
            None => Box::pin(async { Err(RpcError::unknown("no unary handler installed")) }),
        }
    }

    fn open_stream(&self, request: HttpRequest) -> Result<StreamConn, RpcError> {
        match &self.stream {
            Some(handler) => handler(request),
            None => Err(RpcError::unknown("no stream handler installed")),
        }
    }
}

/// Build a `StreamConn` whose inbound events come from a channel the test
/// controls. Returns the connection, the receiver for frames the client
/// sends, and the sender for events the "server" emits.
pub fn stream_conn() -> (
    StreamConn,
    mpsc::UnboundedReceiver<Bytes>,
    mpsc::UnboundedSender<StreamEvent<Bytes>>,
) {
    let (sink, sent) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let events = Box::pin(futures::stream::poll_fn(move |cx| event_rx.poll_recv(cx)));
    let conn = StreamConn {
        sink,
        events,
        cancel: Arc::new(|| {}),
    };
    (conn, sent, event_tx)
}

/// Build an envelope frame.
pub fn frame(flags: u8, payload: &[u8]) -> Bytes {
    let mut data = vec![flags];
    data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    data.extend_from_slice(payload);
    Bytes::from(data)
}

// Interop-style test messages.

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Payload {
    #[prost(bytes = "vec", tag = "1")]
    pub body: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleRequest {
    #[prost(int32, tag = "1")]
    pub response_size: i32,
    #[prost(message, optional, tag = "2")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct SimpleResponse {
    #[prost(message, optional, tag = "1")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingInputCallRequest {
    #[prost(message, optional, tag = "1")]
    pub payload: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingInputCallResponse {
    #[prost(int32, tag = "1")]
    pub aggregated_payload_size: i32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseParameters {
    #[prost(int32, tag = "1")]
    pub size: i32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingOutputCallRequest {
    #[prost(message, repeated, tag = "1")]
    pub response_parameters: Vec<ResponseParameters>,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingOutputCallResponse {
    #[prost(message, optional, tag = "1")]
    pub payload: Option<Payload>,
}

/// A payload of `size` zero bytes.
pub fn zeros(size: usize) -> Payload {
    Payload {
        body: vec![0; size],
    }
}
