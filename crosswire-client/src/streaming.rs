//! The bidirectional streaming state machine.
//!
//! A [`BidirectionalStream`] owns the duplex connection for one streaming
//! RPC: a send queue flowing into the transport sink and an event source
//! flowing out of it. Sending is fluent and infallible at the call site;
//! failures are reported out-of-band on the result channel. Receiving is
//! single-shot: [`results`](BidirectionalStream::results) yields the lazy
//! event sequence once, or [`on_event`](BidirectionalStream::on_event)
//! drives it with a callback.
//!
//! Per stream, `Headers` (if any) precedes every `Message`, exactly one
//! `Complete` terminates the sequence, and nothing follows it.

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::stream::BoxStream;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crosswire_core::{Code, Encoding, Metadata, RpcError};

use crate::descriptor::StreamEvent;
use crate::interceptor::InterceptorChain;
use crate::transport::{CancelFn, StreamConn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Open,
    HalfClosed,
    Canceled,
}

/// The guarded per-stream cell. This is the only shared mutable state a
/// stream owns; there is no cross-stream shared state in the engine.
struct Shared {
    send_state: SendState,
    terminated: bool,
    response_headers: Option<Metadata>,
}

struct StreamCore {
    chain: InterceptorChain,
    encoding: Encoding,
    shared: Mutex<Shared>,
    sink: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    local_events: mpsc::UnboundedSender<StreamEvent<Bytes>>,
    cancel: CancelFn,
}

/// A bidirectional streaming RPC handle.
///
/// ```ignore
/// let stream = client.stream::<EchoRequest, EchoResponse>("echo.v1.Echo/Chat")?;
/// stream
///     .send(&EchoRequest { text: "hello".into() })
///     .send(&EchoRequest { text: "world".into() })
///     .close_send();
///
/// let mut results = stream.results();
/// while let Some(event) = results.next().await {
///     match event {
///         StreamEvent::Headers(meta) => println!("headers: {meta:?}"),
///         StreamEvent::Message(msg) => println!("got: {msg:?}"),
///         StreamEvent::Complete { code, .. } => println!("done: {code}"),
///     }
/// }
/// ```
pub struct BidirectionalStream<Req, Res> {
    core: Arc<StreamCore>,
    events: Mutex<Option<EventStream<Res>>>,
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> BidirectionalStream<Req, Res>
where
    Req: Message + Serialize,
    Res: Message + DeserializeOwned + Default,
{
    pub(crate) fn new(conn: StreamConn, chain: InterceptorChain, encoding: Encoding) -> Self {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let core = Arc::new(StreamCore {
            chain,
            encoding,
            shared: Mutex::new(Shared {
                send_state: SendState::Open,
                terminated: false,
                response_headers: None,
            }),
            sink: Mutex::new(Some(conn.sink)),
            local_events: local_tx,
            cancel: conn.cancel,
        });
        let events = EventStream {
            transport: conn.events,
            local: local_rx,
            core: core.clone(),
            headers_seen: false,
            finished: false,
            _marker: PhantomData,
        };
        Self {
            core,
            events: Mutex::new(Some(events)),
            _marker: PhantomData,
        }
    }

    /// Queue a message for sending. Fluent: returns `self` for chaining.
    ///
    /// Sending never panics; encoding failures, interceptor rejections,
    /// and sends after [`close_send`](Self::close_send) or
    /// [`cancel`](Self::cancel) are reported on the result channel.
    pub fn send(&self, message: &Req) -> &Self {
        if let Err(error) = self.try_send(message) {
            let _ = self.core.local_events.send(StreamEvent::complete_err(error));
        }
        self
    }

    fn try_send(&self, message: &Req) -> Result<(), RpcError> {
        {
            let shared = self.core.shared.lock().unwrap();
            match shared.send_state {
                SendState::Open => {}
                SendState::HalfClosed => {
                    return Err(RpcError::unknown("cannot send on a closed stream"));
                }
                SendState::Canceled => {
                    return Err(RpcError::canceled("cannot send on a canceled stream"));
                }
            }
        }

        let bytes = self.core.encoding.encode(message)?;
        let frame = self.core.chain.stream_input(bytes)?;

        let sink = self.core.sink.lock().unwrap();
        let Some(sender) = sink.as_ref() else {
            return Err(RpcError::unknown("cannot send on a closed stream"));
        };
        sender
            .send(frame)
            .map_err(|_| RpcError::unknown("transport closed the send side"))
    }

    /// Half-close the send side. Queued frames are still delivered; the
    /// transport sees the request body end.
    pub fn close_send(&self) {
        {
            let mut shared = self.core.shared.lock().unwrap();
            if shared.send_state == SendState::Open {
                shared.send_state = SendState::HalfClosed;
            }
        }
        self.core.sink.lock().unwrap().take();
    }

    /// Cancel the stream. Idempotent and thread-safe.
    ///
    /// Aborts the transport request, drops pending sends, and delivers a
    /// synthetic `Complete` with [`Code::Canceled`] unless the stream has
    /// already terminated (in which case this is a no-op).
    pub fn cancel(&self) {
        let already_terminated = {
            let mut shared = self.core.shared.lock().unwrap();
            if shared.send_state == SendState::Canceled {
                return;
            }
            shared.send_state = SendState::Canceled;
            shared.terminated
        };
        self.core.sink.lock().unwrap().take();
        (self.core.cancel)();
        if !already_terminated {
            let _ = self.core.local_events.send(StreamEvent::Complete {
                code: Code::Canceled,
                error: Some(RpcError::canceled("stream canceled")),
                trailers: None,
            });
        }
    }

    /// The response headers, once the first `Headers` event has been
    /// consumed from the result channel.
    pub fn response_headers(&self) -> Option<Metadata> {
        self.core.shared.lock().unwrap().response_headers.clone()
    }

    /// Take the result channel: a lazy, single-shot sequence of stream
    /// events. A second call returns a sequence that ends immediately.
    pub fn results(&self) -> EventStream<Res> {
        self.events
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| EventStream::drained(self.core.clone()))
    }

    /// Consume the result channel with a callback, one invocation per
    /// event. Spawns a driver task; the callback runs until `Complete`.
    pub fn on_event<F>(&self, mut handler: F)
    where
        F: FnMut(StreamEvent<Res>) + Send + 'static,
        Res: Send + 'static,
    {
        use futures::StreamExt;
        let mut events = self.results();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                handler(event);
            }
        });
    }
}

impl<Req, Res> std::fmt::Debug for BidirectionalStream<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.core.shared.lock().unwrap();
        f.debug_struct("BidirectionalStream")
            .field("send_state", &shared.send_state)
            .field("terminated", &shared.terminated)
            .finish_non_exhaustive()
    }
}

/// The lazy event sequence of one stream.
///
/// Enforces the stream contract while decoding message payloads: at most
/// one `Headers` first, exactly one terminal `Complete`, nothing after.
/// Events synthesized locally (cancellation, send failures) merge with
/// transport events; transport events pass through the interceptor chain
/// first.
pub struct EventStream<Res> {
    transport: BoxStream<'static, StreamEvent<Bytes>>,
    local: mpsc::UnboundedReceiver<StreamEvent<Bytes>>,
    core: Arc<StreamCore>,
    headers_seen: bool,
    finished: bool,
    _marker: PhantomData<fn() -> Res>,
}

impl<Res> EventStream<Res> {
    /// An already-consumed channel: ends immediately.
    fn drained(core: Arc<StreamCore>) -> Self {
        let (_tx, local) = mpsc::unbounded_channel();
        Self {
            transport: Box::pin(futures::stream::empty()),
            local,
            core,
            headers_seen: true,
            finished: true,
            _marker: PhantomData,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.core.shared.lock().unwrap().terminated = true;
    }
}

impl<Res> EventStream<Res>
where
    Res: Message + DeserializeOwned + Default,
{
    /// Apply the ordering contract to one post-chain event. `None` means
    /// the event is dropped (duplicate headers, anything post-terminal).
    fn process(&mut self, event: StreamEvent<Bytes>) -> Option<StreamEvent<Res>> {
        match event {
            StreamEvent::Headers(meta) => {
                if self.headers_seen {
                    return None;
                }
                self.headers_seen = true;
                self.core.shared.lock().unwrap().response_headers = Some(meta.clone());
                Some(StreamEvent::Headers(meta))
            }
            StreamEvent::Message(bytes) => match self.core.encoding.decode::<Res>(&bytes) {
                Ok(message) => Some(StreamEvent::Message(message)),
                Err(error) => {
                    self.finish();
                    Some(StreamEvent::complete_err(error))
                }
            },
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => {
                self.finish();
                Some(StreamEvent::Complete {
                    code,
                    error,
                    trailers,
                })
            }
        }
    }
}

impl<Res> Stream for EventStream<Res>
where
    Res: Message + DeserializeOwned + Default,
{
    type Item = StreamEvent<Res>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            // Locally synthesized events take priority and skip the chain.
            match this.local.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(event) = this.process(event) {
                        return Poll::Ready(Some(event));
                    }
                    continue;
                }
                Poll::Ready(None) | Poll::Pending => {}
            }

            match Pin::new(&mut this.transport).poll_next(cx) {
                Poll::Ready(Some(raw)) => {
                    let event = this.core.chain.stream_output(raw);
                    if let Some(event) = this.process(event) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(None) => {
                    // The transport must emit Complete before closing; a
                    // bare close is a transport failure.
                    this.finish();
                    return Poll::Ready(Some(StreamEvent::complete_err(RpcError::unknown(
                        "transport closed without completing the stream",
                    ))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
