//! The protocol client facade.

use std::sync::Arc;

use http::Uri;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{Instrument, info_span};

use crosswire_core::{Code, Encoding, Metadata, RpcError};

use crate::config::{CallOptions, ProtocolClientConfig, ProtocolSettings};
use crate::descriptor::{HttpRequest, HttpResponse, Idempotency};
use crate::interceptor::{InterceptorChain, UnaryFunc};
use crate::streaming::BidirectionalStream;
use crate::transport::Transport;

/// A client for one host speaking one of the three wire protocols.
///
/// The client drives each call through a fresh interceptor chain (user
/// interceptors in configured order, the protocol translator innermost)
/// and the pluggable [`Transport`]. Configuration is immutable after
/// construction.
///
/// # Example
///
/// ```ignore
/// use crosswire_client::{ProtocolClient, ProtocolClientConfig, Protocol};
///
/// let config = ProtocolClientConfig::new("https://api.example.com")
///     .protocol(Protocol::Connect)
///     .use_proto();
/// let client = ProtocolClient::new(config, transport);
///
/// let response = client
///     .unary::<GetUserRequest, GetUserResponse>("users.v1.UserService/GetUser", &request)
///     .await;
/// let user = response.into_result()?;
/// ```
pub struct ProtocolClient<T> {
    transport: Arc<T>,
    config: Arc<ProtocolClientConfig>,
    settings: Arc<ProtocolSettings>,
}

impl<T> Clone for ProtocolClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<T> std::fmt::Debug for ProtocolClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> ProtocolClient<T> {
    /// Create a client from a configuration and a transport.
    pub fn new(config: ProtocolClientConfig, transport: T) -> Self {
        let settings = Arc::new(config.protocol_settings());
        Self {
            transport: Arc::new(transport),
            config: Arc::new(config),
            settings,
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ProtocolClientConfig {
        &self.config
    }

    /// Perform a unary RPC.
    ///
    /// `procedure` is the fully qualified path, `package.Service/Method`,
    /// with or without a leading slash.
    pub async fn unary<Req, Res>(&self, procedure: &str, message: &Req) -> ResponseMessage<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.call_unary(procedure, message, CallOptions::new(), Idempotency::Unknown)
            .await
    }

    /// Perform a unary RPC with per-call options.
    pub async fn unary_with_options<Req, Res>(
        &self,
        procedure: &str,
        message: &Req,
        options: CallOptions,
    ) -> ResponseMessage<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.call_unary(procedure, message, options, Idempotency::Unknown)
            .await
    }

    /// Perform a unary RPC declared side-effect free.
    ///
    /// Under the Connect protocol with GET support enabled, the request
    /// is sent as a cacheable GET with the message in the query string.
    pub async fn cacheable_unary<Req, Res>(
        &self,
        procedure: &str,
        message: &Req,
    ) -> ResponseMessage<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.call_unary(
            procedure,
            message,
            CallOptions::new(),
            Idempotency::NoSideEffects,
        )
        .await
    }

    /// Perform a side-effect-free unary RPC with per-call options.
    pub async fn cacheable_unary_with_options<Req, Res>(
        &self,
        procedure: &str,
        message: &Req,
        options: CallOptions,
    ) -> ResponseMessage<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.call_unary(procedure, message, options, Idempotency::NoSideEffects)
            .await
    }

    /// Perform a unary RPC and deliver the response to a callback.
    ///
    /// The callback flavor of [`unary`](Self::unary); the call is driven
    /// on a spawned task.
    pub fn unary_callback<Req, Res, F>(&self, procedure: &str, message: &Req, on_response: F)
    where
        Req: Message + Serialize + Clone + Send + Sync + 'static,
        Res: Message + DeserializeOwned + Default + Send + 'static,
        F: FnOnce(ResponseMessage<Res>) + Send + 'static,
    {
        let client = self.clone();
        let procedure = procedure.to_string();
        let message = message.clone();
        tokio::spawn(async move {
            let response = client.unary::<Req, Res>(&procedure, &message).await;
            on_response(response);
        });
    }

    /// Open a bidirectional stream.
    ///
    /// The chain's start phase runs immediately; messages flow through
    /// [`BidirectionalStream::send`] and events through
    /// [`BidirectionalStream::results`]. Server-streaming and
    /// client-streaming RPCs use the same handle, sending zero or one
    /// message and half-closing as appropriate.
    pub fn stream<Req, Res>(
        &self,
        procedure: &str,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.stream_with_options(procedure, CallOptions::new())
    }

    /// Open a bidirectional stream with per-call options.
    pub fn stream_with_options<Req, Res>(
        &self,
        procedure: &str,
        options: CallOptions,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.start_stream(procedure, options, "bidi_stream")
    }

    /// Open a server-streaming RPC: sends the single request and
    /// half-closes, leaving the receive side open.
    pub fn server_stream<Req, Res>(
        &self,
        procedure: &str,
        message: &Req,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let stream = self.start_stream(procedure, CallOptions::new(), "server_stream")?;
        stream.send(message);
        stream.close_send();
        Ok(stream)
    }

    /// Open a client-streaming RPC. The server replies with one message
    /// once the send side is closed.
    pub fn client_stream<Req, Res>(
        &self,
        procedure: &str,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.start_stream(procedure, CallOptions::new(), "client_stream")
    }

    fn start_stream<Req, Res>(
        &self,
        procedure: &str,
        options: CallOptions,
        call_type: &str,
    ) -> Result<BidirectionalStream<Req, Res>, RpcError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let _span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = %call_type,
            rpc.protocol = %self.config.protocol.name(),
            rpc.encoding = %self.settings.encoding.name(),
            otel.kind = "client",
        )
        .entered();

        let request = self.build_request(procedure, &options, Idempotency::Unknown)?;
        let chain = self.chain();
        let request = chain.stream_start(request)?;
        let conn = self.transport.open_stream(request)?;
        Ok(BidirectionalStream::new(conn, chain, self.settings.encoding))
    }

    async fn call_unary<Req, Res>(
        &self,
        procedure: &str,
        message: &Req,
        options: CallOptions,
        idempotency: Idempotency,
    ) -> ResponseMessage<Res>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let span = info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = "unary",
            rpc.protocol = %self.config.protocol.name(),
            rpc.encoding = %self.settings.encoding.name(),
            otel.kind = "client",
        );

        async move {
            let mut request = match self.build_request(procedure, &options, idempotency) {
                Ok(request) => request,
                Err(error) => return ResponseMessage::from_error(error),
            };
            request.body = match self.settings.encoding.encode(message) {
                Ok(body) => Some(body),
                Err(error) => return ResponseMessage::from_error(error),
            };
            let deadline = request.timeout;

            let chain = self.chain();
            let transport = self.transport.clone();
            let call: UnaryFunc =
                Arc::new(move |request: HttpRequest| transport.perform_unary(request));

            let call = chain.unary(call);
            let pending = call(request);
            let outcome = match deadline {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RpcError::deadline_exceeded("request timed out")),
                },
                None => pending.await,
            };

            match outcome {
                Ok(response) => ResponseMessage::from_response(response, self.settings.encoding),
                Err(error) => ResponseMessage::from_error(error),
            }
        }
        .instrument(span)
        .await
    }

    fn chain(&self) -> InterceptorChain {
        InterceptorChain::new(
            &self.config.interceptors,
            self.config.protocol.interceptor(self.settings.clone()),
        )
    }

    fn build_request(
        &self,
        procedure: &str,
        options: &CallOptions,
        idempotency: Idempotency,
    ) -> Result<HttpRequest, RpcError> {
        let procedure = procedure.strip_prefix('/').unwrap_or(procedure);
        let target = format!(
            "{}/{}",
            self.config.host.trim_end_matches('/'),
            procedure
        );
        let uri: Uri = target.parse().map_err(|e| {
            RpcError::invalid_argument(format!("invalid request target {target:?}")).with_source(e)
        })?;

        let mut request = HttpRequest::post(uri);
        request.idempotency = idempotency;
        request.timeout = options.timeout.or(self.config.timeout);
        options.apply_headers(&mut request.headers);
        Ok(request)
    }
}

/// A decoded unary response.
///
/// Status is normalized across protocols: HTTP code plus JSON error body
/// (Connect) and `grpc-status` trailers (gRPC, gRPC-Web) both land in
/// [`code`](Self::code) and [`error`](Self::error).
#[derive(Debug)]
pub struct ResponseMessage<Res> {
    /// Normalized status code.
    pub code: Code,
    /// Response headers.
    pub headers: Metadata,
    /// The decoded message, present iff the call succeeded.
    pub message: Option<Res>,
    /// Response trailers.
    pub trailers: Metadata,
    /// The error, when the call failed.
    pub error: Option<RpcError>,
}

impl<Res> ResponseMessage<Res> {
    pub(crate) fn from_error(error: RpcError) -> Self {
        Self {
            code: error.code(),
            headers: Metadata::new(),
            message: None,
            trailers: Metadata::new(),
            error: Some(error),
        }
    }

    pub(crate) fn from_response(response: HttpResponse, encoding: Encoding) -> Self
    where
        Res: Message + DeserializeOwned + Default,
    {
        let HttpResponse {
            headers,
            body,
            trailers,
            error,
            ..
        } = response;

        if let Some(error) = error {
            return Self {
                code: error.code(),
                headers,
                message: None,
                trailers,
                error: Some(error),
            };
        }

        let decoded = match &body {
            Some(body) => encoding.decode::<Res>(body),
            None => Err(RpcError::unknown("response has no message")),
        };
        match decoded {
            Ok(message) => Self {
                code: Code::Ok,
                headers,
                message: Some(message),
                trailers,
                error: None,
            },
            Err(error) => Self {
                code: error.code(),
                headers,
                message: None,
                trailers,
                error: Some(error),
            },
        }
    }

    /// Whether the call succeeded.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Convert into a `Result`, discarding metadata.
    pub fn into_result(self) -> Result<Res, RpcError> {
        match self.error {
            Some(error) => Err(error),
            None => self
                .message
                .ok_or_else(|| RpcError::unknown("response has no message")),
        }
    }
}
