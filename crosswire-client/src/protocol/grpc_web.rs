//! The gRPC-Web protocol translator.

use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crosswire_core::{
    BoxedCompression, Code, ENVELOPE_HEADER_LEN, Metadata, RpcError, envelope_flags,
    message_length, pack, unpack,
};

use crate::config::ProtocolSettings;
use crate::descriptor::{HttpRequest, HttpResponse, StreamEvent};
use crate::interceptor::{Interceptor, UnaryFunc};
use crate::protocol::grpc::{apply_request_headers, status_from_metadata};
use crate::protocol::headers;

/// Translates RPCs into the gRPC-Web protocol.
///
/// The request path matches gRPC (minus `Te`), but the transport exposes
/// no HTTP trailers: the server synthesizes them into a final envelope
/// whose high flag bit (`0x80`) is set, carrying an HTTP/1.1-style header
/// block. Unary response bodies are two back-to-back envelopes, sliced
/// apart by peeking the first frame's length. Created fresh per RPC; the
/// stream half captures response headers and latches terminal state.
pub struct GrpcWebInterceptor {
    settings: Arc<ProtocolSettings>,
    stream: Mutex<StreamState>,
}

#[derive(Default)]
struct StreamState {
    response_pool: Option<BoxedCompression>,
    done: bool,
}

impl GrpcWebInterceptor {
    pub(crate) fn new(settings: Arc<ProtocolSettings>) -> Self {
        Self {
            settings,
            stream: Mutex::new(StreamState::default()),
        }
    }
}

impl Interceptor for GrpcWebInterceptor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let settings = self.settings.clone();
        Arc::new(move |mut request: HttpRequest| {
            let settings = settings.clone();
            let next = next.clone();
            Box::pin(async move {
                apply_request_headers(&mut request, &settings, "grpc-web", false);
                if let Some(body) = request.body.take() {
                    request.body = Some(pack(&body, settings.request_compression.as_ref())?);
                }
                let response = next(request).await?;
                Ok(finish_unary_response(response, &settings))
            })
        })
    }

    fn on_stream_start(&self, mut request: HttpRequest) -> Result<HttpRequest, RpcError> {
        apply_request_headers(&mut request, &self.settings, "grpc-web", false);
        Ok(request)
    }

    fn on_stream_input(&self, frame: Bytes) -> Result<Bytes, RpcError> {
        Ok(pack(&frame, self.settings.request_compression.as_ref())?)
    }

    fn on_stream_output(&self, event: StreamEvent<Bytes>) -> StreamEvent<Bytes> {
        let mut state = self.stream.lock().unwrap();
        if state.done {
            // Terminal already reached: later frames are discarded by the
            // stream state machine, so pass them through untouched.
            return event;
        }
        match event {
            StreamEvent::Headers(meta) => {
                state.response_pool =
                    self.settings.accept.get(meta.get(headers::GRPC_ENCODING));
                StreamEvent::Headers(meta)
            }
            StreamEvent::Message(frame) => {
                let (flags, payload) = match unpack(&frame, state.response_pool.as_ref()) {
                    Ok(unpacked) => unpacked,
                    Err(err) => {
                        state.done = true;
                        return StreamEvent::complete_err(RpcError::from(err));
                    }
                };
                if flags & envelope_flags::TRAILERS != 0 {
                    state.done = true;
                    return match parse_trailer_block(&payload) {
                        Ok(trailers) => trailers_event(trailers),
                        Err(err) => StreamEvent::complete_err(err),
                    };
                }
                StreamEvent::Message(payload)
            }
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => {
                state.done = true;
                super::grpc::complete_from_trailers(code, error, trailers)
            }
        }
    }
}

fn finish_unary_response(mut response: HttpResponse, settings: &ProtocolSettings) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    let pool = settings.accept.get(response.headers.get(headers::GRPC_ENCODING));
    let mut message = None;

    if let Some(body) = response.body.take() {
        if !body.is_empty() {
            match split_unary_body(&body, pool.as_ref()) {
                Ok((payload, trailers)) => {
                    message = payload;
                    if let Some(trailers) = trailers {
                        response.trailers.extend(trailers);
                    }
                }
                Err(err) => {
                    response.error = Some(err);
                    return response;
                }
            }
        }
    }

    let status = status_from_metadata(&response.trailers)
        .or_else(|| status_from_metadata(&response.headers));
    match status {
        Some((Code::Ok, _)) => {
            if message.is_none() {
                response.error = Some(RpcError::unknown("unary response has no message"));
            }
            response.body = message;
        }
        Some((_, error)) => response.error = error,
        None => {
            response.error = Some(if response.status == 200 {
                RpcError::unknown("response is missing grpc-status")
            } else {
                RpcError::new(
                    Code::from_grpc_http_status(response.status),
                    format!("HTTP {}", response.status),
                )
            });
        }
    }
    response
}

/// Slice a unary gRPC-Web body into its message payload and trailers.
///
/// The body is an optional message envelope followed by a trailers
/// envelope with the `0x80` bit set; "trailers-only" responses start with
/// the trailers envelope directly.
fn split_unary_body(
    body: &[u8],
    pool: Option<&BoxedCompression>,
) -> Result<(Option<Bytes>, Option<Metadata>), RpcError> {
    let first_len = message_length(body)? as usize;
    let first_end = ENVELOPE_HEADER_LEN + first_len;
    let (flags, payload) = unpack(&body[..first_end.min(body.len())], pool)?;

    if flags & envelope_flags::TRAILERS != 0 {
        // Trailers-only: no message precedes the trailers frame.
        return Ok((None, Some(parse_trailer_block(&payload)?)));
    }

    let rest = &body[first_end..];
    if rest.is_empty() {
        return Ok((Some(payload), None));
    }
    let (rest_flags, trailer_payload) = unpack(rest, pool)?;
    if rest_flags & envelope_flags::TRAILERS == 0 {
        return Err(RpcError::unknown(
            "unary response carries more than one message frame",
        ));
    }
    Ok((Some(payload), Some(parse_trailer_block(&trailer_payload)?)))
}

/// Turn a parsed trailer block into the terminal event.
fn trailers_event(trailers: Metadata) -> StreamEvent<Bytes> {
    match status_from_metadata(&trailers) {
        Some((code, error)) => StreamEvent::Complete {
            code,
            error,
            trailers: Some(trailers),
        },
        None => StreamEvent::complete_err(
            RpcError::unknown("trailers frame is missing grpc-status")
                .with_metadata(trailers),
        ),
    }
}

/// Parse an HTTP/1.1-style trailer block:
///
/// ```text
/// key: v1, v2\r\n
/// key2: v3\r\n
/// ```
///
/// Keys are lowercased, values split on `,` with one leading space
/// stripped.
fn parse_trailer_block(payload: &[u8]) -> Result<Metadata, RpcError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| RpcError::unknown("trailer block is not valid UTF-8").with_source(e))?;

    let mut trailers = Metadata::new();
    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let Some((key, values)) = line.split_once(':') else {
            return Err(RpcError::unknown(format!(
                "malformed trailer line {line:?}"
            )));
        };
        let key = key.trim().to_ascii_lowercase();
        for value in values.split(',') {
            trailers.append(&key, value.strip_prefix(' ').unwrap_or(value));
        }
    }
    Ok(trailers)
}
