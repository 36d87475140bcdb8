//! The gRPC protocol translator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;
use prost::Message;

use crosswire_core::{
    BoxedCompression, Code, ErrorDetail, Metadata, RpcError, pack, unpack,
};

use crate::config::ProtocolSettings;
use crate::descriptor::{HttpRequest, HttpResponse, StreamEvent};
use crate::interceptor::{Interceptor, UnaryFunc};
use crate::protocol::{headers, pb};

/// Translates RPCs into the gRPC protocol.
///
/// Every body is a sequence of length-prefixed frames; status travels
/// exclusively in HTTP trailers (`grpc-status`, `grpc-message`,
/// `grpc-status-details-bin`). Created fresh per RPC so the stream half
/// can capture response headers.
pub struct GrpcInterceptor {
    settings: Arc<ProtocolSettings>,
    stream: Mutex<StreamState>,
}

#[derive(Default)]
struct StreamState {
    response_pool: Option<BoxedCompression>,
    done: bool,
}

impl GrpcInterceptor {
    pub(crate) fn new(settings: Arc<ProtocolSettings>) -> Self {
        Self {
            settings,
            stream: Mutex::new(StreamState::default()),
        }
    }
}

impl Interceptor for GrpcInterceptor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let settings = self.settings.clone();
        Arc::new(move |mut request: HttpRequest| {
            let settings = settings.clone();
            let next = next.clone();
            Box::pin(async move {
                apply_request_headers(&mut request, &settings, "grpc", true);
                if let Some(body) = request.body.take() {
                    request.body = Some(pack(&body, settings.request_compression.as_ref())?);
                }
                let response = next(request).await?;
                Ok(finish_unary_response(response, &settings))
            })
        })
    }

    fn on_stream_start(&self, mut request: HttpRequest) -> Result<HttpRequest, RpcError> {
        apply_request_headers(&mut request, &self.settings, "grpc", true);
        Ok(request)
    }

    fn on_stream_input(&self, frame: Bytes) -> Result<Bytes, RpcError> {
        Ok(pack(&frame, self.settings.request_compression.as_ref())?)
    }

    fn on_stream_output(&self, event: StreamEvent<Bytes>) -> StreamEvent<Bytes> {
        let mut state = self.stream.lock().unwrap();
        if state.done {
            return event;
        }
        match event {
            StreamEvent::Headers(meta) => {
                state.response_pool =
                    self.settings.accept.get(meta.get(headers::GRPC_ENCODING));
                StreamEvent::Headers(meta)
            }
            StreamEvent::Message(frame) => {
                match unpack(&frame, state.response_pool.as_ref()) {
                    Ok((_, payload)) => StreamEvent::Message(payload),
                    Err(err) => {
                        state.done = true;
                        StreamEvent::complete_err(RpcError::from(err))
                    }
                }
            }
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => {
                state.done = true;
                complete_from_trailers(code, error, trailers)
            }
        }
    }
}

/// Derive the terminal event from HTTP trailers when they carry a
/// `grpc-status`; otherwise keep the transport-level status.
pub(crate) fn complete_from_trailers(
    code: Code,
    error: Option<RpcError>,
    trailers: Option<Metadata>,
) -> StreamEvent<Bytes> {
    if let Some(meta) = &trailers {
        if let Some((code, error)) = status_from_metadata(meta) {
            return StreamEvent::Complete {
                code,
                error,
                trailers,
            };
        }
    }
    StreamEvent::Complete {
        code,
        error,
        trailers,
    }
}

/// Apply the shared gRPC-family request headers.
pub(crate) fn apply_request_headers(
    request: &mut HttpRequest,
    settings: &ProtocolSettings,
    family: &str,
    include_te: bool,
) {
    request.headers.insert(
        headers::CONTENT_TYPE,
        format!("application/{family}+{}", settings.encoding.name()),
    );
    if include_te {
        request.headers.insert(headers::TE, "trailers");
    }
    if let Some(value) = request.timeout.and_then(grpc_timeout_value) {
        request.headers.insert(headers::GRPC_TIMEOUT, value);
    }
    if let Some(policy) = &settings.request_compression {
        request
            .headers
            .insert(headers::GRPC_ENCODING, policy.pool.name());
    }
    if let Some(accept) = settings.accept.accept_header() {
        request.headers.insert(headers::GRPC_ACCEPT_ENCODING, accept);
    }
}

fn finish_unary_response(mut response: HttpResponse, settings: &ProtocolSettings) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    // Trailers-only responses carry the status in the header block.
    let status = status_from_metadata(&response.trailers)
        .or_else(|| status_from_metadata(&response.headers));

    match status {
        Some((Code::Ok, _)) => {
            let pool = settings.accept.get(response.headers.get(headers::GRPC_ENCODING));
            let Some(body) = response.body.take() else {
                response.error = Some(RpcError::unknown("unary response has no message"));
                return response;
            };
            match unpack(&body, pool.as_ref()) {
                Ok((_, payload)) => response.body = Some(payload),
                Err(err) => response.error = Some(RpcError::from(err)),
            }
        }
        Some((_, error)) => {
            response.body = None;
            response.error = error;
        }
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

/// Extract `(code, error)` from gRPC metadata.
///
/// Returns `None` when no `grpc-status` is present. A non-zero status
/// yields an error carrying the percent-decoded `grpc-message` and any
/// details from `grpc-status-details-bin`.
pub(crate) fn status_from_metadata(meta: &Metadata) -> Option<(Code, Option<RpcError>)> {
    let raw = meta.get(headers::GRPC_STATUS)?;
    let code = raw
        .parse::<i32>()
        .ok()
        .and_then(Code::from_i32)
        .unwrap_or(Code::Unknown);
    if code == Code::Ok {
        return Some((Code::Ok, None));
    }

    let message = meta
        .get(headers::GRPC_MESSAGE)
        .map(percent_decode)
        .unwrap_or_default();
    let mut error = RpcError::new(code, message).with_metadata(meta.clone());
    for detail in details_from_metadata(meta) {
        error = error.add_detail(detail);
    }
    Some((code, Some(error)))
}

/// Decode `grpc-status-details-bin` into typed details.
fn details_from_metadata(meta: &Metadata) -> Vec<ErrorDetail> {
    let Some(raw) = meta.get(headers::GRPC_STATUS_DETAILS_BIN) else {
        return Vec::new();
    };
    let Some(bytes) = STANDARD_NO_PAD
        .decode(raw)
        .or_else(|_| STANDARD.decode(raw))
        .ok()
    else {
        return Vec::new();
    };
    let Ok(status) = pb::Status::decode(bytes.as_slice()) else {
        return Vec::new();
    };
    status
        .details
        .into_iter()
        .map(|any| ErrorDetail::new(any.type_url, any.value))
        .collect()
}

/// Render a duration as a `Grpc-Timeout` header value, choosing the
/// smallest unit that keeps the integer within 8 digits.
pub(crate) fn grpc_timeout_value(timeout: Duration) -> Option<String> {
    const MAX_DIGITS: u128 = 99_999_999;
    const UNITS: &[(&str, u128)] = &[
        ("n", 1),
        ("u", 1_000),
        ("m", 1_000_000),
        ("S", 1_000_000_000),
        ("M", 60_000_000_000),
        ("H", 3_600_000_000_000),
    ];

    let nanos = timeout.as_nanos();
    if nanos == 0 {
        return None;
    }
    for (unit, scale) in UNITS {
        let value = nanos / scale;
        if value <= MAX_DIGITS {
            return Some(format!("{value}{unit}"));
        }
    }
    None
}

/// Decode the percent-encoded `grpc-message` value.
///
/// Invalid escapes are kept literally; gRPC requires lenient decoding.
pub(crate) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(value) = u8::from_str_radix(hex, 16) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
