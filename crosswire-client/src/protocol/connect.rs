//! The Connect protocol translator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use bytes::Bytes;
use serde::Deserialize;

use crosswire_core::{
    BoxedCompression, Code, ErrorDetail, Metadata, RpcError, envelope_flags, pack, unpack,
};

use crate::config::{ProtocolSettings, connect_timeout_value};
use crate::descriptor::{HttpRequest, HttpResponse, Idempotency, StreamEvent};
use crate::interceptor::{Interceptor, UnaryFunc};
use crate::protocol::headers;

/// Translates RPCs into the Connect protocol.
///
/// Unary calls put status into the HTTP code and a JSON error body;
/// streams envelope every message and terminate with an end-of-stream
/// frame (`0x02`) carrying a JSON `{error?, metadata?}` object. Created
/// fresh per RPC so the stream half can capture response headers.
pub struct ConnectInterceptor {
    settings: Arc<ProtocolSettings>,
    stream: Mutex<StreamState>,
}

#[derive(Default)]
struct StreamState {
    response_pool: Option<BoxedCompression>,
    done: bool,
}

impl ConnectInterceptor {
    pub(crate) fn new(settings: Arc<ProtocolSettings>) -> Self {
        Self {
            settings,
            stream: Mutex::new(StreamState::default()),
        }
    }
}

impl Interceptor for ConnectInterceptor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let settings = self.settings.clone();
        Arc::new(move |request: HttpRequest| {
            let settings = settings.clone();
            let next = next.clone();
            Box::pin(async move {
                let request = prepare_unary_request(request, &settings)?;
                let response = next(request).await?;
                Ok(finish_unary_response(response, &settings))
            })
        })
    }

    fn on_stream_start(&self, mut request: HttpRequest) -> Result<HttpRequest, RpcError> {
        let settings = &self.settings;
        request.headers.insert(
            headers::CONTENT_TYPE,
            format!("application/connect+{}", settings.encoding.name()),
        );
        request
            .headers
            .insert(headers::CONNECT_PROTOCOL_VERSION, "1");
        if let Some(value) = request.timeout.and_then(connect_timeout_value) {
            request.headers.insert(headers::CONNECT_TIMEOUT_MS, value);
        }
        if let Some(policy) = &settings.request_compression {
            request
                .headers
                .insert(headers::CONNECT_CONTENT_ENCODING, policy.pool.name());
        }
        if let Some(accept) = settings.accept.accept_header() {
            request
                .headers
                .insert(headers::CONNECT_ACCEPT_ENCODING, accept);
        }
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
                state.response_pool = self
                    .settings
                    .accept
                    .get(meta.get(headers::CONNECT_CONTENT_ENCODING));
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
                if flags & envelope_flags::END_STREAM != 0 {
                    state.done = true;
                    return end_stream_event(&payload);
                }
                StreamEvent::Message(payload)
            }
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => {
                state.done = true;
                // A clean transport close without an end-of-stream frame
                // violates the protocol.
                if error.is_none() && code == Code::Ok {
                    return StreamEvent::complete_err(RpcError::unknown(
                        "stream closed without an end-of-stream frame",
                    ));
                }
                StreamEvent::Complete {
                    code,
                    error,
                    trailers,
                }
            }
        }
    }
}

fn prepare_unary_request(
    mut request: HttpRequest,
    settings: &ProtocolSettings,
) -> Result<HttpRequest, RpcError> {
    request.headers.insert(
        headers::CONTENT_TYPE,
        format!("application/{}", settings.encoding.name()),
    );
    request
        .headers
        .insert(headers::CONNECT_PROTOCOL_VERSION, "1");
    if let Some(value) = request.timeout.and_then(connect_timeout_value) {
        request.headers.insert(headers::CONNECT_TIMEOUT_MS, value);
    }
    if let Some(accept) = settings.accept.accept_header() {
        request.headers.insert(headers::ACCEPT_ENCODING, accept);
    }

    let mut compressed = false;
    if let (Some(body), Some(policy)) = (&request.body, &settings.request_compression) {
        if policy.should_compress(body.len()) {
            let squeezed = policy.pool.compress(body).map_err(|e| {
                RpcError::internal("request compression failed").with_source(e)
            })?;
            request
                .headers
                .insert(headers::CONTENT_ENCODING, policy.pool.name());
            request.body = Some(squeezed);
            compressed = true;
        }
    }

    if settings.enable_get && request.idempotency == Idempotency::NoSideEffects {
        request = into_get_request(request, settings, compressed);
    }
    Ok(request)
}

/// Rewrite a side-effect-free POST into a cacheable GET, moving the body
/// into the `message` query parameter.
fn into_get_request(
    mut request: HttpRequest,
    settings: &ProtocolSettings,
    compressed: bool,
) -> HttpRequest {
    let body = request.body.take().unwrap_or_default();
    let mut query = format!(
        "message={}&encoding={}&base64=1",
        URL_SAFE_NO_PAD.encode(&body),
        settings.encoding.name(),
    );
    if compressed {
        if let Some(policy) = &settings.request_compression {
            query.push_str("&compression=");
            query.push_str(policy.pool.name());
        }
    }
    query.push_str("&connect=v1");

    let target = format!("{}?{}", request.uri, query);
    if let Ok(uri) = target.parse() {
        request.uri = uri;
        request.method = http::Method::GET;
        request.headers.remove(headers::CONTENT_TYPE);
        request.headers.remove(headers::CONTENT_ENCODING);
        request.headers.insert(headers::GET_REQUEST_MARKER, "true");
    } else {
        // Unparseable target: fall back to the POST form untouched.
        request.body = Some(body);
    }
    request
}

fn finish_unary_response(mut response: HttpResponse, settings: &ProtocolSettings) -> HttpResponse {
    if response.error.is_some() {
        return response;
    }

    // Unary bodies are compressed whole, signaled by Content-Encoding.
    let encoding = response.headers.get(headers::CONTENT_ENCODING);
    if !settings.accept.supports(encoding) {
        response.error = Some(RpcError::internal(format!(
            "unsupported response encoding {:?}",
            encoding.unwrap_or_default()
        )));
        return response;
    }
    if let (Some(pool), Some(body)) = (settings.accept.get(encoding), &response.body) {
        match pool.decompress(body) {
            Ok(plain) => response.body = Some(plain),
            Err(err) => {
                response.error = Some(
                    RpcError::internal("response decompression failed").with_source(err),
                );
                return response;
            }
        }
    }

    if response.status != 200 {
        let body = response.body.take().unwrap_or_default();
        response.error = Some(unary_error(response.status, &body, &response.headers));
    }
    response
}

/// Decode a non-200 Connect unary response body into an error.
///
/// Falls back to the HTTP status table when the body is not a Connect
/// error object.
fn unary_error(status: u16, body: &[u8], response_headers: &Metadata) -> RpcError {
    match serde_json::from_slice::<ErrorJson>(body) {
        Ok(parsed) => {
            let code = Code::from_name(&parsed.code)
                .unwrap_or_else(|| Code::from_connect_http_status(status));
            error_from_json(code, parsed).with_metadata(response_headers.clone())
        }
        Err(_) => {
            let message = if body.is_empty() {
                format!("HTTP {status}")
            } else {
                String::from_utf8_lossy(body).into_owned()
            };
            RpcError::new(Code::from_connect_http_status(status), message)
        }
    }
}

/// Decode an end-of-stream frame payload into the terminal event.
fn end_stream_event(payload: &[u8]) -> StreamEvent<Bytes> {
    let parsed: EndStreamJson = if payload.is_empty() {
        EndStreamJson::default()
    } else {
        match serde_json::from_slice(payload) {
            Ok(parsed) => parsed,
            Err(err) => {
                return StreamEvent::complete_err(
                    RpcError::unknown("invalid end-of-stream frame").with_source(err),
                );
            }
        }
    };

    let trailers = parsed.metadata.map(|entries| {
        let mut meta = Metadata::new();
        for (key, values) in entries {
            for value in values {
                meta.append(&key, value);
            }
        }
        meta
    });

    match parsed.error {
        Some(error_json) => {
            let code = Code::from_name(&error_json.code).unwrap_or(Code::Unknown);
            let mut error = error_from_json(code, error_json);
            if let Some(trailers) = &trailers {
                error = error.with_metadata(trailers.clone());
            }
            StreamEvent::Complete {
                code,
                error: Some(error),
                trailers,
            }
        }
        None => StreamEvent::complete_ok(trailers),
    }
}

fn error_from_json(code: Code, json: ErrorJson) -> RpcError {
    let mut error = match json.message {
        Some(message) => RpcError::new(code, message),
        None => RpcError::from_code(code),
    };
    for detail in json.details {
        if let Some(value) = decode_detail_value(&detail.value) {
            error = error.add_detail(ErrorDetail::new(detail.type_url, value));
        }
    }
    error
}

/// Connect error detail values are unpadded base64; accept the padded
/// form some servers send.
fn decode_detail_value(value: &str) -> Option<Vec<u8>> {
    STANDARD_NO_PAD
        .decode(value)
        .or_else(|_| STANDARD.decode(value))
        .ok()
}

/// JSON body of a Connect unary error, and the `error` member of the
/// end-of-stream object.
#[derive(Deserialize, Default)]
struct ErrorJson {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<DetailJson>,
}

#[derive(Deserialize)]
struct DetailJson {
    #[serde(rename = "type")]
    type_url: String,
    #[serde(default)]
    value: String,
}

/// The end-of-stream JSON object.
#[derive(Deserialize, Default)]
struct EndStreamJson {
    #[serde(default)]
    error: Option<ErrorJson>,
    #[serde(default)]
    metadata: Option<HashMap<String, Vec<String>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosswire_core::Encoding;

    fn settings() -> Arc<ProtocolSettings> {
        Arc::new(ProtocolSettings {
            encoding: Encoding::Proto,
            request_compression: None,
            accept: Default::default(),
            enable_get: false,
        })
    }

    fn frame(flags: u8, payload: &[u8]) -> Bytes {
        let mut data = vec![flags];
        data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        data.extend_from_slice(payload);
        Bytes::from(data)
    }

    #[test]
    fn test_stream_start_headers() {
        let interceptor = ConnectInterceptor::new(settings());
        let request = interceptor
            .on_stream_start(HttpRequest::post("http://h/s/M".parse().unwrap()))
            .unwrap();
        assert_eq!(
            request.headers.get("content-type"),
            Some("application/connect+proto")
        );
        assert_eq!(request.headers.get("connect-protocol-version"), Some("1"));
    }

    #[test]
    fn test_stream_output_message_frame() {
        let interceptor = ConnectInterceptor::new(settings());
        let event = interceptor.on_stream_output(StreamEvent::Message(frame(0x00, b"payload")));
        match event {
            StreamEvent::Message(payload) => assert_eq!(&payload[..], b"payload"),
            _ => panic!("expected message"),
        }
    }

    #[test]
    fn test_stream_output_end_stream_ok() {
        let interceptor = ConnectInterceptor::new(settings());
        let payload = br#"{"metadata":{"x-count":["3"]}}"#;
        let event = interceptor.on_stream_output(StreamEvent::Message(frame(0x02, payload)));
        match event {
            StreamEvent::Complete {
                code,
                error,
                trailers,
            } => {
                assert_eq!(code, Code::Ok);
                assert!(error.is_none());
                assert_eq!(trailers.unwrap().get("x-count"), Some("3"));
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn test_stream_output_end_stream_error() {
        let interceptor = ConnectInterceptor::new(settings());
        let payload = br#"{"error":{"code":"resource_exhausted","message":"slow down"}}"#;
        let event = interceptor.on_stream_output(StreamEvent::Message(frame(0x02, payload)));
        match event {
            StreamEvent::Complete { code, error, .. } => {
                assert_eq!(code, Code::ResourceExhausted);
                assert_eq!(error.unwrap().message(), "slow down");
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn test_stream_output_clean_close_without_end_stream() {
        let interceptor = ConnectInterceptor::new(settings());
        let event = interceptor.on_stream_output(StreamEvent::complete_ok(None));
        match event {
            StreamEvent::Complete { code, error, .. } => {
                assert_eq!(code, Code::Unknown);
                assert!(error.is_some());
            }
            _ => panic!("expected complete"),
        }
    }

    #[test]
    fn test_unary_error_body_parsing() {
        let body = br#"{"code":"not_found","message":"no such user","details":[{"type":"google.rpc.ErrorInfo","value":"AQID"}]}"#;
        let error = unary_error(404, body, &Metadata::new());
        assert_eq!(error.code(), Code::NotFound);
        assert_eq!(error.message(), "no such user");
        assert_eq!(error.details().len(), 1);
        assert_eq!(error.details()[0].value(), &[1, 2, 3]);
    }

    #[test]
    fn test_unary_error_fallback_to_http_status() {
        let error = unary_error(503, b"service down", &Metadata::new());
        assert_eq!(error.code(), Code::Unavailable);
        assert_eq!(error.message(), "service down");
    }

    #[test]
    fn test_get_transform_round_trips_body() {
        let settings = Arc::new(ProtocolSettings {
            encoding: Encoding::Proto,
            request_compression: None,
            accept: Default::default(),
            enable_get: true,
        });
        let mut request = HttpRequest::post("http://h/pkg.Svc/Get".parse().unwrap());
        request.idempotency = Idempotency::NoSideEffects;
        request.body = Some(Bytes::from_static(b"\x08\x01\x12\x03abc"));

        let request = prepare_unary_request(request, &settings).unwrap();
        assert_eq!(request.method, http::Method::GET);
        assert!(request.body.is_none());
        assert_eq!(request.headers.get("get-request"), Some("true"));

        let query = request.uri.query().unwrap();
        let message = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("message="))
            .unwrap();
        assert_eq!(
            URL_SAFE_NO_PAD.decode(message).unwrap(),
            b"\x08\x01\x12\x03abc"
        );
        assert!(query.contains("encoding=proto"));
        assert!(query.contains("base64=1"));
        assert!(query.contains("connect=v1"));
    }

    #[test]
    fn test_get_transform_requires_no_side_effects() {
        let settings = Arc::new(ProtocolSettings {
            encoding: Encoding::Proto,
            request_compression: None,
            accept: Default::default(),
            enable_get: true,
        });
        let mut request = HttpRequest::post("http://h/pkg.Svc/Put".parse().unwrap());
        request.body = Some(Bytes::from_static(b"data"));

        let request = prepare_unary_request(request, &settings).unwrap();
        assert_eq!(request.method, http::Method::POST);
        assert!(request.body.is_some());
    }
}
