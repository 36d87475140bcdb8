//! Connect protocol unary calls against the in-memory transport.

mod common;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use prost::Message;

use common::{MockTransport, Payload, SimpleRequest, SimpleResponse, zeros};
use crosswire_client::{
    BoxedCompression, Code, GzipCompression, HttpResponse, Metadata, ProtocolClient,
    ProtocolClientConfig, RequestCompression,
};

fn client(transport: MockTransport) -> ProtocolClient<MockTransport> {
    ProtocolClient::new(ProtocolClientConfig::new("http://localhost:3000"), transport)
}

#[tokio::test]
async fn test_large_unary() {
    let transport = MockTransport::unary(|request| {
        assert_eq!(request.method, http::Method::POST);
        assert_eq!(
            request.uri.path(),
            "/grpc.testing.TestService/UnaryCall"
        );
        assert_eq!(
            request.headers.get("content-type"),
            Some("application/proto")
        );
        assert_eq!(request.headers.get("connect-protocol-version"), Some("1"));

        let parsed = SimpleRequest::decode(&request.body.unwrap()[..]).unwrap();
        assert_eq!(parsed.payload.unwrap().body.len(), 314_159);

        let reply = SimpleResponse {
            payload: Some(zeros(parsed.response_size as usize)),
        };
        let mut headers = Metadata::new();
        headers.insert("content-type", "application/proto");
        Ok(HttpResponse::ok(
            headers,
            Some(Bytes::from(reply.encode_to_vec())),
        ))
    });

    let request = SimpleRequest {
        response_size: 314_159,
        payload: Some(zeros(314_159)),
    };
    let response = client(transport)
        .unary::<SimpleRequest, SimpleResponse>("grpc.testing.TestService/UnaryCall", &request)
        .await;

    assert_eq!(response.code, Code::Ok);
    let message = response.into_result().unwrap();
    assert_eq!(message.payload.unwrap().body.len(), 314_159);
}

#[tokio::test]
async fn test_unary_error_body() {
    let transport = MockTransport::unary(|_request| {
        let body = br#"{"code":"permission_denied","message":"no access","details":[{"type":"google.rpc.ErrorInfo","value":"AQID"}]}"#;
        let mut response = HttpResponse::ok(Metadata::new(), Some(Bytes::from_static(body)));
        response.status = 403;
        Ok(response)
    });

    let response = client(transport)
        .unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/UnaryCall",
            &SimpleRequest::default(),
        )
        .await;

    assert_eq!(response.code, Code::PermissionDenied);
    let error = response.error.unwrap();
    assert_eq!(error.message(), "no access");
    assert_eq!(error.details().len(), 1);
    assert_eq!(error.details()[0].value(), &[1, 2, 3]);
}

#[tokio::test]
async fn test_unary_error_non_json_body_falls_back_to_http_status() {
    let transport = MockTransport::unary(|_request| {
        let mut response =
            HttpResponse::ok(Metadata::new(), Some(Bytes::from_static(b"bad gateway")));
        response.status = 502;
        Ok(response)
    });

    let response = client(transport)
        .unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/UnaryCall",
            &SimpleRequest::default(),
        )
        .await;
    assert_eq!(response.code, Code::Unavailable);
}

#[tokio::test]
async fn test_cacheable_unary_get_transform() {
    let expected = SimpleRequest {
        response_size: 16,
        payload: Some(Payload {
            body: b"query me".to_vec(),
        }),
    };
    let expected_bytes = expected.encode_to_vec();

    let transport = MockTransport::unary(move |request| {
        assert_eq!(request.method, http::Method::GET);
        assert!(request.body.is_none());
        assert_eq!(request.headers.get("get-request"), Some("true"));
        assert!(!request.headers.contains_key("content-type"));

        let query = request.uri.query().unwrap();
        let mut message = None;
        let mut pairs = Vec::new();
        for pair in query.split('&') {
            let (key, value) = pair.split_once('=').unwrap();
            pairs.push(key.to_string());
            if key == "message" {
                message = Some(value.to_string());
            }
        }
        assert!(pairs.contains(&"encoding".to_string()));
        assert!(pairs.contains(&"base64".to_string()));
        assert!(pairs.contains(&"connect".to_string()));

        // The decoded message query parameter equals the original body.
        let decoded = URL_SAFE_NO_PAD.decode(message.unwrap()).unwrap();
        assert_eq!(decoded, expected.encode_to_vec());

        let reply = SimpleResponse {
            payload: Some(zeros(16)),
        };
        Ok(HttpResponse::ok(
            Metadata::new(),
            Some(Bytes::from(reply.encode_to_vec())),
        ))
    });

    let config = ProtocolClientConfig::new("http://localhost:3000").enable_get(true);
    let client = ProtocolClient::new(config, transport);
    let request = SimpleRequest::decode(&expected_bytes[..]).unwrap();
    let response = client
        .cacheable_unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/CacheableUnaryCall",
            &request,
        )
        .await;

    assert_eq!(response.code, Code::Ok);
}

#[tokio::test]
async fn test_unary_compression_round_trip() {
    let pool = BoxedCompression::new(GzipCompression::default());
    let server_pool = pool.clone();

    let transport = MockTransport::unary(move |request| {
        assert_eq!(request.headers.get("content-encoding"), Some("gzip"));
        assert_eq!(
            request.headers.get("accept-encoding"),
            Some("gzip, identity")
        );

        let body = server_pool.decompress(&request.body.unwrap()).unwrap();
        let parsed = SimpleRequest::decode(&body[..]).unwrap();

        let reply = SimpleResponse {
            payload: Some(zeros(parsed.response_size as usize)),
        };
        let compressed = server_pool.compress(&reply.encode_to_vec()).unwrap();
        let mut headers = Metadata::new();
        headers.insert("content-encoding", "gzip");
        Ok(HttpResponse::ok(headers, Some(compressed)))
    });

    let config = ProtocolClientConfig::new("http://localhost:3000")
        .request_compression(RequestCompression::new(pool.clone()).with_min_bytes(1))
        .accept_compression(pool);
    let client = ProtocolClient::new(config, transport);

    let request = SimpleRequest {
        response_size: 2048,
        payload: Some(zeros(4096)),
    };
    let response = client
        .unary::<SimpleRequest, SimpleResponse>("grpc.testing.TestService/UnaryCall", &request)
        .await;

    assert_eq!(response.code, Code::Ok);
    assert_eq!(
        response.into_result().unwrap().payload.unwrap().body.len(),
        2048
    );
}

#[tokio::test]
async fn test_unary_callback_flavor() {
    let transport = MockTransport::unary(|_request| {
        Ok(HttpResponse::ok(
            Metadata::new(),
            Some(Bytes::from(SimpleResponse::default().encode_to_vec())),
        ))
    });

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    client(transport).unary_callback::<SimpleRequest, SimpleResponse, _>(
        "grpc.testing.TestService/UnaryCall",
        &SimpleRequest::default(),
        move |response| {
            let _ = done_tx.send(response.code);
        },
    );

    assert_eq!(done_rx.await.unwrap(), Code::Ok);
}

#[tokio::test]
async fn test_small_message_skips_compression_threshold() {
    let transport = MockTransport::unary(|request| {
        assert!(!request.headers.contains_key("content-encoding"));
        let parsed = SimpleRequest::decode(&request.body.unwrap()[..]).unwrap();
        assert_eq!(parsed.response_size, 1);
        Ok(HttpResponse::ok(
            Metadata::new(),
            Some(Bytes::from(SimpleResponse::default().encode_to_vec())),
        ))
    });

    let config = ProtocolClientConfig::new("http://localhost:3000").request_compression(
        RequestCompression::new(BoxedCompression::new(GzipCompression::default()))
            .with_min_bytes(1024 * 1024),
    );
    let client = ProtocolClient::new(config, transport);
    let response = client
        .unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/UnaryCall",
            &SimpleRequest {
                response_size: 1,
                payload: None,
            },
        )
        .await;
    assert_eq!(response.code, Code::Ok);
}
