//! gRPC-Web protocol calls against the in-memory transport.

mod common;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use prost::Message;

use common::{
    MockTransport, SimpleRequest, SimpleResponse, frame, stream_conn, zeros,
};
use crosswire_client::{
    Code, HttpResponse, Metadata, Protocol, ProtocolClient, ProtocolClientConfig, StreamEvent,
};

fn client(transport: MockTransport) -> ProtocolClient<MockTransport> {
    let config = ProtocolClientConfig::new("http://localhost:3000").protocol(Protocol::GrpcWeb);
    ProtocolClient::new(config, transport)
}

#[tokio::test]
async fn test_unary_message_and_trailer_frames() {
    let transport = MockTransport::unary(|request| {
        assert_eq!(
            request.headers.get("content-type"),
            Some("application/grpc-web+proto")
        );
        // gRPC-Web sends no TE header.
        assert!(!request.headers.contains_key("te"));

        let body = request.body.unwrap();
        let parsed = SimpleRequest::decode(&body[5..]).unwrap();
        let reply = SimpleResponse {
            payload: Some(zeros(parsed.response_size as usize)),
        };

        // Two back-to-back envelopes: the message, then the trailers.
        let mut combined = BytesMut::new();
        combined.extend_from_slice(&frame(0x00, &reply.encode_to_vec()));
        combined.extend_from_slice(&frame(0x80, b"grpc-status: 0\r\nx-extra: yes\r\n"));
        Ok(HttpResponse::ok(
            Metadata::new(),
            Some(combined.freeze()),
        ))
    });

    let response = client(transport)
        .unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/UnaryCall",
            &SimpleRequest {
                response_size: 128,
                payload: None,
            },
        )
        .await;

    assert_eq!(response.code, Code::Ok);
    assert_eq!(response.trailers.get("x-extra"), Some("yes"));
    assert_eq!(
        response.into_result().unwrap().payload.unwrap().body.len(),
        128
    );
}

#[tokio::test]
async fn test_unary_trailers_only() {
    let transport = MockTransport::unary(|_request| {
        Ok(HttpResponse::ok(
            Metadata::new(),
            Some(frame(0x80, b"grpc-status: 12\r\n")),
        ))
    });

    let response = client(transport)
        .unary::<SimpleRequest, SimpleResponse>(
            "grpc.testing.TestService/UnimplementedCall",
            &SimpleRequest::default(),
        )
        .await;

    assert_eq!(response.code, Code::Unimplemented);
    assert!(response.message.is_none());
}

#[tokio::test]
async fn test_stream_trailers_only() {
    let transport = MockTransport::stream(|_request| {
        let (conn, _sent, events) = stream_conn();
        let _ = events.send(StreamEvent::Headers(Metadata::new()));
        let _ = events.send(StreamEvent::Message(frame(0x80, b"grpc-status: 12\r\n")));
        Ok(conn)
    });

    let stream = client(transport)
        .stream::<SimpleRequest, SimpleResponse>("grpc.testing.TestService/UnimplementedCall")
        .unwrap();

    let events: Vec<_> = stream.results().collect().await;
    assert_eq!(events.len(), 2, "no message events expected");
    assert!(matches!(events[0], StreamEvent::Headers(_)));
    match &events[1] {
        StreamEvent::Complete { code, .. } => assert_eq!(*code, Code::Unimplemented),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_messages_then_trailer_frame() {
    let transport = MockTransport::stream(|_request| {
        let (conn, mut sent, events) = stream_conn();
        tokio::spawn(async move {
            let first = sent.recv().await.unwrap();
            let parsed = SimpleRequest::decode(&first[5..]).unwrap();

            let _ = events.send(StreamEvent::Headers(Metadata::new()));
            let reply = SimpleResponse {
                payload: Some(zeros(parsed.response_size as usize)),
            };
            let _ = events.send(StreamEvent::Message(frame(0x00, &reply.encode_to_vec())));
            let _ = events.send(StreamEvent::Message(frame(
                0x80,
                b"grpc-status: 0\r\nx-done: true\r\n",
            )));
        });
        Ok(conn)
    });

    let stream = client(transport)
        .stream::<SimpleRequest, SimpleResponse>("grpc.testing.TestService/StreamingOutputCall")
        .unwrap();
    stream
        .send(&SimpleRequest {
            response_size: 32,
            payload: None,
        })
        .close_send();

    let events: Vec<_> = stream.results().collect().await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::Headers(_)));
    assert!(matches!(
        &events[1],
        StreamEvent::Message(msg) if msg.payload.as_ref().unwrap().body.len() == 32
    ));
    match &events[2] {
        StreamEvent::Complete {
            code,
            error,
            trailers,
        } => {
            assert_eq!(*code, Code::Ok);
            assert!(error.is_none());
            assert_eq!(trailers.as_ref().unwrap().get("x-done"), Some("true"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_decode_failure_terminates_and_discards() {
    let transport = MockTransport::stream(|_request| {
        let (conn, _sent, events) = stream_conn();
        // A frame whose header claims more payload than arrives.
        let _ = events.send(StreamEvent::Message(Bytes::from_static(&[
            0x00, 0x00, 0x00, 0x00, 0x20, 0x01,
        ])));
        // A healthy frame afterwards, which must be discarded.
        let _ = events.send(StreamEvent::Message(frame(
            0x00,
            &SimpleResponse::default().encode_to_vec(),
        )));
        Ok(conn)
    });

    let stream = client(transport)
        .stream::<SimpleRequest, SimpleResponse>("grpc.testing.TestService/StreamingOutputCall")
        .unwrap();

    let events: Vec<_> = stream.results().collect().await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Complete { code, error, .. } => {
            assert_eq!(*code, Code::Unknown);
            assert!(error.is_some());
        }
        other => panic!("unexpected event {other:?}"),
    }
}
