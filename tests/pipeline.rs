//! In-process tests of the composed request pipeline.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use ping_service::http::access_log::CLIENT_CLOSED_REQUEST;
use ping_service::http::{PipelineError, PipelineOptions};
use ping_service::observability::{Diagnostic, RecordingSink};

mod common;

fn request(method: Method, uri: &str) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", "pipeline-test")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 10], 40000))));
    request
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn ping_returns_pong() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    let response = pipeline.handle(request(Method::GET, "/service/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"data":"PONG"}"#);

    let records = sink.access_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 200);
    assert_eq!(records[0].method, "GET");
    assert_eq!(records[0].path, "/service/ping");
    assert_eq!(records[0].client_ip, "192.0.2.10");
    assert_eq!(records[0].user_agent, "pipeline-test");
    assert!(sink.diagnostics().is_empty());
}

#[tokio::test]
async fn trailing_slash_is_normalized() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink);

    let response = pipeline.handle(request(Method::GET, "/service/ping/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"data":"PONG"}"#);
}

#[tokio::test]
async fn repeated_slashes_are_collapsed() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink);

    for uri in ["/service//ping", "//service/ping", "/service//ping//"] {
        let response = pipeline.handle(request(Method::GET, uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(body_string(response).await, r#"{"data":"PONG"}"#);
    }
}

#[tokio::test]
async fn large_bodies_do_not_change_routing_outcomes() {
    let sink = Arc::new(RecordingSink::new());
    let options = PipelineOptions {
        max_body_bytes: 16,
        ..PipelineOptions::default()
    };
    let pipeline = common::pipeline_with(sink.clone(), options);
    let large = "x".repeat(4096);

    let mut ping = request(Method::GET, "/service/ping");
    *ping.body_mut() = Body::from(large.clone());
    let response = pipeline.handle(ping).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"data":"PONG"}"#);

    let mut missing = request(Method::POST, "/nope");
    *missing.body_mut() = Body::from(large);
    let response = pipeline.handle(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, r#"{"status":"not found"}"#);

    let statuses: Vec<u16> = sink.access_records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![200, 404]);
}

#[tokio::test]
async fn panic_dump_truncates_large_bodies() {
    let sink = Arc::new(RecordingSink::new());
    let options = PipelineOptions {
        max_body_bytes: 16,
        ..PipelineOptions::default()
    };
    let pipeline = common::pipeline_with(sink.clone(), options);

    let mut panicking = request(Method::POST, "/panic");
    *panicking.body_mut() = Body::from("a".repeat(64));
    let response = pipeline.handle(panicking).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    match &sink.diagnostics()[2] {
        Diagnostic::RawRequest(raw) => {
            let expected = format!("\r\n\r\n{}\r\n[body truncated at 16 bytes]", "a".repeat(16));
            assert!(raw.ends_with(&expected), "{raw}");
        }
        other => panic!("unexpected diagnostic: {other:?}"),
    }
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH, Method::HEAD] {
        let response = pipeline
            .handle(request(method.clone(), "/service/ping"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{method}");
        if method != Method::HEAD {
            assert_eq!(body_string(response).await, r#"{"status":"method not allowed"}"#);
        }
    }

    let records = sink.access_records();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.status == 405));
    assert!(sink.diagnostics().is_empty());
}

#[tokio::test]
async fn unknown_paths_are_not_found() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    for uri in ["/", "/service", "/service/pong", "/service/ping/extra", "/ping?x=1"] {
        let response = pipeline.handle(request(Method::GET, uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body_string(response).await, r#"{"status":"not found"}"#);
    }

    let records = sink.access_records();
    assert_eq!(records.len(), 5);
    assert_eq!(records[4].path, "/ping");
    assert_eq!(records[4].query, "x=1");
}

#[tokio::test]
async fn internal_panic_becomes_500_with_three_diagnostics() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    let mut panicking = request(Method::POST, "/panic");
    *panicking.body_mut() = Body::from("payload=1");
    let response = pipeline.handle(panicking).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "{}");

    let diagnostics = sink.diagnostics();
    assert_eq!(diagnostics.len(), 3);
    assert_eq!(diagnostics[0], Diagnostic::Panic("handler exploded".into()));
    assert!(matches!(&diagnostics[1], Diagnostic::Stack(stack) if !stack.is_empty()));
    match &diagnostics[2] {
        Diagnostic::RawRequest(raw) => {
            assert!(raw.starts_with("POST /panic HTTP/1.1\r\n"));
            assert!(raw.contains("user-agent: pipeline-test\r\n"));
            assert!(raw.ends_with("\r\n\r\npayload=1"));
        }
        other => panic!("unexpected diagnostic: {other:?}"),
    }

    let records = sink.access_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, 500);
    assert_eq!(records[0].errors, "");
}

#[tokio::test]
async fn broken_pipe_aborts_with_one_diagnostic() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    let result = pipeline.handle(request(Method::GET, "/broken-pipe")).await;
    assert!(matches!(result, Err(PipelineError::ConnectionAborted(_))));

    let diagnostics = sink.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    match &diagnostics[0] {
        Diagnostic::BrokenConnection { path, error, request } => {
            assert_eq!(path, "/broken-pipe");
            assert!(error.contains("broken pipe"));
            assert!(request.starts_with("GET /broken-pipe HTTP/1.1\r\n"));
        }
        other => panic!("unexpected diagnostic: {other:?}"),
    }

    let records = sink.access_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, CLIENT_CLOSED_REQUEST);
    assert!(records[0].errors.contains("broken pipe"));
}

#[tokio::test]
async fn repeated_pings_do_not_leak_state() {
    let sink = Arc::new(RecordingSink::new());
    let pipeline = common::pipeline(sink.clone());

    // A failed request first, so leaked errors would show up below.
    let _ = pipeline.handle(request(Method::GET, "/broken-pipe")).await;

    let mut bodies = HashSet::new();
    for _ in 0..10 {
        let response = pipeline.handle(request(Method::GET, "/service/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        bodies.insert(body_string(response).await);
    }
    assert_eq!(bodies.len(), 1);

    let records = sink.access_records();
    assert_eq!(records.len(), 11);
    assert!(records[1..].iter().all(|r| r.status == 200 && r.errors.is_empty()));
}
