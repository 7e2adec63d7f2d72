//! axum 适配层：请求在阻塞线程池上经过完整管道

use std::sync::Arc;

use axum::body::Body;
use keel_core::{ParameterDescriptor, Registry};
use keel_web::prelude::*;
use keel_web::Pipeline;
use tower::ServiceExt;

fn server(body_limit: usize) -> KeelServer {
    let registry = Registry::new();
    let mut routes = RouteTable::new();
    routes
        .get(
            "/hello/{name}",
            Handler::new([ParameterDescriptor::new("name").of::<String>()], |args| {
                Ok(format!("hello {}", args.get::<String>("name")?))
            }),
        )
        .unwrap();
    routes
        .post(
            "/echo",
            Handler::new([ParameterDescriptor::new("request").of::<Request>()], |args| {
                let request = args.get::<Request>("request")?;
                Ok(String::from_utf8_lossy(request.body()).into_owned())
            }),
        )
        .unwrap();

    keel_core::ModuleList::new()
        .with(HttpModule::new(routes))
        .bootstrap(&registry)
        .unwrap();

    KeelServer::from_registry(&registry)
        .unwrap()
        .body_limit(body_limit)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn serves_routes_through_pipeline() {
    let response = server(1024)
        .router()
        .oneshot(
            axum::http::Request::builder()
                .uri("/hello/axum")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "hello axum");
}

#[tokio::test]
async fn passes_request_body() {
    let response = server(1024)
        .router()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/echo")
                .body(Body::from("ping"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(body_text(response).await, "ping");
}

#[tokio::test]
async fn failures_keep_status_and_headers() {
    let response = server(1024)
        .router()
        .oneshot(
            axum::http::Request::builder()
                .uri("/nowhere")
                .header("accept", "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("application/json"));
}

#[tokio::test]
async fn rejects_oversized_body() {
    let response = server(4)
        .router()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri("/echo")
                .body(Body::from("too large"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[test]
fn entrypoint_pipeline_is_shared_with_registry() {
    let registry = Registry::new();
    keel_core::ModuleList::new()
        .with(HttpModule::new(RouteTable::new()))
        .bootstrap(&registry)
        .unwrap();

    let entrypoint = registry.resolve_type::<WebEntrypoint>().unwrap();
    let pipeline = registry.resolve_type::<Pipeline>().unwrap();
    assert!(Arc::ptr_eq(entrypoint.pipeline(), &pipeline));
}
