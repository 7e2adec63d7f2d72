//! Web 服务器模块
//!
//! 基于 Axum 的服务器适配：所有请求都进入一个 fallback 处理器，
//! 转换为 keel 请求后在阻塞线程池上运行同步管道。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::Router;
use http::StatusCode;
use keel_core::{Environment, Registry};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::constants::{SERVER_BODY_LIMIT, SERVER_HOST, SERVER_PORT};
use crate::entrypoint::WebEntrypoint;
use crate::http::{Request, Response};

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 请求体大小上限（字节）
    pub body_limit: usize,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            host: env.get_string_or(SERVER_HOST, &defaults.host),
            port: env
                .get_i64(SERVER_PORT)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(defaults.port),
            body_limit: env
                .get_i64(SERVER_BODY_LIMIT)
                .and_then(|limit| usize::try_from(limit).ok())
                .unwrap_or(defaults.body_limit),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
struct ServerState {
    entrypoint: Arc<WebEntrypoint>,
    body_limit: usize,
    _registry: Option<Arc<Registry>>,
}

/// Keel Web 服务器
///
/// 分发单元只持有注册表的弱引用，使用 [`KeelServer::new`] 时调用方需要让注册表活得比服务器久；
/// [`KeelServer::from_registry`] 会自己持有注册表。
pub struct KeelServer {
    properties: ServerProperties,
    entrypoint: Arc<WebEntrypoint>,
    registry: Option<Arc<Registry>>,
}

impl KeelServer {
    pub fn new(entrypoint: Arc<WebEntrypoint>, properties: ServerProperties) -> Self {
        Self {
            properties,
            entrypoint,
            registry: None,
        }
    }

    /// 从注册表获取入口与配置
    pub fn from_registry(registry: &Arc<Registry>) -> anyhow::Result<Self> {
        let entrypoint = registry.resolve_type::<WebEntrypoint>()?;
        let properties = registry
            .resolve_type::<Environment>()
            .map(|env| ServerProperties::from_environment(&env))
            .unwrap_or_default();
        Ok(Self {
            registry: Some(Arc::clone(registry)),
            ..Self::new(entrypoint, properties)
        })
    }

    /// 覆盖请求体大小上限
    pub fn body_limit(mut self, limit: usize) -> Self {
        self.properties.body_limit = limit;
        self
    }

    /// 覆盖监听地址
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.properties.host = host.into();
        self.properties.port = port;
        self
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.properties
    }

    /// 所有路径都交给入口处理的 axum 路由
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(serve_request)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(ServerState {
                entrypoint: Arc::clone(&self.entrypoint),
                body_limit: self.properties.body_limit,
                _registry: self.registry.clone(),
            })
    }

    /// 启动服务器，收到 Ctrl-C 后退出
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.properties.address();
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!("Starting Keel web server on {}", addr);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

        tracing::info!("Server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        tracing::info!("Web server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn serve_request(State(state): State<ServerState>, request: axum::extract::Request) -> axum::response::Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("Rejected request body: {}", e);
            return plain(StatusCode::PAYLOAD_TOO_LARGE);
        }
    };

    let mut request = Request::new(parts.method, parts.uri)
        .with_headers(parts.headers)
        .with_body(body);
    if let Some(addr) = remote_addr {
        request = request.with_remote_addr(addr);
    }

    let entrypoint = Arc::clone(&state.entrypoint);
    match tokio::task::spawn_blocking(move || entrypoint.handle(request)).await {
        Ok(response) => into_axum(response),
        Err(e) => {
            tracing::error!("Request task failed: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn into_axum(response: Response) -> axum::response::Response {
    let (status, headers, body) = response.into_parts();
    let mut converted = axum::response::Response::new(Body::from(body));
    *converted.status_mut() = status;
    *converted.headers_mut() = headers;
    converted
}

fn plain(status: StatusCode) -> axum::response::Response {
    into_axum(Response::text(status.canonical_reason().unwrap_or("Error")).with_status(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::MapPropertySource;

    #[test]
    fn test_properties_from_environment() {
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(SERVER_HOST, "127.0.0.1")
                .with_property(SERVER_PORT, 3000i64)
                .with_property(SERVER_BODY_LIMIT, 1024i64),
        );
        let properties = ServerProperties::from_environment(&env);

        assert_eq!(properties.address(), "127.0.0.1:3000");
        assert_eq!(properties.body_limit, 1024);
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let env = Environment::new()
            .with_source(MapPropertySource::new("test").with_property(SERVER_PORT, 70000i64));
        assert_eq!(ServerProperties::from_environment(&env).port, 8080);
    }
}
