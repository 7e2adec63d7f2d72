//! HTTP 入口
//!
//! 把一个请求交给中间件管道并返回响应。入口本身永远不返回错误：
//! 错误处理单元之外残留的错误（例如配置中没有 `error_handler`）会变成一个纯文本 500。

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use keel_core::{EventDispatcher, Registry};

use crate::events::{self, RequestReceived, ResponseReady};
use crate::http::{Request, Response};
use crate::pipeline::Pipeline;

/// Web 入口
pub struct WebEntrypoint {
    pipeline: Arc<Pipeline>,
    events: Option<Arc<EventDispatcher>>,
}

impl WebEntrypoint {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            events: None,
        }
    }

    /// 从注册表获取管道与事件分发器
    pub fn from_registry(registry: &Arc<Registry>) -> anyhow::Result<Self> {
        let pipeline = registry.resolve_type::<Pipeline>()?;
        Ok(Self {
            pipeline,
            events: events::lookup(registry),
        })
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// 处理一个请求
    pub fn handle(&self, request: Request) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_string();

        events::emit(
            &self.events,
            &RequestReceived {
                method: method.clone(),
                path: path.clone(),
            },
        );

        let response = match self.pipeline.handle(request) {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(method = %method, path = %path, "Unhandled error escaped the pipeline: {:#}", error);
                Response::text(
                    StatusCode::INTERNAL_SERVER_ERROR
                        .canonical_reason()
                        .unwrap_or("Internal Server Error"),
                )
                .with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

        let elapsed_ms = started.elapsed().as_millis();
        tracing::debug!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms,
            "Request handled"
        );

        events::emit(
            &self.events,
            &ResponseReady {
                method,
                path,
                status: response.status(),
                elapsed_ms,
            },
        );

        response
    }
}

impl std::fmt::Debug for WebEntrypoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebEntrypoint")
            .field("pipeline", &self.pipeline)
            .field("events", &self.events.is_some())
            .finish()
    }
}
