//! 请求生命周期事件
//!
//! 事件是拥有数据的轻量结构，监听器在请求线程上同步执行。

use std::any::Any;
use std::sync::Arc;

use http::{Method, StatusCode};
use keel_core::{Event, EventDispatcher, Registry};

macro_rules! impl_event {
    ($ty:ty, $name:literal) => {
        impl Event for $ty {
            fn event_name(&self) -> &'static str {
                $name
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// 入口收到请求
#[derive(Debug, Clone)]
pub struct RequestReceived {
    pub method: Method,
    pub path: String,
}

impl_event!(RequestReceived, "RequestReceived");

/// 路由匹配成功
#[derive(Debug, Clone)]
pub struct RouteMatched {
    pub method: Method,
    pub path: String,
    pub target: String,
    pub params: Vec<(String, String)>,
}

impl_event!(RouteMatched, "RouteMatched");

/// 即将调用分发目标
#[derive(Debug, Clone)]
pub struct ControllerExecuting {
    pub target: String,
}

impl_event!(ControllerExecuting, "ControllerExecuting");

/// 分发目标调用完成
#[derive(Debug, Clone)]
pub struct ControllerExecuted {
    pub target: String,
    pub status: StatusCode,
}

impl_event!(ControllerExecuted, "ControllerExecuted");

/// 响应即将返回给客户端
#[derive(Debug, Clone)]
pub struct ResponseReady {
    pub method: Method,
    pub path: String,
    pub status: StatusCode,
    pub elapsed_ms: u128,
}

impl_event!(ResponseReady, "ResponseReady");

/// 注册表中的事件分发器（未注册时返回 `None`）
pub(crate) fn lookup(registry: &Arc<Registry>) -> Option<Arc<EventDispatcher>> {
    if !registry.has_type::<EventDispatcher>() {
        return None;
    }
    registry.resolve_type::<EventDispatcher>().ok()
}

/// 可选的事件分发
pub(crate) fn emit(events: &Option<Arc<EventDispatcher>>, event: &dyn Event) {
    if let Some(events) = events {
        events.dispatch(event);
    }
}
