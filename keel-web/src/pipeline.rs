//! 中间件管道 - 责任链
//!
//! 执行顺序等于注册顺序，每个单元包裹其后的所有单元。单元可以：
//! - 调用 `next.run(request)` 并原样或修改后返回响应
//! - 不调用 `next` 直接返回响应（短路）
//! - 返回错误，中断整条链，只有最外层的错误处理单元会捕获它
//!
//! 管道在启动时构建一次，之后在所有请求间只读共享。

use std::fmt;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::http::{Request, Response};

/// 管道单元
pub trait Middleware: Send + Sync {
    /// 单元名称（用于日志）
    fn name(&self) -> &str {
        keel_core::utils::naming::short_type_name(std::any::type_name::<Self>())
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response>;
}

/// 后续单元的续体
pub struct Next<'a> {
    units: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// 调用下一个单元；链条耗尽时返回 [`PipelineError::Exhausted`]
    pub fn run(self, request: Request) -> anyhow::Result<Response> {
        match self.units.split_first() {
            Some((unit, rest)) => {
                tracing::trace!(unit = unit.name(), "Entering middleware");
                unit.process(request, Next { units: rest })
            }
            None => {
                tracing::debug!(path = request.path(), "Middleware chain exhausted without a response");
                Err(PipelineError::Exhausted.into())
            }
        }
    }
}

/// 中间件管道
#[derive(Clone, Default)]
pub struct Pipeline {
    units: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加单元（不去重、不重排）
    pub fn pipe(&mut self, unit: Arc<dyn Middleware>) {
        tracing::debug!("Piping middleware: {}", unit.name());
        self.units.push(unit);
    }

    pub fn with(mut self, unit: impl Middleware + 'static) -> Self {
        self.pipe(Arc::new(unit));
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.units.iter().map(|unit| unit.name()).collect()
    }

    /// 处理请求
    pub fn handle(&self, request: Request) -> anyhow::Result<Response> {
        Next { units: &self.units }.run(request)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("units", &self.names()).finish()
    }
}

/// 闭包中间件
pub struct FnMiddleware<F> {
    name: String,
    handler: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(Request, Next<'_>) -> anyhow::Result<Response> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next<'_>) -> anyhow::Result<Response> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        (self.handler)(request, next)
    }
}

/// 用闭包创建中间件
pub fn middleware_fn<F>(name: impl Into<String>, handler: F) -> FnMiddleware<F>
where
    F: Fn(Request, Next<'_>) -> anyhow::Result<Response> + Send + Sync,
{
    FnMiddleware::new(name, handler)
}
