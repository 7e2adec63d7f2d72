//! 路由中间件
//!
//! 每个请求调用一次路由器，把匹配结果存入 `_route_match` 属性；匹配成功时每个路径参数
//! 也以同名属性保存。方法不允许时不在这里短路，交给分发器统一转换为 HTTP 错误。

use std::sync::Arc;

use keel_core::{EventDispatcher, Value};

use crate::constants::ROUTE_MATCH_ATTRIBUTE;
use crate::events::{self, RouteMatched};
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};
use crate::router::{MatchResult, SharedRouter};

pub struct RoutingMiddleware {
    router: SharedRouter,
    events: Option<Arc<EventDispatcher>>,
}

impl RoutingMiddleware {
    pub fn new(router: SharedRouter) -> Self {
        Self {
            router,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }
}

impl Middleware for RoutingMiddleware {
    fn name(&self) -> &str {
        "routing"
    }

    fn process(&self, mut request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        let result = self.router.match_route(request.method(), request.path());

        match &result {
            MatchResult::Found { target, params } => {
                tracing::debug!(
                    method = %request.method(),
                    path = request.path(),
                    target = %target,
                    "Route matched"
                );
                for (name, value) in params.iter() {
                    request.set_attribute(name, Value::of(value.to_string()));
                }
                events::emit(
                    &self.events,
                    &RouteMatched {
                        method: request.method().clone(),
                        path: request.path().to_string(),
                        target: target.to_string(),
                        params: params
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    },
                );
            }
            MatchResult::NotFound => {
                tracing::debug!(method = %request.method(), path = request.path(), "No route matched");
            }
            MatchResult::MethodNotAllowed { allowed } => {
                tracing::debug!(
                    method = %request.method(),
                    path = request.path(),
                    allowed = ?allowed,
                    "Route matched with a different method"
                );
            }
        }

        request.set_attribute(ROUTE_MATCH_ATTRIBUTE, Value::of(result));
        next.run(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{middleware_fn, Pipeline};
    use crate::router::RouteTable;

    fn pipeline() -> Pipeline {
        let mut table = RouteTable::new();
        table.get("/users/{id}", "UsersController@show").unwrap();

        Pipeline::new()
            .with(RoutingMiddleware::new(Arc::new(table)))
            .with(middleware_fn("inspect", |request: Request, _next| {
                let result = request
                    .attribute_as::<MatchResult>(ROUTE_MATCH_ATTRIBUTE)
                    .expect("match result attribute");
                let id = request
                    .attribute_as::<String>("id")
                    .map(|id| id.to_string())
                    .unwrap_or_default();
                let label = match &*result {
                    MatchResult::Found { .. } => format!("found:{}", id),
                    MatchResult::NotFound => "not-found".to_string(),
                    MatchResult::MethodNotAllowed { .. } => "not-allowed".to_string(),
                };
                Ok(Response::text(label))
            }))
    }

    #[test]
    fn test_found_sets_param_attributes() {
        let response = pipeline().handle(Request::get("/users/7")).unwrap();
        assert_eq!(response.body_text(), "found:7");
    }

    #[test]
    fn test_not_found_continues() {
        let response = pipeline().handle(Request::get("/nope")).unwrap();
        assert_eq!(response.body_text(), "not-found");
    }

    #[test]
    fn test_method_not_allowed_does_not_short_circuit() {
        let response = pipeline()
            .handle(Request::build(http::Method::PATCH, "/users/7"))
            .unwrap();
        assert_eq!(response.body_text(), "not-allowed");
    }
}
