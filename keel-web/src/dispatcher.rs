//! 分发中间件 - 管道的最后一个单元
//!
//! 读取路由中间件写入的匹配结果：未匹配返回 404，方法不允许返回 405，匹配成功时解析
//! 目标参数并调用。路由参数只参与 action 的参数解析，构造控制器时从不使用，
//! 这样控制器在请求之外（例如命令行）也能复用。

use std::sync::{Arc, Weak};

use keel_core::{
    EventDispatcher, Instance, Key, ParameterDescriptor, Registry, ResolutionContext,
    ResolveError, Resolver, ScopeTier, Signature, Value,
};

use crate::constants::ROUTE_MATCH_ATTRIBUTE;
use crate::controller::{ControllerCatalog, ControllerDefinition};
use crate::error::HttpFailure;
use crate::events::{self, ControllerExecuted, ControllerExecuting};
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};
use crate::reply::Reply;
use crate::router::{ActionRef, Handler, MatchResult, RouteParams, Target};

/// 请求作用域的解析层级
///
/// 名为 `request` 或类型为 [`Request`] 的参数总是得到当前请求；路由参数按名称匹配，
/// 并转换为参数声明的内置类型。
pub struct RequestScope<'a> {
    request: &'a Arc<Request>,
    params: &'a RouteParams,
    target: &'a str,
}

impl<'a> RequestScope<'a> {
    pub fn new(request: &'a Arc<Request>, params: &'a RouteParams, target: &'a str) -> Self {
        Self {
            request,
            params,
            target,
        }
    }
}

impl ScopeTier for RequestScope<'_> {
    fn authoritative(&self, parameter: &ParameterDescriptor) -> Result<Option<Value>, ResolveError> {
        if parameter.name() == "request" || parameter.is::<Request>() {
            let request: Instance = Arc::clone(self.request) as Instance;
            return Ok(Some(Value::Instance(request)));
        }
        Ok(None)
    }

    fn scoped(&self, parameter: &ParameterDescriptor) -> Result<Option<Value>, ResolveError> {
        let Some(raw) = self.params.get(parameter.name()) else {
            return Ok(None);
        };

        match Value::parse_as(raw, parameter.type_key()) {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(())) => Err(ResolveError::Coercion {
                parameter: parameter.name().to_string(),
                type_name: parameter.type_name(),
                value: raw.to_string(),
                target: self.target.to_string(),
            }),
            // 非内置类型不从路由参数取值
            None => Ok(None),
        }
    }
}

/// 分发单元
///
/// 管道通常作为共享实例缓存在注册表中，这里只持有注册表的弱引用，每次分发时升级。
pub struct DispatcherMiddleware {
    registry: Weak<Registry>,
    catalog: Arc<ControllerCatalog>,
    events: Option<Arc<EventDispatcher>>,
}

impl DispatcherMiddleware {
    pub fn new(registry: &Arc<Registry>, catalog: Arc<ControllerCatalog>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            catalog,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn catalog(&self) -> &Arc<ControllerCatalog> {
        &self.catalog
    }

    fn resolver(&self) -> anyhow::Result<Resolver> {
        self.registry
            .upgrade()
            .map(Resolver::new)
            .ok_or_else(|| anyhow::anyhow!("Registry has been dropped"))
    }

    /// 按匹配结果分发请求
    ///
    /// # Errors
    ///
    /// 总是返回 [`HttpFailure`]：调用过程中出现的其他错误被包装为 500 并保留原因。
    pub fn dispatch(&self, request: Request, result: &MatchResult) -> anyhow::Result<Response> {
        match result {
            MatchResult::NotFound => Err(HttpFailure::not_found().into()),
            MatchResult::MethodNotAllowed { allowed } => {
                let allow = allowed
                    .iter()
                    .map(|method| method.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(HttpFailure::method_not_allowed()
                    .with_header("Allow", allow)
                    .into())
            }
            MatchResult::Found { target, params } => {
                let name = target.to_string();
                events::emit(&self.events, &ControllerExecuting { target: name.clone() });

                let response = self
                    .resolver()
                    .and_then(|resolver| self.invoke(&resolver, target, params, Arc::new(request)))
                    .map(Reply::into_response)
                    .map_err(|error| match error.downcast::<HttpFailure>() {
                        Ok(failure) => failure,
                        Err(error) => {
                            tracing::debug!(target = %name, error = %error, "Dispatch failed");
                            HttpFailure::wrap(error)
                        }
                    })?;

                events::emit(
                    &self.events,
                    &ControllerExecuted {
                        target: name,
                        status: response.status(),
                    },
                );
                Ok(response)
            }
        }
    }

    fn invoke(
        &self,
        resolver: &Resolver,
        target: &Target,
        params: &RouteParams,
        request: Arc<Request>,
    ) -> anyhow::Result<Reply> {
        match target {
            Target::Handler(handler) => invoke_handler(resolver, handler, params, &request),
            Target::Action(action) => self.invoke_action(resolver, action, params, &request),
        }
    }

    fn invoke_action(
        &self,
        resolver: &Resolver,
        action: &ActionRef,
        params: &RouteParams,
        request: &Arc<Request>,
    ) -> anyhow::Result<Reply> {
        let qualified = self.catalog.qualify(action.controller());
        let definition = self
            .catalog
            .get(&qualified)
            .ok_or_else(|| HttpFailure::internal(format!("Controller {} not found", qualified)))?;

        let controller = instantiate(resolver, &qualified, &definition)?;

        let method = definition.action(action.method()).ok_or_else(|| {
            HttpFailure::internal(format!(
                "Method {} not found in {}",
                action.method(),
                qualified
            ))
        })?;

        let arguments = resolve_action_arguments(resolver, method.signature(), params, request)?;
        method.call(&controller, &arguments)
    }
}

fn invoke_handler(
    resolver: &Resolver,
    handler: &Handler,
    params: &RouteParams,
    request: &Arc<Request>,
) -> anyhow::Result<Reply> {
    let arguments = resolve_action_arguments(resolver, handler.signature(), params, request)?;
    handler.call(&arguments)
}

/// 获取或构造控制器实例 - 注册表优先，构造参数不使用路由参数
fn instantiate(
    resolver: &Resolver,
    qualified: &str,
    definition: &ControllerDefinition,
) -> anyhow::Result<Instance> {
    let registry = resolver.registry();
    let key = Key::name(qualified);
    if registry.has(&key) {
        tracing::trace!(controller = qualified, "Controller resolved from registry");
        return Ok(registry.resolve(key)?);
    }
    let arguments = resolver.resolve(definition.constructor(), &ResolutionContext::new())?;
    definition.construct(&arguments)
}

fn resolve_action_arguments(
    resolver: &Resolver,
    signature: &Signature,
    params: &RouteParams,
    request: &Arc<Request>,
) -> Result<keel_core::Arguments, ResolveError> {
    let scope = RequestScope::new(request, params, signature.target());
    resolver.resolve_scoped(signature, &ResolutionContext::new(), &scope)
}

impl Middleware for DispatcherMiddleware {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn process(&self, request: Request, _next: Next<'_>) -> anyhow::Result<Response> {
        let result = match request.attribute_as::<MatchResult>(ROUTE_MATCH_ATTRIBUTE) {
            Some(result) => result,
            None => {
                tracing::debug!(path = request.path(), "No route match attribute on request");
                return Err(HttpFailure::not_found().into());
            }
        };
        self.dispatch(request, &result)
    }
}
