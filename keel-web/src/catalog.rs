//! 中间件目录
//!
//! 标识到单元定义的映射。管道由有序的标识列表构建（配置键 `http.middleware`），
//! 不重新排序也不去重。每个单元的构造参数通过参数解析器从注册表注入。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keel_core::{
    Arguments, Environment, EventDispatcher, Key, ParameterDescriptor, Registry,
    ResolutionContext, Resolver, Signature, APP_DEBUG_KEY,
};

use crate::auth::{AuthConfig, AuthMiddleware, JwtDecoder, TokenDecoder};
use crate::client_ip::{ClientIpMiddleware, ProxyConfig};
use crate::constants::{DEFAULT_MIDDLEWARE, HTTP_MIDDLEWARE};
use crate::controller::ControllerCatalog;
use crate::cors::{CorsConfig, CorsMiddleware};
use crate::dispatcher::DispatcherMiddleware;
use crate::error::PipelineError;
use crate::error_handler::{ErrorHandlerMiddleware, FailureLogger};
use crate::pipeline::{Middleware, Pipeline};
use crate::router::SharedRouter;
use crate::routing::RoutingMiddleware;
use crate::session::{MemorySessionStore, SessionCookie, SessionMiddleware, SessionStore};
use crate::view::ViewRenderer;

/// 注册表中保存的中间件类型
pub type SharedMiddleware = Arc<dyn Middleware>;

type ConstructFn = dyn Fn(&Arguments) -> anyhow::Result<SharedMiddleware> + Send + Sync;

/// 单元定义 - 构造函数签名与构造闭包
pub struct UnitDefinition {
    signature: Signature,
    construct: Box<ConstructFn>,
}

impl UnitDefinition {
    pub fn new<P, F, M>(id: &str, parameters: P, construct: F) -> Self
    where
        P: IntoIterator<Item = ParameterDescriptor>,
        F: Fn(&Arguments) -> anyhow::Result<M> + Send + Sync + 'static,
        M: Middleware + 'static,
    {
        Self {
            signature: Signature::new(format!("middleware '{}'", id)).params(parameters),
            construct: Box::new(move |args| {
                construct(args).map(|unit| Arc::new(unit) as SharedMiddleware)
            }),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// 中间件目录
#[derive(Default)]
pub struct MiddlewareCatalog {
    units: HashMap<String, UnitDefinition>,
}

impl MiddlewareCatalog {
    /// 空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含内置单元的目录
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog
            .register("error_handler", error_handler_unit())
            .register("session", session_unit())
            .register("routing", routing_unit())
            .register("dispatcher", dispatcher_unit())
            .register("auth", auth_unit())
            .register("cors", cors_unit())
            .register("client_ip", client_ip_unit());
        catalog
    }

    /// 注册单元，同一标识的最后一次注册生效
    pub fn register(&mut self, id: impl Into<String>, definition: UnitDefinition) -> &mut Self {
        let id = id.into();
        tracing::trace!(middleware = %id, "Middleware registered");
        self.units.insert(id, definition);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.units.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// 构造单个单元
    ///
    /// 目录中没有该标识时，查找注册表中同名的 [`SharedMiddleware`]。
    pub fn instantiate(&self, id: &str, registry: &Arc<Registry>) -> anyhow::Result<SharedMiddleware> {
        if let Some(definition) = self.units.get(id) {
            let arguments = Resolver::new(Arc::clone(registry))
                .resolve(&definition.signature, &ResolutionContext::new())?;
            return (definition.construct)(&arguments);
        }

        if registry.has(Key::name(id)) {
            let unit = registry.resolve_as::<SharedMiddleware>(Key::name(id))?;
            return Ok(Arc::clone(&*unit));
        }

        Err(PipelineError::UnknownMiddleware(id.to_string()).into())
    }

    /// 按给定顺序构建管道
    pub fn build<S: AsRef<str>>(&self, ids: &[S], registry: &Arc<Registry>) -> anyhow::Result<Pipeline> {
        let mut pipeline = Pipeline::new();
        for id in ids {
            pipeline.pipe(self.instantiate(id.as_ref(), registry)?);
        }
        tracing::debug!(units = ?pipeline.names(), "Middleware pipeline built");
        Ok(pipeline)
    }

    /// 从 `http.middleware` 读取标识列表并构建管道
    pub fn build_configured(&self, registry: &Arc<Registry>) -> anyhow::Result<Pipeline> {
        let ids = configured_ids(registry);
        self.build(&ids, registry)
    }
}

impl fmt::Debug for MiddlewareCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareCatalog")
            .field("units", &self.ids())
            .finish()
    }
}

/// 配置的中间件标识列表，未配置时使用默认列表
pub fn configured_ids(registry: &Arc<Registry>) -> Vec<String> {
    registry
        .resolve_type::<Environment>()
        .ok()
        .map(|env| env.get_string_array_or(HTTP_MIDDLEWARE, DEFAULT_MIDDLEWARE))
        .unwrap_or_else(|| DEFAULT_MIDDLEWARE.iter().map(|id| id.to_string()).collect())
}

// ==================== 内置单元 ====================

fn config() -> ParameterDescriptor {
    ParameterDescriptor::new("config").of::<Environment>().nullable()
}

fn environment(args: &Arguments) -> anyhow::Result<Arc<Environment>> {
    Ok(args
        .optional::<Environment>("config")?
        .unwrap_or_else(|| Arc::new(Environment::new())))
}

fn events() -> ParameterDescriptor {
    ParameterDescriptor::new("events").of::<EventDispatcher>().nullable()
}

fn error_handler_unit() -> UnitDefinition {
    UnitDefinition::new(
        "error_handler",
        [
            config(),
            ParameterDescriptor::new("views")
                .of::<Arc<dyn ViewRenderer>>()
                .nullable(),
            ParameterDescriptor::new("failure_logger")
                .of::<Arc<dyn FailureLogger>>()
                .nullable(),
        ],
        |args| {
            let env = environment(args)?;
            let mut unit =
                ErrorHandlerMiddleware::new().with_debug(env.get_bool_or(APP_DEBUG_KEY, false));
            if let Some(views) = args.optional::<Arc<dyn ViewRenderer>>("views")? {
                unit = unit.with_views(Arc::clone(&*views));
            }
            if let Some(logger) = args.optional::<Arc<dyn FailureLogger>>("failure_logger")? {
                unit = unit.with_logger(Arc::clone(&*logger));
            }
            Ok(unit)
        },
    )
}

fn session_unit() -> UnitDefinition {
    UnitDefinition::new(
        "session",
        [
            config(),
            ParameterDescriptor::new("session_store")
                .of::<Arc<dyn SessionStore>>()
                .nullable(),
        ],
        |args| {
            let env = environment(args)?;
            let store: Arc<dyn SessionStore> =
                match args.optional::<Arc<dyn SessionStore>>("session_store")? {
                    Some(store) => Arc::clone(&*store),
                    None => Arc::new(MemorySessionStore::new()),
                };
            Ok(SessionMiddleware::new(store, SessionCookie::from_environment(&env)))
        },
    )
}

fn routing_unit() -> UnitDefinition {
    UnitDefinition::new(
        "routing",
        [ParameterDescriptor::new("router").of::<SharedRouter>(), events()],
        |args| {
            let router = args.cloned::<SharedRouter>("router")?;
            let mut unit = RoutingMiddleware::new(router);
            if let Some(events) = args.optional::<EventDispatcher>("events")? {
                unit = unit.with_events(events);
            }
            Ok(unit)
        },
    )
}

fn dispatcher_unit() -> UnitDefinition {
    UnitDefinition::new(
        "dispatcher",
        [
            ParameterDescriptor::new("registry").of::<Registry>(),
            ParameterDescriptor::new("controllers")
                .of::<ControllerCatalog>()
                .nullable(),
            events(),
        ],
        |args| {
            let registry = args.get::<Registry>("registry")?;
            let controllers = args
                .optional::<ControllerCatalog>("controllers")?
                .unwrap_or_else(|| Arc::new(ControllerCatalog::new()));
            let mut unit = DispatcherMiddleware::new(&registry, controllers);
            if let Some(events) = args.optional::<EventDispatcher>("events")? {
                unit = unit.with_events(events);
            }
            Ok(unit)
        },
    )
}

fn auth_unit() -> UnitDefinition {
    UnitDefinition::new(
        "auth",
        [
            config(),
            ParameterDescriptor::new("token_decoder")
                .of::<Arc<dyn TokenDecoder>>()
                .nullable(),
        ],
        |args| {
            let env = environment(args)?;
            let decoder: Arc<dyn TokenDecoder> =
                match args.optional::<Arc<dyn TokenDecoder>>("token_decoder")? {
                    Some(decoder) => Arc::clone(&*decoder),
                    None => Arc::new(JwtDecoder::from_environment(&env)?),
                };
            Ok(AuthMiddleware::new(decoder, AuthConfig::from_environment(&env)))
        },
    )
}

fn cors_unit() -> UnitDefinition {
    UnitDefinition::new("cors", [config()], |args| {
        let env = environment(args)?;
        Ok(CorsMiddleware::new(CorsConfig::from_environment(&env)))
    })
}

fn client_ip_unit() -> UnitDefinition {
    UnitDefinition::new("client_ip", [config()], |args| {
        let env = environment(args)?;
        Ok(ClientIpMiddleware::new(ProxyConfig::from_environment(&env)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use crate::pipeline::{middleware_fn, Next};
    use crate::router::RouteTable;
    use keel_core::MapPropertySource;

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        let router: SharedRouter = Arc::new(RouteTable::new());
        registry.register_instance(keel_core::TypeKey::of::<SharedRouter>(), router);
        registry
    }

    #[test]
    fn test_default_pipeline_order() {
        let pipeline = MiddlewareCatalog::with_defaults()
            .build_configured(&registry())
            .unwrap();
        assert_eq!(
            pipeline.names(),
            vec!["error_handler", "session", "routing", "dispatcher"]
        );
    }

    #[test]
    fn test_configured_order_is_kept_with_duplicates() {
        let registry = registry();
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property(HTTP_MIDDLEWARE, "routing, cors, cors, dispatcher"),
        );
        registry.register_instance(keel_core::TypeKey::of::<Environment>(), env);
        registry.alias("config", keel_core::TypeKey::of::<Environment>());

        let pipeline = MiddlewareCatalog::with_defaults()
            .build_configured(&registry)
            .unwrap();
        assert_eq!(pipeline.names(), vec!["routing", "cors", "cors", "dispatcher"]);
    }

    #[test]
    fn test_config_driven_units() {
        let registry = registry();
        let env = Environment::new().with_source(
            MapPropertySource::new("test")
                .with_property("cors.allowed_origins", "*")
                .with_property("proxies.trusted", "10.0.0.0/8"),
        );
        registry.register_instance(keel_core::TypeKey::of::<Environment>(), env);
        registry.alias("config", keel_core::TypeKey::of::<Environment>());

        let pipeline = MiddlewareCatalog::with_defaults()
            .build(&["client_ip", "cors"], &registry)
            .unwrap();
        assert_eq!(pipeline.names(), vec!["client_ip", "cors"]);
    }

    #[test]
    fn test_unknown_middleware() {
        let error = MiddlewareCatalog::new()
            .build(&["nope"], &registry())
            .unwrap_err();
        assert!(matches!(
            error.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnknownMiddleware(id)) if id == "nope"
        ));
    }

    #[test]
    fn test_registry_fallback() {
        let registry = registry();
        let unit: SharedMiddleware = Arc::new(middleware_fn(
            "custom",
            |_request: Request, _next: Next<'_>| Ok(Response::text("custom")),
        ));
        registry.register_instance("custom", unit);

        let pipeline = MiddlewareCatalog::new().build(&["custom"], &registry).unwrap();
        assert_eq!(pipeline.handle(Request::get("/")).unwrap().body_text(), "custom");
    }

    #[test]
    fn test_routing_requires_router() {
        let error = MiddlewareCatalog::with_defaults()
            .build(&["routing"], &Registry::new())
            .unwrap_err();
        assert!(error.to_string().contains("router"));
    }

    #[test]
    fn test_auth_requires_secret() {
        assert!(MiddlewareCatalog::with_defaults()
            .build(&["auth"], &registry())
            .is_err());
    }
}
