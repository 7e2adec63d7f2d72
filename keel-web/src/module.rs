//! Web 模块
//!
//! 把路由表、控制器目录、中间件目录、视图渲染器、管道和入口注册到注册表。
//! 管道与入口是共享绑定，第一次解析时按 `http.middleware` 构建。

use std::sync::Arc;

use keel_core::{Environment, Instance, Module, Registry, TypeKey};

use crate::catalog::MiddlewareCatalog;
use crate::constants::CONTROLLER_NAMESPACE;
use crate::controller::{ControllerCatalog, ControllerDefinition};
use crate::entrypoint::WebEntrypoint;
use crate::pipeline::Pipeline;
use crate::router::{RouteTable, SharedRouter};
use crate::view::{TeraRenderer, ViewRenderer};

/// Web 模块
pub struct HttpModule {
    router: SharedRouter,
    controllers: ControllerCatalog,
    middleware: Arc<MiddlewareCatalog>,
}

impl HttpModule {
    /// 使用内置中间件目录
    pub fn new(routes: RouteTable) -> Self {
        Self::with_router(Arc::new(routes))
    }

    /// 使用自定义的路由实现
    pub fn with_router(router: SharedRouter) -> Self {
        Self {
            router,
            controllers: ControllerCatalog::new(),
            middleware: Arc::new(MiddlewareCatalog::with_defaults()),
        }
    }

    pub fn controller(mut self, definition: ControllerDefinition) -> Self {
        self.controllers.register(definition);
        self
    }

    pub fn controllers(mut self, controllers: ControllerCatalog) -> Self {
        self.controllers = controllers;
        self
    }

    /// 替换中间件目录（自定义单元需要同时保留内置单元时，从 `with_defaults` 开始注册）
    pub fn middleware(mut self, catalog: MiddlewareCatalog) -> Self {
        self.middleware = Arc::new(catalog);
        self
    }
}

impl Module for HttpModule {
    fn name(&self) -> &str {
        "keel-web"
    }

    fn provide(&self, registry: &Arc<Registry>) -> anyhow::Result<()> {
        registry.register_instance(TypeKey::of::<SharedRouter>(), Arc::clone(&self.router));

        let controllers = self.controllers.clone();
        registry.register_shared(TypeKey::of::<ControllerCatalog>(), move |registry| {
            let mut controllers = controllers.clone();
            if let Ok(env) = registry.resolve_type::<Environment>() {
                if let Some(namespace) = env.get_string(CONTROLLER_NAMESPACE) {
                    controllers.set_namespace(namespace);
                }
            }
            tracing::debug!(
                namespace = controllers.namespace(),
                controllers = controllers.len(),
                "Controller catalog ready"
            );
            Ok(controllers)
        });

        registry.register_arc(
            TypeKey::of::<MiddlewareCatalog>(),
            Arc::clone(&self.middleware) as Instance,
        );

        registry.register_shared(TypeKey::of::<Arc<dyn ViewRenderer>>(), |registry| {
            let renderer = match registry.resolve_type::<Environment>() {
                Ok(env) => TeraRenderer::from_environment(&env)?,
                Err(_) => TeraRenderer::new(),
            };
            Ok(Arc::new(renderer) as Arc<dyn ViewRenderer>)
        });

        registry.register_type(true, |registry| {
            registry
                .resolve_type::<MiddlewareCatalog>()?
                .build_configured(registry)
        });

        registry.register_type(true, WebEntrypoint::from_registry);

        tracing::info!("Web bindings registered");
        Ok(())
    }

    fn init(&self, registry: &Arc<Registry>) -> anyhow::Result<()> {
        let routes = self.router.routes().len();
        let pipeline = registry.resolve_type::<Pipeline>()?;
        tracing::info!(routes, units = ?pipeline.names(), "HTTP pipeline ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::router::Handler;
    use keel_core::{MapPropertySource, ModuleList, ParameterDescriptor};

    fn routes() -> RouteTable {
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
    }

    fn bootstrap(registry: &Arc<Registry>, module: HttpModule) {
        ModuleList::new().with(module).bootstrap(registry).unwrap();
    }

    #[test]
    fn test_entrypoint_serves_routes() {
        let registry = Registry::new();
        bootstrap(&registry, HttpModule::new(routes()));

        let entrypoint = registry.resolve_type::<WebEntrypoint>().unwrap();
        let response = entrypoint.handle(Request::get("/hello/keel"));
        assert_eq!(response.body_text(), "hello keel");
    }

    #[test]
    fn test_pipeline_is_shared() {
        let registry = Registry::new();
        bootstrap(&registry, HttpModule::new(routes()));

        let first = registry.resolve_type::<Pipeline>().unwrap();
        let second = registry.resolve_type::<Pipeline>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_controller_namespace_from_config() {
        let registry = Registry::new();
        let env = Environment::new().with_source(
            MapPropertySource::new("test").with_property(CONTROLLER_NAMESPACE, "demo::web"),
        );
        registry.register_instance(TypeKey::of::<Environment>(), env);
        bootstrap(&registry, HttpModule::new(routes()));

        let controllers = registry.resolve_type::<ControllerCatalog>().unwrap();
        assert_eq!(controllers.namespace(), "demo::web");
    }
}
