//! 控制器支持
//!
//! 控制器通过 [`ControllerCatalog`] 按稳定标识注册：每个定义携带构造函数的参数描述和
//! 各个 action 的参数描述。分发器据此构造实例并调用方法，不需要运行时反射。
//!
//! 辅助能力以 trait 组合提供：[`Renderable`]、[`Redirectable`]、[`Validatable`]。
//!
//! ## 示例
//!
//! ```ignore
//! let users = ControllerDefinition::build::<UsersController, _>(
//!     "UsersController",
//!     [ParameterDescriptor::new("repository").of::<UserRepository>()],
//!     |args| Ok(UsersController::new(args.get("repository")?)),
//! )
//! .action("show", [ParameterDescriptor::new("id").of::<u64>()], |controller, args| {
//!     controller.show(*args.get::<u64>("id")?)
//! })
//! .finish();
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use http::StatusCode;
use keel_core::utils::naming;
use keel_core::{Arguments, Instance, ParameterDescriptor, Signature};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::constants::DEFAULT_CONTROLLER_NAMESPACE;
use crate::error::HttpFailure;
use crate::http::{Request, Response};
use crate::reply::{IntoReply, Reply};
use crate::view::{TemplateError, ViewRenderer};

type ConstructFn = dyn Fn(&Arguments) -> anyhow::Result<Instance> + Send + Sync;
type InvokeFn = dyn Fn(&Instance, &Arguments) -> anyhow::Result<Reply> + Send + Sync;

/// 控制器方法
pub struct Action {
    signature: Signature,
    invoke: Box<InvokeFn>,
}

impl Action {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn call(&self, instance: &Instance, arguments: &Arguments) -> anyhow::Result<Reply> {
        (self.invoke)(instance, arguments)
    }
}

/// 控制器定义
pub struct ControllerDefinition {
    name: String,
    constructor: Signature,
    construct: Box<ConstructFn>,
    actions: HashMap<String, Action>,
}

impl ControllerDefinition {
    /// 开始定义类型为 `C` 的控制器
    pub fn build<C, P>(
        name: impl Into<String>,
        parameters: P,
        constructor: impl Fn(&Arguments) -> anyhow::Result<C> + Send + Sync + 'static,
    ) -> ControllerBuilder<C>
    where
        C: Any + Send + Sync,
        P: IntoIterator<Item = ParameterDescriptor>,
    {
        let name = name.into();
        ControllerBuilder {
            definition: ControllerDefinition {
                constructor: Signature::new(format!("{}::new", name)).params(parameters),
                construct: Box::new(move |args| {
                    constructor(args).map(|controller| Arc::new(controller) as Instance)
                }),
                name,
                actions: HashMap::new(),
            },
            _controller: PhantomData,
        }
    }

    /// 无依赖的控制器
    pub fn simple<C>(name: impl Into<String>) -> ControllerBuilder<C>
    where
        C: Any + Send + Sync + Default,
    {
        Self::build(name, [], |_| Ok(C::default()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 构造函数签名
    pub fn constructor(&self) -> &Signature {
        &self.constructor
    }

    pub fn construct(&self, arguments: &Arguments) -> anyhow::Result<Instance> {
        (self.construct)(arguments)
    }

    pub fn action(&self, method: &str) -> Option<&Action> {
        self.actions.get(method)
    }

    pub fn actions(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl fmt::Debug for ControllerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDefinition")
            .field("name", &self.name)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 类型化的控制器定义构建器
pub struct ControllerBuilder<C> {
    definition: ControllerDefinition,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> ControllerBuilder<C> {
    /// 添加 action
    pub fn action<P, F, R>(mut self, method: &str, parameters: P, handler: F) -> Self
    where
        P: IntoIterator<Item = ParameterDescriptor>,
        F: Fn(&C, &Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
        R: IntoReply,
    {
        let target = format!("{}::{}", self.definition.name, method);
        let controller = self.definition.name.clone();
        let action = Action {
            signature: Signature::new(target).params(parameters),
            invoke: Box::new(move |instance, args| {
                let instance = (**instance).downcast_ref::<C>().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Controller {} is not of type {}",
                        controller,
                        std::any::type_name::<C>()
                    )
                })?;
                handler(instance, args).map(IntoReply::into_reply)
            }),
        };
        self.definition.actions.insert(method.to_string(), action);
        self
    }

    pub fn finish(self) -> ControllerDefinition {
        self.definition
    }
}

/// 控制器目录 - 标识到定义的映射
///
/// 定义保留注册时的名称，索引键是补全命名空间后的完整标识；修改命名空间会重建索引。
#[derive(Clone)]
pub struct ControllerCatalog {
    namespace: String,
    definitions: HashMap<String, Arc<ControllerDefinition>>,
}

impl ControllerCatalog {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_CONTROLLER_NAMESPACE)
    }

    /// 指定未限定名称使用的默认命名空间
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            definitions: HashMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 修改默认命名空间
    pub fn set_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
        let definitions = std::mem::take(&mut self.definitions);
        self.definitions = definitions
            .into_values()
            .map(|definition| (self.qualify(definition.name()), definition))
            .collect();
    }

    /// 补全命名空间
    pub fn qualify(&self, name: &str) -> String {
        naming::qualify(&self.namespace, name)
    }

    /// 注册控制器，同一标识的最后一次注册生效
    pub fn register(&mut self, definition: ControllerDefinition) -> &mut Self {
        let qualified = self.qualify(definition.name());
        tracing::debug!(controller = %qualified, "Controller registered");
        self.definitions.insert(qualified, Arc::new(definition));
        self
    }

    pub fn with(mut self, definition: ControllerDefinition) -> Self {
        self.register(definition);
        self
    }

    /// 按完整标识查找
    pub fn get(&self, qualified: &str) -> Option<Arc<ControllerDefinition>> {
        self.definitions.get(qualified).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for ControllerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 控制器能力 ====================

/// 渲染视图
pub trait Renderable {
    fn views(&self) -> &dyn ViewRenderer;

    /// 渲染模板，未带扩展名时补全 `.html`
    fn render(&self, template: &str, context: serde_json::Value) -> Result<Response, TemplateError> {
        let template = if template.ends_with(".html") {
            template.to_string()
        } else {
            format!("{}.html", template)
        };
        let html = self.views().render(&template, &context)?;
        Ok(Response::html(html))
    }
}

/// 重定向
pub trait Redirectable {
    fn redirect(&self, url: &str) -> Response {
        Response::redirect(url)
    }

    fn redirect_with_status(&self, url: &str, status: StatusCode) -> Response {
        Response::redirect_with_status(url, status)
    }

    /// 重定向到来源页面，没有 `Referer` 时使用 `fallback`
    fn redirect_back(&self, request: &Request, fallback: &str) -> Response {
        let target = request
            .header("referer")
            .unwrap_or_else(|| fallback.to_string());
        Response::redirect(&target)
    }
}

/// 数据校验，失败时返回 422
pub trait Validatable {
    fn validate<T: Validate>(&self, data: &T) -> Result<(), HttpFailure> {
        data.validate().map_err(|errors| {
            tracing::debug!(errors = %errors, "Validation failed");
            HttpFailure::unprocessable(errors.to_string())
        })
    }

    /// 解析 JSON 请求体并校验，格式错误返回 400
    fn validated_json<T>(&self, request: &Request) -> Result<T, HttpFailure>
    where
        T: DeserializeOwned + Validate,
    {
        let data: T = request
            .json()
            .map_err(|e| HttpFailure::bad_request(format!("Invalid JSON body: {}", e)))?;
        self.validate(&data)?;
        Ok(data)
    }
}
