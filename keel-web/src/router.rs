//! 路由匹配协议
//!
//! 路由器只暴露一个操作：`match_route(method, path) -> MatchResult`。路由中间件每个
//! 请求调用一次，分发器消费结果。[`RouteTable`] 是内置的实现，支持 `{name}` 与
//! `{name:pattern}` 形式的路径参数。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use keel_core::{Arguments, ParameterDescriptor, Signature};
use regex::Regex;
use thiserror::Error;

use crate::reply::{IntoReply, Reply};

/// 路由错误
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Invalid action reference '{0}', expected 'Controller@method'")]
    InvalidReference(String),

    #[error("Invalid route pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

type HandlerFn = dyn Fn(&Arguments) -> anyhow::Result<Reply> + Send + Sync;

/// 可直接调用的处理函数及其参数描述
pub struct Handler {
    signature: Signature,
    invoke: Box<HandlerFn>,
}

impl Handler {
    pub fn new<P, F, R>(parameters: P, handler: F) -> Self
    where
        P: IntoIterator<Item = ParameterDescriptor>,
        F: Fn(&Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
        R: IntoReply,
    {
        Self {
            signature: Signature::new("route handler").params(parameters),
            invoke: Box::new(move |args| handler(args).map(IntoReply::into_reply)),
        }
    }

    /// 设置错误信息中使用的目标名称
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.signature = Signature::new(name).params(self.signature.parameters().to_vec());
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn call(&self, arguments: &Arguments) -> anyhow::Result<Reply> {
        (self.invoke)(arguments)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("signature", &self.signature.target())
            .finish()
    }
}

/// `Controller@method` 形式的控制器引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    controller: String,
    method: String,
}

impl ActionRef {
    pub fn new(controller: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            method: method.into(),
        }
    }

    /// 解析 `Controller@method`
    pub fn parse(reference: &str) -> Result<Self, RouteError> {
        match reference.split_once('@') {
            Some((controller, method)) if !controller.is_empty() && !method.is_empty() => {
                Ok(Self::new(controller, method))
            }
            _ => Err(RouteError::InvalidReference(reference.to_string())),
        }
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.controller, self.method)
    }
}

/// 分发目标
#[derive(Debug, Clone)]
pub enum Target {
    Handler(Arc<Handler>),
    Action(ActionRef),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Handler(handler) => write!(f, "{}", handler.signature().target()),
            Target::Action(action) => write!(f, "{}", action),
        }
    }
}

/// 可以转换为分发目标的类型
pub trait IntoTarget {
    fn into_target(self) -> Result<Target, RouteError>;
}

impl IntoTarget for Target {
    fn into_target(self) -> Result<Target, RouteError> {
        Ok(self)
    }
}

impl IntoTarget for Handler {
    fn into_target(self) -> Result<Target, RouteError> {
        Ok(Target::Handler(Arc::new(self)))
    }
}

impl IntoTarget for &str {
    fn into_target(self) -> Result<Target, RouteError> {
        ActionRef::parse(self).map(Target::Action)
    }
}

impl IntoTarget for String {
    fn into_target(self) -> Result<Target, RouteError> {
        self.as_str().into_target()
    }
}

/// 从路径中提取的参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    values: HashMap<String, String>,
}

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RouteParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// 路由匹配结果 - 每个请求产生一次，之后不再修改
#[derive(Debug, Clone)]
pub enum MatchResult {
    Found { target: Target, params: RouteParams },
    NotFound,
    MethodNotAllowed { allowed: Vec<Method> },
}

impl MatchResult {
    pub fn is_found(&self) -> bool {
        matches!(self, MatchResult::Found { .. })
    }
}

/// 已注册路由的描述（用于列出路由）
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub method: Method,
    pub path: String,
    pub target: String,
}

/// 路由器
pub trait Router: Send + Sync {
    fn match_route(&self, method: &Method, path: &str) -> MatchResult;

    /// 已注册的路由
    fn routes(&self) -> Vec<RouteInfo> {
        Vec::new()
    }
}

/// 注册表中保存的路由器类型
pub type SharedRouter = Arc<dyn Router>;

struct Route {
    method: Method,
    path: String,
    pattern: Regex,
    params: Vec<String>,
    target: Target,
}

/// 内置路由表
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由
    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        target: impl IntoTarget,
    ) -> Result<&mut Self, RouteError> {
        let target = target.into_target()?;
        let (pattern, params) = compile(path)?;
        tracing::debug!(method = %method, path, target = %target, "Route registered");

        self.routes.push(Route {
            method,
            path: path.to_string(),
            pattern,
            params,
            target,
        });
        Ok(self)
    }

    pub fn get(&mut self, path: &str, target: impl IntoTarget) -> Result<&mut Self, RouteError> {
        self.route(Method::GET, path, target)
    }

    pub fn post(&mut self, path: &str, target: impl IntoTarget) -> Result<&mut Self, RouteError> {
        self.route(Method::POST, path, target)
    }

    pub fn put(&mut self, path: &str, target: impl IntoTarget) -> Result<&mut Self, RouteError> {
        self.route(Method::PUT, path, target)
    }

    pub fn patch(&mut self, path: &str, target: impl IntoTarget) -> Result<&mut Self, RouteError> {
        self.route(Method::PATCH, path, target)
    }

    pub fn delete(&mut self, path: &str, target: impl IntoTarget) -> Result<&mut Self, RouteError> {
        self.route(Method::DELETE, path, target)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for RouteTable {
    fn match_route(&self, method: &Method, path: &str) -> MatchResult {
        let path = normalize(path);
        let mut allowed = Vec::new();

        for route in &self.routes {
            let Some(captures) = route.pattern.captures(path) else {
                continue;
            };

            // HEAD 请求可以匹配 GET 路由
            let method_matches =
                route.method == *method || (*method == Method::HEAD && route.method == Method::GET);
            if !method_matches {
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
                continue;
            }

            let params = route
                .params
                .iter()
                .filter_map(|name| captures.name(name).map(|m| (name.clone(), m.as_str().to_string())))
                .collect();

            return MatchResult::Found {
                target: route.target.clone(),
                params,
            };
        }

        if allowed.is_empty() {
            MatchResult::NotFound
        } else {
            MatchResult::MethodNotAllowed { allowed }
        }
    }

    fn routes(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|route| RouteInfo {
                method: route.method.clone(),
                path: route.path.clone(),
                target: route.target.to_string(),
            })
            .collect()
    }
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// 将 `/users/{id:\d+}` 编译为正则表达式
fn compile(path: &str) -> Result<(Regex, Vec<String>), RouteError> {
    let mut expression = String::from("^");
    let mut params = Vec::new();

    for segment in normalize(path).split('/').filter(|s| !s.is_empty()) {
        expression.push('/');
        match segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            Some(param) => {
                let (name, constraint) = param.split_once(':').unwrap_or((param, "[^/]+"));
                expression.push_str(&format!("(?P<{}>{})", name, constraint));
                params.push(name.to_string());
            }
            None => expression.push_str(&regex::escape(segment)),
        }
    }

    if params.is_empty() && expression == "^" {
        expression.push('/');
    }
    expression.push('$');

    let pattern = Regex::new(&expression).map_err(|source| RouteError::InvalidPattern {
        pattern: path.to_string(),
        source,
    })?;
    Ok((pattern, params))
}
