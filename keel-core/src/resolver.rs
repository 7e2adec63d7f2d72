//! Parameter Resolver - 按固定的策略链为目标的参数提供值
//!
//! 每个参数独立地依次尝试：
//!
//! 1. 解析上下文中的同名值
//! 2. 参数类型是 [`Registry`] 时提供注册表本身
//! 3. 注册表中的同名键
//! 4. 非内置类型的类型键
//! 5. 声明的默认值
//! 6. 可空参数提供 `Null`
//! 7. 否则返回 [`ResolveError::Unresolvable`]
//!
//! 调用方可以通过 [`ScopeTier`] 插入额外层级：一个在所有层级之前生效（权威层），
//! 一个位于上下文之后、自引用之前（作用域层）。参数之间没有回溯。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ResolveError;
use crate::key::{Key, TypeKey};
use crate::registry::{Instance, Registry};

/// 解析出的参数值
#[derive(Clone)]
pub enum Value {
    Null,
    Instance(Instance),
}

impl Value {
    /// 包装任意值
    pub fn of<T: Any + Send + Sync>(value: T) -> Self {
        Value::Instance(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 向下转型，`Null` 或类型不符时返回 `None`
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Null => None,
            Value::Instance(instance) => Arc::clone(instance).downcast::<T>().ok(),
        }
    }

    /// 是否持有与 `other` 相同的实例（引用相等）
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }

    /// 将字符串转换为声明的内置类型
    ///
    /// 未声明类型或声明为字符串时原样保留；非内置类型返回 `None`，由调用方决定是否原样提供。
    pub fn parse_as(raw: &str, type_key: Option<TypeKey>) -> Option<Result<Value, ()>> {
        let Some(type_key) = type_key else {
            return Some(Ok(Value::of(raw.to_string())));
        };

        macro_rules! parse_to {
            ($($ty:ty),*) => {
                $(
                    if type_key == TypeKey::of::<$ty>() {
                        return Some(raw.parse::<$ty>().map(Value::of).map_err(|_| ()));
                    }
                )*
            };
        }

        if type_key == TypeKey::of::<String>() {
            return Some(Ok(Value::of(raw.to_string())));
        }
        parse_to!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);
        None
    }
}

impl From<Instance> for Value {
    fn from(instance: Instance) -> Self {
        Value::Instance(instance)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Instance(_) => f.write_str("Instance(..)"),
        }
    }
}

/// 参数描述 - 目标签名中一个参数的元数据
#[derive(Clone, Debug)]
pub struct ParameterDescriptor {
    name: String,
    type_key: Option<TypeKey>,
    default: Option<Value>,
    nullable: bool,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_key: None,
            default: None,
            nullable: false,
        }
    }

    /// 声明参数类型
    pub fn of<T: ?Sized + Any>(mut self) -> Self {
        self.type_key = Some(TypeKey::of::<T>());
        self
    }

    /// 声明默认值
    pub fn default_value<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.default = Some(Value::of(value));
        self
    }

    /// 声明参数可空
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_key(&self) -> Option<TypeKey> {
        self.type_key
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn type_name(&self) -> &'static str {
        self.type_key.map(|t| t.name()).unwrap_or("mixed")
    }

    /// 参数类型是否为 `T`
    pub fn is<T: ?Sized + Any>(&self) -> bool {
        self.type_key == Some(TypeKey::of::<T>())
    }
}

/// 目标签名 - 在注册时构建一次，之后每次调用复用
#[derive(Clone, Debug)]
pub struct Signature {
    target: String,
    parameters: Vec<ParameterDescriptor>,
}

impl Signature {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn params(mut self, parameters: impl IntoIterator<Item = ParameterDescriptor>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }
}

/// 解析上下文 - 调用方为单次解析提供的按名称覆盖
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    values: HashMap<String, Value>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 解析结果 - 与签名顺序一致的参数列表
#[derive(Clone, Debug)]
pub struct Arguments {
    target: String,
    entries: Vec<(String, Value)>,
}

impl Arguments {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, value)| value)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.entries.into_iter().map(|(_, value)| value).collect()
    }

    /// 取出必需参数
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, ResolveError> {
        match self.optional::<T>(name)? {
            Some(value) => Ok(value),
            None => Err(self.problem(name, "null".to_string())),
        }
    }

    /// 取出可空参数
    pub fn optional<T: Any + Send + Sync>(&self, name: &str) -> Result<Option<Arc<T>>, ResolveError> {
        match self.value(name) {
            None => Err(self.problem(name, "not part of the signature".to_string())),
            Some(Value::Null) => Ok(None),
            Some(value) => value.downcast::<T>().map(Some).ok_or_else(|| {
                self.problem(name, format!("not of type '{}'", std::any::type_name::<T>()))
            }),
        }
    }

    /// 取出参数并克隆内部值
    pub fn cloned<T: Any + Send + Sync + Clone>(&self, name: &str) -> Result<T, ResolveError> {
        self.get::<T>(name).map(|value| (*value).clone())
    }

    fn problem(&self, name: &str, problem: String) -> ResolveError {
        ResolveError::Argument {
            parameter: name.to_string(),
            target: self.target.clone(),
            problem,
        }
    }
}

/// 调用方插入的额外解析层级
pub trait ScopeTier {
    /// 权威层 - 在所有其他层级之前检查，不能被其他层级覆盖
    fn authoritative(&self, _parameter: &ParameterDescriptor) -> Result<Option<Value>, ResolveError> {
        Ok(None)
    }

    /// 作用域层 - 位于上下文之后、注册表自引用之前
    fn scoped(&self, _parameter: &ParameterDescriptor) -> Result<Option<Value>, ResolveError> {
        Ok(None)
    }
}

/// 不提供任何额外层级
struct NoScope;

impl ScopeTier for NoScope {}

/// 参数解析器
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<Registry>,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// 标准解析：上下文 / 注册表 / 默认值 / 可空
    pub fn resolve(
        &self,
        signature: &Signature,
        context: &ResolutionContext,
    ) -> Result<Arguments, ResolveError> {
        self.resolve_scoped(signature, context, &NoScope)
    }

    /// 带额外层级的解析
    pub fn resolve_scoped(
        &self,
        signature: &Signature,
        context: &ResolutionContext,
        scope: &dyn ScopeTier,
    ) -> Result<Arguments, ResolveError> {
        let mut arguments = Arguments::new(signature.target());

        for parameter in signature.parameters() {
            let value = self.resolve_parameter(signature.target(), parameter, context, scope)?;
            arguments.push(parameter.name(), value);
        }

        Ok(arguments)
    }

    fn resolve_parameter(
        &self,
        target: &str,
        parameter: &ParameterDescriptor,
        context: &ResolutionContext,
        scope: &dyn ScopeTier,
    ) -> Result<Value, ResolveError> {
        let name = parameter.name();

        if let Some(value) = scope.authoritative(parameter)? {
            tracing::trace!(target_name = target, parameter = name, "Resolved from authoritative tier");
            return Ok(value);
        }

        if let Some(value) = context.get(name) {
            tracing::trace!(target_name = target, parameter = name, "Resolved from context");
            return Ok(value.clone());
        }

        if let Some(value) = scope.scoped(parameter)? {
            tracing::trace!(target_name = target, parameter = name, "Resolved from scoped tier");
            return Ok(value);
        }

        if parameter.is::<Registry>() {
            return Ok(Value::Instance(Arc::clone(&self.registry) as Instance));
        }

        let by_name = Key::name(name);
        if self.registry.has(&by_name) {
            tracing::trace!(target_name = target, parameter = name, "Resolved from registry by name");
            return Ok(Value::Instance(self.registry.resolve(by_name)?));
        }

        if let Some(type_key) = parameter.type_key().filter(|t| !t.is_builtin()) {
            if self.registry.has(type_key) {
                tracing::trace!(target_name = target, parameter = name, "Resolved from registry by type");
                return Ok(Value::Instance(self.registry.resolve(type_key)?));
            }
        }

        if let Some(default) = parameter.default() {
            return Ok(default.clone());
        }

        if parameter.is_nullable() {
            return Ok(Value::Null);
        }

        tracing::debug!(target_name = target, parameter = name, "Parameter cannot be resolved");
        Err(ResolveError::Unresolvable {
            parameter: name.to_string(),
            type_name: parameter.type_name().to_string(),
            target: target.to_string(),
        })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("registry", &self.registry)
            .finish()
    }
}
