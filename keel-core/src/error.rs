//! 核心错误类型
//!
//! 注册表与参数解析器使用 `thiserror` 定义的显式错误；工厂、模块等应用层代码使用 `anyhow::Result`。

use crate::key::Key;
use thiserror::Error;

/// 统一的应用层结果类型
pub use anyhow::Result;

/// 注册表错误
#[derive(Debug, Error)]
pub enum RegistryError {
    /// 键未注册 - 属于配置错误
    #[error("Service '{0}' is not registered")]
    UnknownService(Key),

    /// 同一线程上重入解析了同一个键
    #[error("Circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    /// 实例的实际类型与请求的类型不一致
    #[error("Service '{key}' is not of type '{expected}'")]
    TypeMismatch { key: Key, expected: &'static str },

    /// 工厂执行失败
    #[error("Failed to create service '{key}': {source}")]
    FactoryFailed {
        key: Key,
        #[source]
        source: anyhow::Error,
    },
}

/// 参数解析错误
#[derive(Debug, Error)]
pub enum ResolveError {
    /// 所有解析层级都无法为必需参数提供值
    #[error(
        "Cannot resolve required parameter '{parameter}' of type '{type_name}' for {target}. \
         Parameter must be available in context, in the registry by name or type, \
         have a default value, or be nullable."
    )]
    Unresolvable {
        parameter: String,
        type_name: String,
        target: String,
    },

    /// 字符串值无法转换为参数声明的类型
    #[error("Parameter '{parameter}' of {target} cannot be converted to '{type_name}': '{value}'")]
    Coercion {
        parameter: String,
        type_name: &'static str,
        value: String,
        target: String,
    },

    /// 从已解析的参数列表中取值失败
    #[error("Argument '{parameter}' of {target} is {problem}")]
    Argument {
        parameter: String,
        target: String,
        problem: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
