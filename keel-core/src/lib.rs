// keel-core: 服务注册表与参数解析
//
// 提供框架的依赖解析核心：
// - 按名称或类型注册的共享/非共享绑定
// - 固定优先级的参数解析链
// - 模块化的启动序列（先 provide，后 init）
// - 配置、日志与同步事件分发

pub mod app;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod key;
pub mod logging;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod utils;

// 重新导出常用类型
pub use app::KeelApplication;
pub use config::{
    ConfigError, ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource,
    PropertySource, TomlPropertySource,
};
pub use constants::*;
pub use error::{RegistryError, ResolveError, Result};
pub use event::{ApplicationStarted, Event, EventDispatcher, EventListener, FnListener};
pub use key::{Key, TypeKey};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use module::{Module, ModuleList};
pub use registry::{Binding, Factory, Instance, Registry};
pub use resolver::{
    Arguments, ParameterDescriptor, ResolutionContext, Resolver, ScopeTier, Signature, Value,
};

/// Prelude 模块，包含常用的 traits 和类型
pub mod prelude {
    pub use crate::app::KeelApplication;
    pub use crate::config::Environment;
    pub use crate::event::{Event, EventDispatcher};
    pub use crate::key::{Key, TypeKey};
    pub use crate::module::Module;
    pub use crate::registry::{Instance, Registry};
    pub use crate::resolver::{
        Arguments, ParameterDescriptor, ResolutionContext, Resolver, Signature, Value,
    };
}
