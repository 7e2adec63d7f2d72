//! 框架服务名称与配置键
//!
//! 框架注册到注册表中的服务名称，以及核心读取的配置键，集中定义在这里，
//! 避免各个 crate 中出现不一致的硬编码字符串。

/// `Environment` 的服务名称
pub const CONFIG_SERVICE: &str = "config";

/// `EventDispatcher` 的服务名称
pub const EVENTS_SERVICE: &str = "events";

/// 是否输出调试信息（错误详情等）
pub const APP_DEBUG_KEY: &str = "app.debug";

/// 应用名称
pub const APP_NAME_KEY: &str = "app.name";

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "keel.toml";

/// 默认环境变量前缀
pub const DEFAULT_ENV_PREFIX: &str = "KEEL_";
