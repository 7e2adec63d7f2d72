//! Keel 应用程序 - 配置、日志、注册表与模块的启动入口

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{Environment, EnvironmentPropertySource, PropertySource, TomlPropertySource};
use crate::constants::{CONFIG_SERVICE, DEFAULT_CONFIG_FILE, DEFAULT_ENV_PREFIX, EVENTS_SERVICE};
use crate::event::{ApplicationStarted, EventDispatcher};
use crate::key::Key;
use crate::logging::LoggingConfig;
use crate::module::{Module, ModuleList};
use crate::registry::Registry;

/// Keel 应用程序
///
/// 启动顺序：
/// 1. 加载配置（TOML 文件、额外配置源、环境变量）
/// 2. 初始化日志
/// 3. 创建注册表并注册 `Environment` 与 `EventDispatcher`
/// 4. 按顺序执行模块的 `provide`，再执行 `init`
pub struct KeelApplication {
    name: String,
    config_files: Vec<PathBuf>,
    env_prefix: String,
    sources: Vec<Box<dyn PropertySource>>,
    logging_config: Option<LoggingConfig>,
    init_logging: bool,
    modules: ModuleList,
}

impl KeelApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_files: vec![PathBuf::from(DEFAULT_CONFIG_FILE)],
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            sources: Vec::new(),
            logging_config: None,
            init_logging: true,
            modules: ModuleList::new(),
        }
    }

    /// 设置配置文件路径（文件不存在时跳过）
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_files = vec![path.into()];
        self
    }

    pub fn config_files(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.config_files = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// 追加配置源，例如测试中的 `MapPropertySource`
    pub fn property_source(mut self, source: impl PropertySource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// 设置日志配置，不设置时从 `logging.*` 配置与环境变量读取
    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    /// 不初始化全局日志订阅者（测试或嵌入场景）
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// 按顺序追加模块
    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 启动应用，返回完成引导的注册表
    pub fn run(mut self) -> anyhow::Result<Arc<Registry>> {
        let start_time = Instant::now();
        let environment = self.load_environment()?;

        if self.init_logging {
            let logging = self
                .logging_config
                .clone()
                .unwrap_or_else(|| LoggingConfig::from_environment(&environment));
            if let Err(e) = logging.init() {
                tracing::debug!("Logging already initialized: {}", e);
            }
        }

        tracing::info!("Starting {} application", self.name);

        let registry = Registry::new();
        registry.register_instance(Key::of::<Environment>(), environment);
        registry.alias(CONFIG_SERVICE, Key::of::<Environment>());
        registry.register_instance(Key::of::<EventDispatcher>(), EventDispatcher::new());
        registry.alias(EVENTS_SERVICE, Key::of::<EventDispatcher>());

        tracing::debug!("Modules: {:?}", self.modules.names());
        self.modules.bootstrap(&registry)?;

        let elapsed = start_time.elapsed().as_millis();
        tracing::info!(
            "Started {} in {}ms ({} bindings)",
            self.name,
            elapsed,
            registry.len()
        );

        let events = registry.resolve_type::<EventDispatcher>()?;
        events.dispatch(&ApplicationStarted::new(self.name.clone(), elapsed));

        Ok(registry)
    }

    fn load_environment(&mut self) -> anyhow::Result<Environment> {
        let environment = Environment::new();

        for path in &self.config_files {
            if path.exists() {
                environment.add_property_source(Box::new(TomlPropertySource::from_file(path)?));
                tracing::debug!("Loaded config file: {}", path.display());
            } else {
                tracing::debug!("Config file not found, skipped: {}", path.display());
            }
        }

        for source in self.sources.drain(..) {
            environment.add_property_source(source);
        }

        environment.add_property_source(Box::new(EnvironmentPropertySource::new(&self.env_prefix)));
        Ok(environment)
    }
}
