//! 模块机制
//!
//! 模块批量注册一组相关的绑定。启动顺序固定：先按顺序调用所有模块的 `provide`，
//! 全部完成后再按相同顺序调用 `init`。模块列表不会被重新排序或去重。

use crate::registry::Registry;
use anyhow::Context;
use std::sync::Arc;

/// 模块 trait
///
/// 实现此 trait 以提供一组绑定
pub trait Module: Send + Sync {
    /// 模块名称
    fn name(&self) -> &str;

    /// 注册阶段 - 只注册绑定，不应解析其他模块的服务
    fn provide(&self, registry: &Arc<Registry>) -> anyhow::Result<()>;

    /// 初始化阶段 - 所有模块的 `provide` 完成后执行
    ///
    /// 可以安全地解析其他模块注册的服务
    fn init(&self, _registry: &Arc<Registry>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 有序的模块列表
#[derive(Default)]
pub struct ModuleList {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加模块（构建器风格）
    pub fn with(mut self, module: impl Module + 'static) -> Self {
        self.push(Box::new(module));
        self
    }

    /// 追加模块
    pub fn push(&mut self, module: Box<dyn Module>) {
        tracing::debug!("Registering module: {}", module.name());
        self.modules.push(module);
    }

    /// 模块名称，按安装顺序
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 执行启动序列：所有 `provide`，然后所有 `init`
    pub fn bootstrap(&self, registry: &Arc<Registry>) -> anyhow::Result<()> {
        for module in &self.modules {
            registry
                .install(module.as_ref())
                .with_context(|| format!("Module '{}' failed to provide bindings", module.name()))?;
        }

        for module in &self.modules {
            tracing::debug!("Initializing module: {}", module.name());
            module
                .init(registry)
                .with_context(|| format!("Module '{}' failed to initialize", module.name()))?;
        }

        tracing::info!("Bootstrapped {} module(s)", self.modules.len());
        Ok(())
    }
}
