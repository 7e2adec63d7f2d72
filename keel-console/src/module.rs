//! 控制台模块 - 把命令目录注册到注册表

use std::sync::Arc;

use keel_core::{Module, Registry, TypeKey};

use crate::catalog::{CommandCatalog, CommandDefinition};

/// 控制台模块
///
/// 目录包含内置命令以及通过 [`ConsoleModule::command`] 追加的命令，同名命令后注册的生效。
pub struct ConsoleModule {
    catalog: CommandCatalog,
}

impl ConsoleModule {
    pub fn new() -> Self {
        Self {
            catalog: CommandCatalog::with_defaults(),
        }
    }

    pub fn command(mut self, definition: CommandDefinition) -> Self {
        self.catalog.register(definition);
        self
    }
}

impl Default for ConsoleModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for ConsoleModule {
    fn name(&self) -> &str {
        "keel-console"
    }

    fn provide(&self, registry: &Arc<Registry>) -> anyhow::Result<()> {
        tracing::debug!(commands = ?self.catalog.names(), "Registering command catalog");
        registry.register_instance(TypeKey::of::<CommandCatalog>(), self.catalog.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Console;
    use keel_core::ModuleList;

    struct Noop;

    #[test]
    fn test_console_uses_registered_catalog() {
        let registry = Registry::new();
        ModuleList::new()
            .with(ConsoleModule::new().command(
                CommandDefinition::build::<Noop, _>("noop", [], |_| Ok(Noop)).execute([], |_, _| Ok(7)),
            ))
            .bootstrap(&registry)
            .unwrap();

        let console = Console::new(registry);
        assert_eq!(console.catalog().names(), vec!["noop", "routes", "serve"]);
        assert_eq!(console.run(["keel", "noop"]), 7);
    }
}
