//! 命令目录
//!
//! 命令名称到命令定义的映射。定义包含构造函数签名、`execute` 签名与命令行参数声明，
//! 实例通过参数解析器构造，`execute` 的参数同样通过参数解析器获得。

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use keel_core::{Arguments, Instance, ParameterDescriptor, Signature};

type ConstructFn = dyn Fn(&Arguments) -> anyhow::Result<Instance> + Send + Sync;
type ExecuteFn = dyn Fn(&Instance, &Arguments) -> anyhow::Result<i32> + Send + Sync;
type ConfigureFn = dyn Fn(clap::Command) -> clap::Command + Send + Sync;

/// 命令定义
pub struct CommandDefinition {
    name: String,
    about: String,
    constructor: Signature,
    construct: Box<ConstructFn>,
    execute: Signature,
    run: Box<ExecuteFn>,
    configure: Vec<Box<ConfigureFn>>,
}

impl CommandDefinition {
    /// 开始定义类型为 `C` 的命令
    pub fn build<C, P>(
        name: impl Into<String>,
        parameters: P,
        constructor: impl Fn(&Arguments) -> anyhow::Result<C> + Send + Sync + 'static,
    ) -> CommandBuilder<C>
    where
        C: Any + Send + Sync,
        P: IntoIterator<Item = ParameterDescriptor>,
    {
        let name = name.into();
        CommandBuilder {
            name: name.clone(),
            about: String::new(),
            constructor: Signature::new(format!("command '{}'", name)).params(parameters),
            construct: Box::new(move |args| {
                constructor(args).map(|command| Arc::new(command) as Instance)
            }),
            configure: Vec::new(),
            _command: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn about(&self) -> &str {
        &self.about
    }

    pub fn constructor(&self) -> &Signature {
        &self.constructor
    }

    pub fn construct(&self, arguments: &Arguments) -> anyhow::Result<Instance> {
        (self.construct)(arguments)
    }

    /// `execute` 的签名
    pub fn execute_signature(&self) -> &Signature {
        &self.execute
    }

    pub fn execute(&self, instance: &Instance, arguments: &Arguments) -> anyhow::Result<i32> {
        (self.run)(instance, arguments)
    }

    /// 子命令的 clap 定义
    pub fn cli(&self) -> clap::Command {
        let command = clap::Command::new(self.name.clone()).about(self.about.clone());
        self.configure
            .iter()
            .fold(command, |command, configure| configure(command))
    }
}

impl fmt::Debug for CommandDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDefinition")
            .field("name", &self.name)
            .field("about", &self.about)
            .finish()
    }
}

/// 类型化的命令定义构建器
pub struct CommandBuilder<C> {
    name: String,
    about: String,
    constructor: Signature,
    construct: Box<ConstructFn>,
    configure: Vec<Box<ConfigureFn>>,
    _command: PhantomData<fn() -> C>,
}

impl<C: Any + Send + Sync> CommandBuilder<C> {
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    /// 用 `#[derive(clap::Args)]` 类型声明参数
    pub fn args<A: clap::Args + 'static>(mut self) -> Self {
        self.configure.push(Box::new(A::augment_args));
        self
    }

    /// 声明单个参数
    pub fn arg(mut self, arg: clap::Arg) -> Self {
        self.configure
            .push(Box::new(move |command| command.arg(arg.clone())));
        self
    }

    /// 设置 `execute` 并完成定义
    pub fn execute<P, F>(self, parameters: P, handler: F) -> CommandDefinition
    where
        P: IntoIterator<Item = ParameterDescriptor>,
        F: Fn(&C, &Arguments) -> anyhow::Result<i32> + Send + Sync + 'static,
    {
        let name = self.name.clone();
        CommandDefinition {
            execute: Signature::new(format!("{}::execute", self.name)).params(parameters),
            run: Box::new(move |instance, args| {
                let command = (**instance).downcast_ref::<C>().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Command {} is not of type {}",
                        name,
                        std::any::type_name::<C>()
                    )
                })?;
                handler(command, args)
            }),
            name: self.name,
            about: self.about,
            constructor: self.constructor,
            construct: self.construct,
            configure: self.configure,
        }
    }
}

/// 命令目录
#[derive(Clone, Default)]
pub struct CommandCatalog {
    commands: BTreeMap<String, Arc<CommandDefinition>>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 包含内置命令（`serve`、`routes`）的目录
    pub fn with_defaults() -> Self {
        Self::new()
            .with(crate::commands::serve::definition())
            .with(crate::commands::routes::definition())
    }

    /// 注册命令，同名的最后一次注册生效
    pub fn register(&mut self, definition: CommandDefinition) -> &mut Self {
        tracing::trace!(command = definition.name(), "Command registered");
        self.commands
            .insert(definition.name().to_string(), Arc::new(definition));
        self
    }

    pub fn with(mut self, definition: CommandDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandDefinition>> {
        self.commands.get(name).cloned()
    }

    /// 按名称排序
    pub fn names(&self) -> Vec<&str> {
        self.commands.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CommandDefinition>> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl fmt::Debug for CommandCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandCatalog")
            .field("commands", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Args, FromArgMatches};

    #[derive(Args, Debug)]
    struct GreetArgs {
        #[arg(long, default_value = "world")]
        name: String,
    }

    struct Greet;

    fn greet() -> CommandDefinition {
        CommandDefinition::build::<Greet, _>("greet", [], |_| Ok(Greet))
            .about("Say hello")
            .args::<GreetArgs>()
            .execute([ParameterDescriptor::new("code").of::<i32>()], |_, args| {
                Ok(*args.get::<i32>("code")?)
            })
    }

    #[test]
    fn test_cli_declares_args() {
        let definition = greet();
        let matches = definition
            .cli()
            .try_get_matches_from(["greet", "--name", "keel"])
            .unwrap();
        let args = GreetArgs::from_arg_matches(&matches).unwrap();

        assert_eq!(args.name, "keel");
        assert_eq!(definition.about(), "Say hello");
    }

    #[test]
    fn test_execute_downcasts_instance() {
        let definition = greet();
        let instance = definition.construct(&Arguments::new("greet")).unwrap();
        let mut arguments = Arguments::new("greet::execute");
        arguments.push("code", keel_core::Value::of(3i32));

        assert_eq!(definition.execute(&instance, &arguments).unwrap(), 3);
    }

    #[test]
    fn test_catalog_sorted_and_overridable() {
        let mut catalog = CommandCatalog::with_defaults();
        catalog.register(greet());
        catalog.register(greet());

        assert_eq!(catalog.names(), vec!["greet", "routes", "serve"]);
    }
}
