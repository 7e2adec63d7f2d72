//! 控制台入口
//!
//! 解析命令行，构造命令实例（构造参数通过参数解析器注入），再解析 `execute` 的参数并执行。
//! 上下文中提供 `output`（[`Output`]）与 `matches`（子命令的 `clap::ArgMatches`）。

use std::ffi::OsString;
use std::sync::Arc;

use clap::error::ErrorKind;
use keel_core::{EventDispatcher, Instance, Registry, ResolutionContext, Resolver, Value};

use crate::catalog::{CommandCatalog, CommandDefinition};
use crate::error::ConsoleError;
use crate::events::{CommandExecuted, CommandFailed, CommandStarting};
use crate::output::Output;

/// 控制台
pub struct Console {
    name: String,
    registry: Arc<Registry>,
    catalog: Arc<CommandCatalog>,
    output: Arc<Output>,
    events: Option<Arc<EventDispatcher>>,
}

impl Console {
    /// 使用注册表中的命令目录，未注册时使用内置命令
    pub fn new(registry: Arc<Registry>) -> Self {
        let catalog = registry
            .resolve_type::<CommandCatalog>()
            .unwrap_or_else(|_| Arc::new(CommandCatalog::with_defaults()));
        let events = registry
            .has_type::<EventDispatcher>()
            .then(|| registry.resolve_type::<EventDispatcher>().ok())
            .flatten();

        Self {
            name: "keel".to_string(),
            registry,
            catalog,
            output: Arc::new(Output::stdio()),
            events,
        }
    }

    /// 程序名称（帮助信息中使用）
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_catalog(mut self, catalog: CommandCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = Arc::new(output);
        self
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    fn cli(&self) -> clap::Command {
        clap::Command::new(self.name.clone())
            .subcommand_required(false)
            .subcommands(self.catalog.iter().map(|definition| definition.cli()))
    }

    /// 运行控制台，返回进程退出码
    ///
    /// `argv` 的第一个元素是程序名称。没有给出命令时列出所有命令并返回 0；
    /// 未知命令返回 1；命令失败时输出 `Error: <message>` 并返回 1。
    pub fn run<I, T>(&self, argv: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut cli = self.cli();
        let matches = match cli.try_get_matches_from_mut(argv) {
            Ok(matches) => matches,
            Err(e) => return self.usage_error(&mut cli, e),
        };

        let Some((name, sub_matches)) = matches.subcommand() else {
            self.output.write(&cli.render_help().to_string());
            return 0;
        };

        let Some(definition) = self.catalog.get(name) else {
            self.output.error(&ConsoleError::UnknownCommand(name.to_string()).to_string());
            return 1;
        };

        match self.execute(&definition, sub_matches.clone()) {
            Ok(code) => code,
            Err(error) => {
                tracing::debug!("{}", error);
                1
            }
        }
    }

    fn usage_error(&self, cli: &mut clap::Command, error: clap::Error) -> i32 {
        match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                self.output.write(&error.render().to_string());
                0
            }
            ErrorKind::InvalidSubcommand => {
                let name = error
                    .get(clap::error::ContextKind::InvalidSubcommand)
                    .map(|value| value.to_string())
                    .unwrap_or_default();
                self.output.error(&ConsoleError::UnknownCommand(name).to_string());
                self.output.writeln("");
                self.output.write(&cli.render_help().to_string());
                1
            }
            _ => {
                self.output.error(&ConsoleError::Usage(error).to_string());
                2
            }
        }
    }

    /// 构造并执行一个命令
    ///
    /// # Errors
    ///
    /// 构造或执行失败时返回 [`ConsoleError::Failed`]，此时已经输出 `Error: <message>`。
    pub fn execute(
        &self,
        definition: &CommandDefinition,
        matches: clap::ArgMatches,
    ) -> Result<i32, ConsoleError> {
        let command = definition.name().to_string();
        tracing::debug!(command = %command, "Executing command");
        self.emit(&CommandStarting {
            command: command.clone(),
        });

        match self.invoke(definition, matches) {
            Ok(exit_code) => {
                self.emit(&CommandExecuted {
                    command: command.clone(),
                    exit_code,
                });
                Ok(exit_code)
            }
            Err(error) => {
                self.output.error(&format!("Error: {}", error));
                self.emit(&CommandFailed {
                    command: command.clone(),
                    message: error.to_string(),
                });
                Err(ConsoleError::Failed {
                    command,
                    source: error,
                })
            }
        }
    }

    fn invoke(&self, definition: &CommandDefinition, matches: clap::ArgMatches) -> anyhow::Result<i32> {
        let resolver = Resolver::new(Arc::clone(&self.registry));

        let constructor_args = resolver.resolve(definition.constructor(), &ResolutionContext::new())?;
        let instance = definition.construct(&constructor_args)?;

        let context = ResolutionContext::new()
            .with("output", Value::Instance(Arc::clone(&self.output) as Instance))
            .with("matches", Value::of(matches));
        let arguments = resolver.resolve(definition.execute_signature(), &context)?;

        definition.execute(&instance, &arguments)
    }

    fn emit(&self, event: &dyn keel_core::Event) {
        if let Some(events) = &self.events {
            events.dispatch(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::CapturedOutput;
    use keel_core::{ParameterDescriptor, TypeKey};
    use keel_web::router::{RouteTable, SharedRouter};
    use parking_lot::Mutex;

    struct Fail;

    struct Greeter {
        greeting: Arc<String>,
    }

    fn catalog() -> CommandCatalog {
        CommandCatalog::with_defaults()
            .with(
                CommandDefinition::build::<Greeter, _>(
                    "greet",
                    [ParameterDescriptor::new("greeting").of::<String>()],
                    |args| {
                        Ok(Greeter {
                            greeting: args.get::<String>("greeting")?,
                        })
                    },
                )
                .arg(clap::Arg::new("name").required(true))
                .execute(
                    [
                        ParameterDescriptor::new("output").of::<Output>(),
                        ParameterDescriptor::new("matches").of::<clap::ArgMatches>(),
                    ],
                    |greeter, args| {
                        let matches = args.get::<clap::ArgMatches>("matches")?;
                        let name = matches
                            .get_one::<String>("name")
                            .cloned()
                            .unwrap_or_default();
                        args.get::<Output>("output")?
                            .writeln(&format!("{}, {}", greeter.greeting, name));
                        Ok(0)
                    },
                ),
            )
            .with(
                CommandDefinition::build::<Fail, _>("fail", [], |_| Ok(Fail))
                    .execute([], |_, _| anyhow::bail!("disk full")),
            )
    }

    fn console(registry: Arc<Registry>) -> (Console, CapturedOutput) {
        let (output, captured) = Output::captured();
        let console = Console::new(registry)
            .with_catalog(catalog())
            .with_output(output);
        (console, captured)
    }

    fn registry() -> Arc<Registry> {
        let registry = Registry::new();
        registry.register_instance("greeting", "Hello".to_string());
        registry
    }

    #[test]
    fn test_constructor_and_execute_are_resolved() {
        let (console, captured) = console(registry());
        assert_eq!(console.run(["keel", "greet", "keel"]), 0);
        assert_eq!(captured.stdout(), "Hello, keel\n");
    }

    #[test]
    fn test_failure_prints_error_and_exits_1() {
        let events = Arc::new(EventDispatcher::new());
        let failures = Arc::new(Mutex::new(Vec::new()));
        {
            let failures = Arc::clone(&failures);
            events.listen::<CommandFailed, _>(move |event| {
                failures.lock().push(event.message.clone());
            });
        }
        let registry = registry();
        registry.register_arc(TypeKey::of::<EventDispatcher>(), events);

        let (console, captured) = console(registry);
        assert_eq!(console.run(["keel", "fail"]), 1);
        assert_eq!(captured.stderr(), "Error: disk full\n");
        assert_eq!(*failures.lock(), vec!["disk full"]);
    }

    #[test]
    fn test_unresolvable_constructor_fails() {
        let (console, captured) = console(Registry::new());
        assert_eq!(console.run(["keel", "greet", "keel"]), 1);
        assert!(captured.stderr().starts_with("Error: Cannot resolve required parameter 'greeting'"));
    }

    #[test]
    fn test_no_command_lists_commands() {
        let (console, captured) = console(registry());
        assert_eq!(console.run(["keel"]), 0);

        let help = captured.stdout();
        assert!(help.contains("greet"));
        assert!(help.contains("routes"));
        assert!(help.contains("serve"));
    }

    #[test]
    fn test_unknown_command() {
        let (console, captured) = console(registry());
        assert_eq!(console.run(["keel", "nope"]), 1);
        assert!(captured.stderr().contains("Command 'nope' not found."));
    }

    #[test]
    fn test_lifecycle_events() {
        let events = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            events.listen::<CommandStarting, _>(move |event| {
                seen.lock().push(format!("starting {}", event.command));
            });
        }
        {
            let seen = Arc::clone(&seen);
            events.listen::<CommandExecuted, _>(move |event| {
                seen.lock().push(format!("executed {} {}", event.command, event.exit_code));
            });
        }
        let registry = registry();
        registry.register_arc(TypeKey::of::<EventDispatcher>(), events);

        let (console, _) = console(registry);
        console.run(["keel", "greet", "x"]);
        assert_eq!(*seen.lock(), vec!["starting greet", "executed greet 0"]);
    }

    #[test]
    fn test_routes_command() {
        let registry = registry();
        let mut routes = RouteTable::new();
        routes.get("/users/{id}", "UsersController@show").unwrap();
        let router: SharedRouter = Arc::new(routes);
        registry.register_instance(TypeKey::of::<SharedRouter>(), router);

        let (console, captured) = console(registry);
        assert_eq!(console.run(["keel", "routes"]), 0);

        let table = captured.stdout();
        assert!(table.starts_with("METHOD"));
        assert!(table.contains("/users/{id}"));
        assert!(table.contains("UsersController@show"));
    }
}
