//! # Keel Console
//!
//! 命令行入口：命令的构造参数和 `execute` 参数与 HTTP 分发使用同一个参数解析器。

pub mod catalog;
pub mod commands;
pub mod console;
pub mod error;
pub mod events;
pub mod module;
pub mod output;

pub use catalog::{CommandBuilder, CommandCatalog, CommandDefinition};
pub use console::Console;
pub use error::ConsoleError;
pub use events::{CommandExecuted, CommandFailed, CommandStarting};
pub use module::ConsoleModule;
pub use output::{CapturedOutput, Output};

pub mod prelude {
    //! 预导入模块

    pub use crate::catalog::{CommandCatalog, CommandDefinition};
    pub use crate::console::Console;
    pub use crate::module::ConsoleModule;
    pub use crate::output::Output;

    pub use clap::{ArgMatches, Args, FromArgMatches};
}
