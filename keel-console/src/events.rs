//! 命令生命周期事件

use std::any::Any;

use keel_core::Event;

/// 命令即将执行
#[derive(Debug, Clone)]
pub struct CommandStarting {
    pub command: String,
}

impl Event for CommandStarting {
    fn event_name(&self) -> &'static str {
        "CommandStarting"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 命令执行完成
#[derive(Debug, Clone)]
pub struct CommandExecuted {
    pub command: String,
    pub exit_code: i32,
}

impl Event for CommandExecuted {
    fn event_name(&self) -> &'static str {
        "CommandExecuted"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 命令执行失败
#[derive(Debug, Clone)]
pub struct CommandFailed {
    pub command: String,
    pub message: String,
}

impl Event for CommandFailed {
    fn event_name(&self) -> &'static str {
        "CommandFailed"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
