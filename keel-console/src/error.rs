//! 控制台错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    /// 命令目录中没有该名称
    #[error("Command '{0}' not found.")]
    UnknownCommand(String),

    /// 命令行参数无法解析
    #[error(transparent)]
    Usage(#[from] clap::Error),

    /// 命令执行失败（原始错误保留为 source）
    #[error("Command '{command}' failed: {source}")]
    Failed {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}
