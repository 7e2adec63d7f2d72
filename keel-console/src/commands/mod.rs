//! 内置命令

pub mod routes;
pub mod serve;
