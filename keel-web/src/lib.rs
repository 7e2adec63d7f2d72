//! # Keel Web
//!
//! 同步中间件管道之上的 Web 层，服务器部分基于 Axum
//!
//! ## 核心特性
//!
//! - **中间件管道** - 按配置顺序构建，单元通过构造函数注入获取依赖
//! - **路由与分发** - 路由参数作为额外的解析层级注入处理函数
//! - **集中错误处理** - 4xx/5xx 区分、内容协商、可选调试信息
//! - **可选单元** - 会话、JWT 认证、CORS、客户端 IP

pub mod auth;
pub mod catalog;
pub mod client_ip;
pub mod constants;
pub mod controller;
pub mod cors;
pub mod dispatcher;
pub mod entrypoint;
pub mod error;
pub mod error_handler;
pub mod events;
pub mod http;
pub mod module;
pub mod pipeline;
pub mod reply;
pub mod router;
pub mod routing;
pub mod server;
pub mod session;
pub mod view;

pub use catalog::{MiddlewareCatalog, UnitDefinition};
pub use controller::{ControllerCatalog, ControllerDefinition};
pub use entrypoint::WebEntrypoint;
pub use error::{FailureClass, FailureKind, HttpFailure, PipelineError};
pub use crate::http::{Request, Response};
pub use module::HttpModule;
pub use pipeline::{Middleware, Next, Pipeline};
pub use reply::{IntoReply, Reply};
pub use router::{Handler, MatchResult, RouteTable, Router, SharedRouter};
pub use server::{KeelServer, ServerProperties};

pub mod prelude {
    //! 预导入模块

    pub use crate::controller::{
        ControllerCatalog, ControllerDefinition, Redirectable, Renderable, Validatable,
    };
    pub use crate::entrypoint::WebEntrypoint;
    pub use crate::error::{FailureKind, HttpFailure};
    pub use crate::http::{Request, Response};
    pub use crate::module::HttpModule;
    pub use crate::pipeline::{middleware_fn, Middleware, Next};
    pub use crate::reply::{IntoReply, Reply};
    pub use crate::router::{Handler, RouteTable};
    pub use crate::server::KeelServer;
    pub use crate::session::Session;
    pub use crate::view::{ViewContext, ViewRenderer};

    pub use ::http::{Method, StatusCode};
}
