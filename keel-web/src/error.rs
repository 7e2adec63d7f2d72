//! HTTP 失败类型
//!
//! [`HttpFailure`] 是唯一可以决定客户端可见响应的错误类型。其他错误在离开错误处理
//! 中间件之前都会被包装为 500。失败在管道中以 `anyhow::Error` 传递，通过
//! `downcast` 恢复。

use std::fmt;
use std::panic::Location;

use http::StatusCode;
use thiserror::Error;

/// 失败的来源分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 4xx - 客户端造成，可恢复的信号
    Client,
    /// 5xx - 服务端缺陷
    Server,
}

/// 失败种类 - 封闭集合，每种都有固定的名称、默认消息与描述
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    UnprocessableEntity,
    TooManyRequests,
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
}

impl FailureKind {
    pub const ALL: [FailureKind; 10] = [
        FailureKind::BadRequest,
        FailureKind::Unauthorized,
        FailureKind::Forbidden,
        FailureKind::NotFound,
        FailureKind::MethodNotAllowed,
        FailureKind::UnprocessableEntity,
        FailureKind::TooManyRequests,
        FailureKind::InternalServerError,
        FailureKind::BadGateway,
        FailureKind::ServiceUnavailable,
    ];

    pub fn status(&self) -> StatusCode {
        match self {
            FailureKind::BadRequest => StatusCode::BAD_REQUEST,
            FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
            FailureKind::Forbidden => StatusCode::FORBIDDEN,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            FailureKind::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            FailureKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            FailureKind::BadGateway => StatusCode::BAD_GATEWAY,
            FailureKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// 按状态码查找种类
    pub fn from_status(status: StatusCode) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.status() == status)
    }

    /// 错误名称，用于 JSON 响应的 `error` 字段
    pub fn name(&self) -> &'static str {
        match self {
            FailureKind::BadRequest => "Bad Request",
            FailureKind::Unauthorized => "Unauthorized",
            FailureKind::Forbidden => "Forbidden",
            FailureKind::NotFound => "Not Found",
            FailureKind::MethodNotAllowed => "Method Not Allowed",
            FailureKind::UnprocessableEntity => "Unprocessable Entity",
            FailureKind::TooManyRequests => "Too Many Requests",
            FailureKind::InternalServerError => "Internal Server Error",
            FailureKind::BadGateway => "Bad Gateway",
            FailureKind::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// 未指定消息时使用的默认消息
    pub fn default_message(&self) -> &'static str {
        self.name()
    }

    /// 面向用户的说明，用于 HTML 错误页
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::BadRequest => "The request was invalid or malformed.",
            FailureKind::Unauthorized => "Authentication is required to access this resource.",
            FailureKind::Forbidden => "You do not have permission to access this resource.",
            FailureKind::NotFound => "The page you are looking for does not exist.",
            FailureKind::MethodNotAllowed => "The request method is not allowed for this resource.",
            FailureKind::UnprocessableEntity => {
                "The request was well-formed but contains semantic errors."
            }
            FailureKind::TooManyRequests => "Too many requests. Please try again later.",
            FailureKind::InternalServerError => {
                "Something went wrong on our end. Please try again later."
            }
            FailureKind::BadGateway => {
                "The server received an invalid response from an upstream server."
            }
            FailureKind::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again later."
            }
        }
    }

    pub fn class(&self) -> FailureClass {
        if self.status().is_server_error() {
            FailureClass::Server
        } else {
            FailureClass::Client
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status().as_u16(), self.name())
    }
}

/// HTTP 失败
///
/// 构造函数记录调用位置，日志与调试输出中用来定位失败的来源。
#[derive(Debug)]
pub struct HttpFailure {
    kind: FailureKind,
    message: String,
    headers: Vec<(String, String)>,
    cause: Option<anyhow::Error>,
    location: &'static Location<'static>,
}

impl HttpFailure {
    #[track_caller]
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            headers: Vec::new(),
            cause: None,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn with_message(kind: FailureKind, message: impl Into<String>) -> Self {
        let mut failure = Self::new(kind);
        let message = message.into();
        if !message.is_empty() {
            failure.message = message;
        }
        failure
    }

    #[track_caller]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message(FailureKind::BadRequest, message)
    }

    #[track_caller]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_message(FailureKind::Unauthorized, message)
    }

    #[track_caller]
    pub fn not_found() -> Self {
        Self::new(FailureKind::NotFound)
    }

    #[track_caller]
    pub fn method_not_allowed() -> Self {
        Self::new(FailureKind::MethodNotAllowed)
    }

    #[track_caller]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::with_message(FailureKind::UnprocessableEntity, message)
    }

    #[track_caller]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(FailureKind::InternalServerError, message)
    }

    /// 将任意错误包装为 500，原始错误保留为 `cause`
    #[track_caller]
    pub fn wrap(cause: anyhow::Error) -> Self {
        Self::new(FailureKind::InternalServerError).caused_by(cause)
    }

    /// 从 `anyhow::Error` 恢复失败；不是 `HttpFailure` 的错误包装为 500
    #[track_caller]
    pub fn from_error(error: anyhow::Error) -> Self {
        match error.downcast::<HttpFailure>() {
            Ok(failure) => failure,
            Err(other) => Self::wrap(other),
        }
    }

    pub fn caused_by(mut self, cause: impl Into<anyhow::Error>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }

    pub fn is_server_error(&self) -> bool {
        self.class() == FailureClass::Server
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.cause.as_ref()
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status().as_u16(), self.message)
    }
}

impl std::error::Error for HttpFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn std::error::Error + 'static))
    }
}

/// 管道错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 所有中间件都调用了 `next`，没有任何单元产生响应
    #[error("no unit produced a response")]
    Exhausted,

    #[error("Middleware '{0}' is not registered")]
    UnknownMiddleware(String),
}
