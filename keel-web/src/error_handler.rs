//! 全局错误处理中间件
//!
//! 管道的最外层单元，把所有错误转换为 HTTP 错误响应：
//!
//! - [`HttpFailure`] 按其状态码渲染，其他错误（包括 panic）先转换为 500
//! - 只记录 5xx，4xx 不记录
//! - `Accept` 包含 `application/json` 时返回 `{error, message, debug?}`，否则渲染
//!   `error.html`；模板渲染失败时退回纯文本消息
//! - `debug` 只在开启调试且状态为 5xx 时出现

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use http::{Method, StatusCode};
use serde_json::json;

use crate::error::HttpFailure;
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};
use crate::view::{ViewRenderer, ERROR_TEMPLATE};

/// 一次 5xx 失败的日志信息
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub status: StatusCode,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
    pub method: Method,
    pub path: String,
    /// 原始错误及其来源链
    pub causes: Vec<String>,
    /// 未经 `HttpFailure` 包装就到达错误处理中间件的错误
    pub unhandled: bool,
}

impl FailureReport {
    /// `HTTP 500 error: msg in file:line [GET /path]`
    pub fn summary(&self) -> String {
        format!(
            "HTTP {} error: {} in {}:{} [{} {}]",
            self.status.as_u16(),
            self.message,
            self.file,
            self.line,
            self.method,
            self.path
        )
    }
}

/// 错误日志记录器
pub trait FailureLogger: Send + Sync {
    fn log_failure(&self, report: &FailureReport);
}

/// 默认实现 - 输出到 tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFailureLogger;

impl FailureLogger for TracingFailureLogger {
    fn log_failure(&self, report: &FailureReport) {
        let caused_by = report.causes.join(": ");
        if report.unhandled {
            tracing::error!(
                status = report.status.as_u16(),
                method = %report.method,
                path = %report.path,
                error = %caused_by,
                "Unhandled exception: {}",
                caused_by
            );
            return;
        }

        if caused_by.is_empty() {
            tracing::error!(
                status = report.status.as_u16(),
                file = report.file,
                line = report.line,
                method = %report.method,
                path = %report.path,
                "{}",
                report.summary()
            );
        } else {
            tracing::error!(
                status = report.status.as_u16(),
                file = report.file,
                line = report.line,
                method = %report.method,
                path = %report.path,
                caused_by = %caused_by,
                "{}\nCaused by: {}",
                report.summary(),
                caused_by
            );
        }
    }
}

pub struct ErrorHandlerMiddleware {
    logger: Arc<dyn FailureLogger>,
    views: Option<Arc<dyn ViewRenderer>>,
    debug: bool,
}

impl ErrorHandlerMiddleware {
    pub fn new() -> Self {
        Self {
            logger: Arc::new(TracingFailureLogger),
            views: None,
            debug: false,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn FailureLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_views(mut self, views: Arc<dyn ViewRenderer>) -> Self {
        self.views = Some(views);
        self
    }

    /// 是否在 5xx 响应中附带调试信息
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 将失败转换为响应，此方法不会失败
    pub fn render(&self, failure: &HttpFailure, wants_json: bool) -> Response {
        let debug = (self.debug && failure.is_server_error()).then(|| debug_details(failure));

        let mut response = if wants_json {
            self.json_response(failure, debug)
        } else {
            self.html_response(failure, debug)
        };

        for (name, value) in failure.headers() {
            response.set_header(name, value);
        }
        response
    }

    fn json_response(&self, failure: &HttpFailure, debug: Option<serde_json::Value>) -> Response {
        let mut body = json!({
            "error": failure.kind().name(),
            "message": failure.message(),
        });
        if let Some(debug) = debug {
            body["debug"] = debug;
        }

        match Response::json(&body) {
            Ok(response) => response
                .with_status(failure.status())
                .with_header("content-type", "application/json; charset=utf-8"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode error body");
                Response::text(failure.message()).with_status(failure.status())
            }
        }
    }

    fn html_response(&self, failure: &HttpFailure, debug: Option<serde_json::Value>) -> Response {
        if let Some(views) = &self.views {
            let mut vars = json!({
                "code": failure.status().as_u16(),
                "message": failure.message(),
                "description": failure.kind().description(),
            });
            if let Some(debug) = debug {
                vars["debug"] = debug;
            }

            match views.render(ERROR_TEMPLATE, &vars) {
                Ok(html) => return Response::html(html).with_status(failure.status()),
                Err(e) => tracing::debug!(error = %e, "Error template unavailable, using plain text"),
            }
        }

        Response::text(failure.message()).with_status(failure.status())
    }

    fn report(&self, failure: &HttpFailure, method: &Method, path: &str, unhandled: bool) {
        let causes = failure
            .cause()
            .map(|cause| cause.chain().map(|e| e.to_string()).collect())
            .unwrap_or_default();

        self.logger.log_failure(&FailureReport {
            status: failure.status(),
            message: failure.message().to_string(),
            file: failure.location().file(),
            line: failure.location().line(),
            method: method.clone(),
            path: path.to_string(),
            causes,
            unhandled,
        });
    }
}

impl Default for ErrorHandlerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for ErrorHandlerMiddleware {
    fn name(&self) -> &str {
        "error_handler"
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        let method = request.method().clone();
        let path = request.path().to_string();
        let wants_json = request.accepts_json();

        let outcome = catch_unwind(AssertUnwindSafe(|| next.run(request)));

        let (failure, unhandled) = match outcome {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(error)) => match error.downcast::<HttpFailure>() {
                Ok(failure) => (failure, false),
                Err(error) => (HttpFailure::wrap(error), true),
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::debug!(method = %method, path = %path, error = %message, "Handler panicked");
                (HttpFailure::wrap(anyhow::anyhow!("panic: {}", message)), true)
            }
        };

        if failure.is_server_error() {
            self.report(&failure, &method, &path, unhandled);
        }

        Ok(self.render(&failure, wants_json))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic occurred".to_string()
    }
}

/// 调试信息 - 有原因时描述原因，否则描述失败本身
fn debug_details(failure: &HttpFailure) -> serde_json::Value {
    let location = failure.location();
    match failure.cause() {
        Some(cause) => json!({
            "exception": error_type_name(cause),
            "message": cause.to_string(),
            "file": location.file(),
            "line": location.line(),
            "chain": cause.chain().skip(1).map(|e| e.to_string()).collect::<Vec<_>>(),
            "trace": cause.backtrace().to_string(),
        }),
        None => json!({
            "exception": std::any::type_name::<HttpFailure>(),
            "message": failure.message(),
            "file": location.file(),
            "line": location.line(),
            "chain": Vec::<String>::new(),
            "trace": "",
        }),
    }
}

fn error_type_name(error: &anyhow::Error) -> &'static str {
    macro_rules! known {
        ($($ty:ty),*) => {
            $(
                if error.is::<$ty>() {
                    return std::any::type_name::<$ty>();
                }
            )*
        };
    }

    known!(
        HttpFailure,
        keel_core::ResolveError,
        keel_core::RegistryError,
        crate::view::TemplateError,
        serde_json::Error,
        std::io::Error
    );
    std::any::type_name::<anyhow::Error>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::pipeline::{middleware_fn, Pipeline};
    use crate::view::TeraRenderer;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingLogger {
        reports: Mutex<Vec<FailureReport>>,
    }

    impl FailureLogger for RecordingLogger {
        fn log_failure(&self, report: &FailureReport) {
            self.reports.lock().push(report.clone());
        }
    }

    fn pipeline(
        handler: ErrorHandlerMiddleware,
        error: fn() -> anyhow::Error,
    ) -> Pipeline {
        Pipeline::new()
            .with(handler)
            .with(middleware_fn("fail", move |_request: Request, _next| Err(error())))
    }

    fn json_body(response: &Response) -> serde_json::Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_client_error_as_json_not_logged() {
        let logger = Arc::new(RecordingLogger::default());
        let handler = ErrorHandlerMiddleware::new().with_logger(logger.clone());
        let request = Request::get("/missing").with_header("accept", "application/json");

        let response = pipeline(handler, || HttpFailure::not_found().into())
            .handle(request)
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(&response),
            json!({ "error": "Not Found", "message": "Not Found" })
        );
        assert!(logger.reports.lock().is_empty());
    }

    #[test]
    fn test_generic_error_logged_once_without_debug() {
        let logger = Arc::new(RecordingLogger::default());
        let handler = ErrorHandlerMiddleware::new().with_logger(logger.clone());
        let request = Request::get("/boom").with_header("accept", "application/json");

        let response = pipeline(handler, || anyhow::anyhow!("database offline"))
            .handle(request)
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(&response);
        assert_eq!(body["message"], "Internal Server Error");
        assert!(body.get("debug").is_none());

        let reports = logger.reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].unhandled);
        assert_eq!(reports[0].causes, vec!["database offline".to_string()]);
        assert_eq!(reports[0].path, "/boom");
    }

    #[test]
    fn test_debug_payload_for_server_errors_only() {
        let handler = ErrorHandlerMiddleware::new()
            .with_logger(Arc::new(RecordingLogger::default()))
            .with_debug(true);

        let server = handler.render(
            &HttpFailure::wrap(anyhow::anyhow!("database offline")),
            true,
        );
        let body = json_body(&server);
        assert_eq!(body["debug"]["message"], "database offline");
        assert!(body["debug"]["trace"].is_string());

        let client = handler.render(&HttpFailure::new(FailureKind::Forbidden), true);
        assert!(json_body(&client).get("debug").is_none());
    }

    #[test]
    fn test_html_error_page() {
        let handler = ErrorHandlerMiddleware::new().with_views(Arc::new(TeraRenderer::new()));
        let response = handler.render(&HttpFailure::not_found(), false);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.header("content-type").unwrap().starts_with("text/html"));
        assert!(response.body_text().contains("The page you are looking for does not exist."));
    }

    #[test]
    fn test_missing_template_falls_back_to_text() {
        struct Broken;
        impl ViewRenderer for Broken {
            fn render(
                &self,
                template: &str,
                _context: &serde_json::Value,
            ) -> Result<String, crate::view::TemplateError> {
                Err(crate::view::TemplateError::NotFound(template.to_string()))
            }

            fn exists(&self, _template: &str) -> bool {
                false
            }
        }

        let handler = ErrorHandlerMiddleware::new().with_views(Arc::new(Broken));
        let response = handler.render(&HttpFailure::unauthorized("Token has expired"), false);

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body_text(), "Token has expired");
    }

    #[test]
    fn test_failure_headers_are_copied() {
        let handler = ErrorHandlerMiddleware::new();
        let failure = HttpFailure::unauthorized("Invalid token")
            .with_header("WWW-Authenticate", "Bearer realm=\"API\"");
        let response = handler.render(&failure, true);
        assert_eq!(
            response.header("www-authenticate"),
            Some("Bearer realm=\"API\"")
        );
    }

    #[test]
    fn test_panic_becomes_server_error() {
        let logger = Arc::new(RecordingLogger::default());
        let pipeline = Pipeline::new()
            .with(ErrorHandlerMiddleware::new().with_logger(logger.clone()))
            .with(middleware_fn("panics", |_request: Request, _next| -> anyhow::Result<Response> {
                panic!("kaboom")
            }));

        let response = pipeline.handle(Request::get("/")).unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(logger.reports.lock().len(), 1);
    }

    /// 统计 ERROR 级别的事件
    #[derive(Clone, Default)]
    struct ErrorEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_panic_is_logged_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let errors = ErrorEvents::default();
        let subscriber = tracing_subscriber::registry().with(errors.clone());

        tracing::subscriber::with_default(subscriber, || {
            let pipeline = Pipeline::new()
                .with(ErrorHandlerMiddleware::new())
                .with(middleware_fn("panics", |_request: Request, _next| -> anyhow::Result<Response> {
                    panic!("kaboom")
                }));

            let response = pipeline.handle(Request::get("/")).unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        });

        assert_eq!(errors.0.load(Ordering::SeqCst), 1);
    }
}
