//! CORS 中间件
//!
//! 预检请求（`OPTIONS`）直接返回 204；普通请求在响应上追加 CORS 头。
//! include / exclude 按路径前缀匹配，被排除的路径原样放行。

use http::Method;
use keel_core::Environment;

use crate::constants::*;
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};

/// `*` 或显式列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList {
    Any,
    Only(Vec<String>),
}

impl AllowList {
    fn from_values(values: Vec<String>) -> Self {
        if values.iter().any(|value| value == "*") {
            AllowList::Any
        } else {
            AllowList::Only(values)
        }
    }
}

/// CORS 配置
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: AllowList,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: AllowList,
    pub exposed_headers: Vec<String>,
    /// 预检结果缓存秒数，0 表示不发送
    pub max_age: i64,
    pub allow_credentials: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: AllowList::Any,
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: AllowList::Any,
            exposed_headers: Vec::new(),
            max_age: 86400,
            allow_credentials: false,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl CorsConfig {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        let methods: Vec<&str> = defaults.allowed_methods.iter().map(String::as_str).collect();

        Self {
            allowed_origins: AllowList::from_values(
                env.get_string_array_or(CORS_ALLOWED_ORIGINS, &["*"]),
            ),
            allowed_methods: env.get_string_array_or(CORS_ALLOWED_METHODS, &methods),
            allowed_headers: AllowList::from_values(
                env.get_string_array_or(CORS_ALLOWED_HEADERS, &["*"]),
            ),
            exposed_headers: env.get_string_array_or(CORS_EXPOSED_HEADERS, &[]),
            max_age: env.get_i64_or(CORS_MAX_AGE, defaults.max_age),
            allow_credentials: env.get_bool_or(CORS_ALLOW_CREDENTIALS, false),
            include: env.get_string_array_or(CORS_INCLUDE, &[]),
            exclude: env.get_string_array_or(CORS_EXCLUDE, &[]),
        }
    }

    fn applies_to(&self, path: &str) -> bool {
        if self.exclude.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        match &self.allowed_origins {
            AllowList::Any => true,
            AllowList::Only(origins) => origins.iter().any(|allowed| allowed == origin),
        }
    }

    /// 允许携带凭证时不能返回 `*`，回显请求的 origin
    fn origin_header(&self, origin: &str) -> String {
        match &self.allowed_origins {
            AllowList::Any if self.allow_credentials => origin.to_string(),
            AllowList::Any => "*".to_string(),
            AllowList::Only(_) => origin.to_string(),
        }
    }

    /// 请求的头与允许列表取交集
    fn allowed_request_headers(&self, requested: &str) -> String {
        match &self.allowed_headers {
            AllowList::Any => requested.to_string(),
            AllowList::Only(allowed) => requested
                .split(',')
                .map(str::trim)
                .filter(|header| {
                    allowed
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(header))
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn preflight(&self, request: &Request) -> Response {
        let config = &self.config;
        let mut response = Response::no_content();
        let origin = request.header("origin").unwrap_or_default();

        if config.is_origin_allowed(&origin) {
            response.set_header("access-control-allow-origin", &config.origin_header(&origin));
        }

        if !config.allowed_methods.is_empty() {
            response.set_header(
                "access-control-allow-methods",
                &config.allowed_methods.join(", "),
            );
        }

        match request
            .header("access-control-request-headers")
            .filter(|headers| !headers.is_empty())
        {
            Some(requested) => response.set_header(
                "access-control-allow-headers",
                &config.allowed_request_headers(&requested),
            ),
            None => {
                if let AllowList::Only(headers) = &config.allowed_headers {
                    response.set_header("access-control-allow-headers", &headers.join(", "));
                }
            }
        }

        if config.max_age > 0 {
            response.set_header("access-control-max-age", &config.max_age.to_string());
        }
        if config.allow_credentials {
            response.set_header("access-control-allow-credentials", "true");
        }
        response
    }

    fn decorate(&self, origin: &str, response: &mut Response) {
        let config = &self.config;
        if config.is_origin_allowed(origin) {
            response.set_header("access-control-allow-origin", &config.origin_header(origin));
        }
        if !config.exposed_headers.is_empty() {
            response.set_header(
                "access-control-expose-headers",
                &config.exposed_headers.join(", "),
            );
        }
        if config.allow_credentials {
            response.set_header("access-control-allow-credentials", "true");
        }
    }
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &str {
        "cors"
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        if !self.config.applies_to(request.path()) {
            return next.run(request);
        }

        if request.method() == Method::OPTIONS {
            tracing::trace!(path = request.path(), "Answering CORS preflight");
            return Ok(self.preflight(&request));
        }

        let origin = request.header("origin").unwrap_or_default();
        let mut response = next.run(request)?;
        self.decorate(&origin, &mut response);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{middleware_fn, Pipeline};
    use http::StatusCode;

    fn pipeline(config: CorsConfig) -> Pipeline {
        Pipeline::new()
            .with(CorsMiddleware::new(config))
            .with(middleware_fn("ok", |_request: Request, _next| Ok(Response::text("ok"))))
    }

    #[test]
    fn test_preflight() {
        let request = Request::build(Method::OPTIONS, "/api/users")
            .with_header("origin", "https://app.example")
            .with_header("access-control-request-headers", "X-Token, Content-Type");
        let response = pipeline(CorsConfig::default()).handle(request).unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            response.header("access-control-allow-headers"),
            Some("X-Token, Content-Type")
        );
        assert_eq!(response.header("access-control-max-age"), Some("86400"));
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_requested_headers_intersected() {
        let config = CorsConfig {
            allowed_headers: AllowList::Only(vec!["content-type".to_string()]),
            ..CorsConfig::default()
        };
        let request = Request::build(Method::OPTIONS, "/")
            .with_header("origin", "https://app.example")
            .with_header("access-control-request-headers", "X-Token, Content-Type");
        let response = pipeline(config).handle(request).unwrap();
        assert_eq!(
            response.header("access-control-allow-headers"),
            Some("Content-Type")
        );
    }

    #[test]
    fn test_credentials_echo_origin() {
        let config = CorsConfig {
            allow_credentials: true,
            exposed_headers: vec!["X-Total".to_string()],
            ..CorsConfig::default()
        };
        let request = Request::get("/").with_header("origin", "https://app.example");
        let response = pipeline(config).handle(request).unwrap();

        assert_eq!(response.body_text(), "ok");
        assert_eq!(
            response.header("access-control-allow-origin"),
            Some("https://app.example")
        );
        assert_eq!(response.header("access-control-allow-credentials"), Some("true"));
        assert_eq!(response.header("access-control-expose-headers"), Some("X-Total"));
    }

    #[test]
    fn test_origin_not_in_list() {
        let config = CorsConfig {
            allowed_origins: AllowList::Only(vec!["https://good.example".to_string()]),
            ..CorsConfig::default()
        };
        let request = Request::get("/").with_header("origin", "https://evil.example");
        let response = pipeline(config).handle(request).unwrap();
        assert!(response.header("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_excluded_path_passes_through() {
        let config = CorsConfig {
            exclude: vec!["/internal".to_string()],
            ..CorsConfig::default()
        };
        let request = Request::build(Method::OPTIONS, "/internal/health");
        let response = pipeline(config).handle(request).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_text(), "ok");
    }
}
