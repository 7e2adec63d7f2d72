//! Web 层常量定义
//!
//! 请求属性名称与框架读取的配置键

// ==================== 请求属性 ====================

/// 路由匹配结果
pub const ROUTE_MATCH_ATTRIBUTE: &str = "_route_match";

/// 认证通过后的 JWT claims
pub const AUTH_ATTRIBUTE: &str = "_auth_claims";

/// 当前会话
pub const SESSION_ATTRIBUTE: &str = "_session";

/// 客户端 IP
pub const CLIENT_IP_ATTRIBUTE: &str = "client-ip";

// ==================== App 配置 ====================

/// 控制器默认命名空间
pub const CONTROLLER_NAMESPACE: &str = "app.controllers.namespace";

/// 默认控制器命名空间取值
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "app::controllers";

// ==================== HTTP 配置 ====================

/// 中间件标识列表（有序）
pub const HTTP_MIDDLEWARE: &str = "http.middleware";

/// 未配置时的中间件列表
pub const DEFAULT_MIDDLEWARE: &[&str] = &["error_handler", "session", "routing", "dispatcher"];

// ==================== Server 配置 ====================

pub const SERVER_HOST: &str = "server.host";

pub const SERVER_PORT: &str = "server.port";

/// 请求体大小上限（字节）
pub const SERVER_BODY_LIMIT: &str = "server.body-limit";

// ==================== View 配置 ====================

/// 模板目录，未配置时不注册视图渲染器
pub const VIEW_TEMPLATE_DIR: &str = "view.template_dir";

// ==================== CORS 配置 ====================

pub const CORS_ALLOWED_ORIGINS: &str = "cors.allowed_origins";
pub const CORS_ALLOWED_METHODS: &str = "cors.allowed_methods";
pub const CORS_ALLOWED_HEADERS: &str = "cors.allowed_headers";
pub const CORS_EXPOSED_HEADERS: &str = "cors.exposed_headers";
pub const CORS_MAX_AGE: &str = "cors.max_age";
pub const CORS_ALLOW_CREDENTIALS: &str = "cors.allow_credentials";
pub const CORS_INCLUDE: &str = "cors.include";
pub const CORS_EXCLUDE: &str = "cors.exclude";

// ==================== Auth 配置 ====================

pub const AUTH_JWT_SECRET: &str = "auth.jwt.secret";
pub const AUTH_JWT_ALGORITHM: &str = "auth.jwt.algorithm";
pub const AUTH_REQUIRED: &str = "auth.middleware.required";
pub const AUTH_INCLUDE: &str = "auth.middleware.include";
pub const AUTH_EXCLUDE: &str = "auth.middleware.exclude";
pub const AUTH_HEADER: &str = "auth.middleware.header";
pub const AUTH_PREFIX: &str = "auth.middleware.prefix";

// ==================== Proxy 配置 ====================

/// 受信任的代理地址（IP 或 CIDR）
pub const PROXIES_TRUSTED: &str = "proxies.trusted";

/// 读取客户端 IP 的请求头（按优先级）
pub const PROXIES_HEADERS: &str = "proxies.headers";

// ==================== Session 配置 ====================

pub const SESSION_COOKIE_NAME: &str = "session.cookie.name";
pub const SESSION_COOKIE_LIFETIME: &str = "session.cookie.lifetime";
pub const SESSION_COOKIE_PATH: &str = "session.cookie.path";
pub const SESSION_COOKIE_DOMAIN: &str = "session.cookie.domain";
pub const SESSION_COOKIE_SECURE: &str = "session.cookie.secure";
pub const SESSION_COOKIE_HTTPONLY: &str = "session.cookie.httponly";
pub const SESSION_COOKIE_SAMESITE: &str = "session.cookie.samesite";
