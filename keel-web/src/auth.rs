//! JWT 认证中间件
//!
//! 从请求头提取 bearer token，校验后把 claims 存入 `_auth_claims` 属性。
//! 路径规则：精确匹配；以 `*` 结尾按前缀匹配；否则 `pattern/` 开头的路径也匹配。

use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use keel_core::{Environment, Value};
use serde::Serialize;
use thiserror::Error;

use crate::constants::*;
use crate::error::HttpFailure;
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};

/// Token 校验错误
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("invalid token: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        match error.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::Invalid(error.to_string()),
        }
    }
}

/// 认证通过后的 claims
#[derive(Debug, Clone)]
pub struct Claims(serde_json::Value);

impl Claims {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// 从请求属性中取出 claims
    pub fn from_request(request: &Request) -> Option<Arc<Claims>> {
        request.attribute_as::<Claims>(AUTH_ATTRIBUTE)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// `sub` claim
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(|value| value.as_str())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Token 解码器
pub trait TokenDecoder: Send + Sync {
    fn decode(&self, token: &str) -> Result<Claims, TokenError>;
}

/// 基于 `jsonwebtoken` 的 HMAC 实现
pub struct JwtDecoder {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtDecoder {
    pub fn hmac(secret: &str, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        // 只校验签名和出现的时间类 claims，不强制要求 exp
        validation.required_spec_claims.clear();

        Self {
            algorithm,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// 从 Environment 加载（`auth.jwt.secret`、`auth.jwt.algorithm`）
    pub fn from_environment(env: &Environment) -> anyhow::Result<Self> {
        let secret = env
            .get_string(AUTH_JWT_SECRET)
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Configuration '{}' is required", AUTH_JWT_SECRET))?;
        let algorithm = env.get_string_or(AUTH_JWT_ALGORITHM, "HS256");
        let algorithm = Algorithm::from_str(&algorithm)
            .map_err(|e| anyhow::anyhow!("Unsupported JWT algorithm '{}': {}", algorithm, e))?;

        Ok(Self::hmac(&secret, algorithm))
    }

    /// 签发 token
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key).map_err(TokenError::from)
    }
}

impl TokenDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let data = decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)?;
        Ok(Claims(data.claims))
    }
}

/// 认证配置
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// 为空时所有路径都需要认证
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub header: String,
    pub prefix: String,
    /// 为 false 时缺少 token 的请求直接放行
    pub required: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            header: "Authorization".to_string(),
            prefix: "Bearer".to_string(),
            required: true,
        }
    }
}

impl AuthConfig {
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            include: env.get_string_array_or(AUTH_INCLUDE, &[]),
            exclude: env.get_string_array_or(AUTH_EXCLUDE, &[]),
            header: env.get_string_or(AUTH_HEADER, "Authorization"),
            prefix: env.get_string_or(AUTH_PREFIX, "Bearer"),
            required: env.get_bool_or(AUTH_REQUIRED, true),
        }
    }

    /// 是否需要对该路径进行认证
    pub fn applies_to(&self, path: &str) -> bool {
        if self.exclude.iter().any(|pattern| path_matches(path, pattern)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|pattern| path_matches(path, pattern))
    }
}

/// 路径匹配：精确、`*` 前缀或目录前缀
pub fn path_matches(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix('*') {
        let prefix = prefix.trim_end_matches('*');
        if prefix.is_empty() || path.starts_with(prefix) {
            return true;
        }
    }

    !pattern.ends_with('/')
        && path
            .strip_prefix(pattern)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub struct AuthMiddleware {
    decoder: Arc<dyn TokenDecoder>,
    config: AuthConfig,
}

impl AuthMiddleware {
    pub fn new(decoder: Arc<dyn TokenDecoder>, config: AuthConfig) -> Self {
        Self { decoder, config }
    }

    fn extract_token(&self, request: &Request) -> Option<String> {
        let header = request.header(&self.config.header)?;
        let prefix = format!("{} ", self.config.prefix);
        let token = header.strip_prefix(&prefix)?.trim();
        (!token.is_empty()).then(|| token.to_string())
    }

    fn unauthorized(&self, message: &str) -> HttpFailure {
        HttpFailure::unauthorized(message).with_header(
            "WWW-Authenticate",
            format!("{} realm=\"API\"", self.config.prefix),
        )
    }
}

impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        if !self.config.applies_to(request.path()) {
            return next.run(request);
        }

        let Some(token) = self.extract_token(&request) else {
            if !self.config.required {
                return next.run(request);
            }
            tracing::debug!(path = request.path(), "Missing authentication token");
            return Err(self.unauthorized("Missing authentication token").into());
        };

        match self.decoder.decode(&token) {
            Ok(claims) => {
                tracing::trace!(path = request.path(), subject = ?claims.subject(), "Token accepted");
                next.run(request.with_attribute(AUTH_ATTRIBUTE, Value::of(claims)))
            }
            Err(error) => {
                tracing::debug!(path = request.path(), error = %error, "Token rejected");
                let message = match &error {
                    TokenError::Expired => "Token has expired",
                    TokenError::InvalidSignature => "Invalid token signature",
                    TokenError::Invalid(_) => "Invalid token",
                };
                Err(self.unauthorized(message).caused_by(error).into())
            }
        }
    }
}
