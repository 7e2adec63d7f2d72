//! 会话中间件
//!
//! 通过 cookie 识别会话，会话句柄以 `_session` 属性随请求传递，处理函数从请求中读取，
//! 不使用进程级的全局状态。默认存储在内存中，过期时间由 cookie 生命周期决定。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use keel_core::{Environment, Instance, Value};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::constants::*;
use crate::http::{Request, Response};
use crate::pipeline::{Middleware, Next};

/// 会话句柄
#[derive(Debug)]
pub struct Session {
    id: String,
    is_new: bool,
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl Session {
    fn new(id: String, is_new: bool) -> Self {
        Self {
            id,
            is_new,
            data: RwLock::new(HashMap::new()),
        }
    }

    /// 从请求属性中取出会话
    pub fn from_request(request: &Request) -> Option<Arc<Session>> {
        request.attribute_as::<Session>(SESSION_ATTRIBUTE)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 本次请求新建的会话
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .read()
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: T) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.write().insert(key.into(), value);
        Ok(())
    }

    pub fn has(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn forget(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// 读取并删除
    pub fn pull<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.forget(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn flush(&self) {
        self.data.write().clear();
    }

    fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }
}

/// 会话存储
pub trait SessionStore: Send + Sync {
    /// 加载未过期的会话
    fn load(&self, id: &str) -> Option<Arc<Session>>;

    /// 创建新会话
    fn create(&self) -> Arc<Session>;

    /// 保存会话并刷新过期时间
    fn save(&self, session: &Session, lifetime: Duration);
}

struct StoredSession {
    data: HashMap<String, serde_json::Value>,
    expires_at: DateTime<Utc>,
}

/// 内存会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock();
        let stored = sessions.get(id)?;
        if stored.expires_at <= Utc::now() {
            tracing::debug!(session = id, "Session expired");
            return None;
        }

        let session = Session::new(id.to_string(), false);
        *session.data.write() = stored.data.clone();
        Some(Arc::new(session))
    }

    fn create(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(session = %id, "Session created");
        Arc::new(Session::new(id, true))
    }

    /// 保存时顺带清理已过期的会话
    fn save(&self, session: &Session, lifetime: Duration) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();

        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at > now);
        let purged = before - sessions.len();
        if purged > 0 {
            tracing::debug!(purged, "Expired sessions removed");
        }

        sessions.insert(
            session.id().to_string(),
            StoredSession {
                data: session.snapshot(),
                expires_at: now + lifetime,
            },
        );
    }
}

/// 会话 cookie 配置
#[derive(Debug, Clone)]
pub struct SessionCookie {
    pub name: String,
    /// 生命周期（秒），0 表示浏览器关闭时失效
    pub lifetime: i64,
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

impl Default for SessionCookie {
    fn default() -> Self {
        Self {
            name: "KEELSESSID".to_string(),
            lifetime: 7200,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: "Lax".to_string(),
        }
    }
}

impl SessionCookie {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            name: env.get_string_or(SESSION_COOKIE_NAME, &defaults.name),
            lifetime: env.get_i64_or(SESSION_COOKIE_LIFETIME, defaults.lifetime),
            path: env.get_string_or(SESSION_COOKIE_PATH, &defaults.path),
            domain: env.get_string(SESSION_COOKIE_DOMAIN).filter(|d| !d.is_empty()),
            secure: env.get_bool_or(SESSION_COOKIE_SECURE, defaults.secure),
            http_only: env.get_bool_or(SESSION_COOKIE_HTTPONLY, defaults.http_only),
            same_site: env.get_string_or(SESSION_COOKIE_SAMESITE, &defaults.same_site),
        }
    }

    /// 服务端保存时长；浏览器会话 cookie 仍保留默认时长
    fn store_lifetime(&self) -> Duration {
        if self.lifetime > 0 {
            Duration::seconds(self.lifetime)
        } else {
            Duration::seconds(Self::default().lifetime)
        }
    }

    /// `Set-Cookie` 头的值
    pub fn header_value(&self, id: &str) -> String {
        let mut parts = vec![format!("{}={}", self.name, id), format!("Path={}", self.path)];
        if self.lifetime > 0 {
            let expires = Utc::now() + Duration::seconds(self.lifetime);
            parts.push(format!("Max-Age={}", self.lifetime));
            parts.push(format!(
                "Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if let Some(domain) = &self.domain {
            parts.push(format!("Domain={}", domain));
        }
        if self.secure {
            parts.push("Secure".to_string());
        }
        if self.http_only {
            parts.push("HttpOnly".to_string());
        }
        parts.push(format!("SameSite={}", self.same_site));
        parts.join("; ")
    }
}

pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    cookie: SessionCookie,
}

impl SessionMiddleware {
    pub fn new(store: Arc<dyn SessionStore>, cookie: SessionCookie) -> Self {
        Self { store, cookie }
    }
}

impl Middleware for SessionMiddleware {
    fn name(&self) -> &str {
        "session"
    }

    fn process(&self, request: Request, next: Next<'_>) -> anyhow::Result<Response> {
        let session = request
            .cookie(&self.cookie.name)
            .and_then(|id| self.store.load(&id))
            .unwrap_or_else(|| self.store.create());

        let instance: Instance = session.clone();
        let request = request.with_attribute(SESSION_ATTRIBUTE, Value::Instance(instance));

        // 失败时也保存会话，错误继续向外传播
        let result = next.run(request);
        self.store.save(&session, self.cookie.store_lifetime());

        let mut response = result?;
        if session.is_new() || self.cookie.lifetime > 0 {
            response.append_header("set-cookie", &self.cookie.header_value(session.id()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{middleware_fn, Pipeline};

    fn pipeline(store: Arc<MemorySessionStore>) -> Pipeline {
        Pipeline::new()
            .with(SessionMiddleware::new(store, SessionCookie::default()))
            .with(middleware_fn("visits", |request: Request, _next| {
                let session = Session::from_request(&request).expect("session attribute");
                let visits = session.get::<u32>("visits").unwrap_or(0) + 1;
                session.put("visits", visits)?;
                Ok(Response::text(visits.to_string()))
            }))
    }

    fn session_id(response: &Response) -> String {
        let cookie = response.header("set-cookie").unwrap();
        cookie
            .split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, id)| id.to_string())
            .unwrap()
    }

    #[test]
    fn test_session_persists_across_requests() {
        let store = Arc::new(MemorySessionStore::new());
        let pipeline = pipeline(store.clone());

        let first = pipeline.handle(Request::get("/")).unwrap();
        assert_eq!(first.body_text(), "1");
        let id = session_id(&first);

        let second = pipeline
            .handle(Request::get("/").with_header("cookie", &format!("KEELSESSID={}", id)))
            .unwrap();
        assert_eq!(second.body_text(), "2");
        assert_eq!(session_id(&second), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_cookie_starts_new_session() {
        let pipeline = pipeline(Arc::new(MemorySessionStore::new()));
        let response = pipeline
            .handle(Request::get("/").with_header("cookie", "KEELSESSID=stale"))
            .unwrap();
        assert_eq!(response.body_text(), "1");
        assert_ne!(session_id(&response), "stale");
    }

    #[test]
    fn test_cookie_attributes() {
        let value = SessionCookie::default().header_value("abc");
        assert!(value.starts_with("KEELSESSID=abc; Path=/"));
        assert!(value.contains("Max-Age=7200"));
        assert!(value.contains("HttpOnly"));
        assert!(value.ends_with("SameSite=Lax"));
        assert!(!value.contains("Secure"));
    }

    #[test]
    fn test_save_drops_expired_sessions() {
        let store = MemorySessionStore::new();
        let stale = store.create();
        store.save(&stale, Duration::seconds(-1));
        assert_eq!(store.len(), 1);
        assert!(store.load(stale.id()).is_none());

        let fresh = store.create();
        store.save(&fresh, Duration::minutes(5));
        assert_eq!(store.len(), 1);
        assert!(store.load(fresh.id()).is_some());
    }

    #[test]
    fn test_pull_removes_value() {
        let session = Session::new("x".into(), true);
        session.put("flash", "saved").unwrap();
        assert_eq!(session.pull::<String>("flash").as_deref(), Some("saved"));
        assert!(!session.has("flash"));
    }
}
