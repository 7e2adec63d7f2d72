//! Service Registry - 键到提供者的映射
//!
//! 参考 BeanFactory 的结构：绑定定义存储在读写锁保护的映射中，
//! 共享绑定的实例在首次解析时创建并缓存，循环依赖通过创建追踪器检测。
//!
//! # 覆盖语义
//!
//! 注册表不做覆盖保护：同一个键的最后一次注册生效（last-writer-wins）。
//! 模块按调用方给定的顺序安装，后安装的模块可以有意覆盖先前模块的绑定。
//! 这也意味着两个模块无意中使用同一个键时不会报错，覆盖只会以 debug 级别记录日志。

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::error::RegistryError;
use crate::key::{Key, TypeKey};
use crate::module::Module;
use crate::utils::dependency::CreationTracker;

/// 注册表中保存的实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 绑定工厂
///
/// 工厂接收注册表本身，可以在内部继续解析自己的依赖（提供者链）。
pub type Factory = dyn Fn(&Arc<Registry>) -> anyhow::Result<Instance> + Send + Sync;

/// 绑定 - 一个键及其提供者
pub struct Binding {
    key: Key,
    factory: Box<Factory>,
    shared: bool,
    /// 共享绑定的缓存实例，只写一次
    cached: OnceCell<Instance>,
}

impl Binding {
    pub fn new<F>(key: Key, shared: bool, factory: F) -> Self
    where
        F: Fn(&Arc<Registry>) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        Self {
            key,
            factory: Box::new(factory),
            shared,
            cached: OnceCell::new(),
        }
    }

    /// 以现成实例创建共享绑定，工厂永远不会被调用
    pub fn with_instance(key: Key, instance: Instance) -> Self {
        let missing = key.clone();
        Self {
            key,
            factory: Box::new(move |_| Err(RegistryError::UnknownService(missing.clone()).into())),
            shared: true,
            cached: OnceCell::with_value(instance),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// 共享实例是否已经创建
    pub fn is_cached(&self) -> bool {
        self.cached.get().is_some()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("shared", &self.shared)
            .field("cached", &self.is_cached())
            .finish()
    }
}

/// 服务注册表
///
/// 启动后实际上只追加不修改。唯一的并发敏感状态是共享绑定的首次创建，
/// 由每个绑定自己的 `OnceCell` 保证工厂最多执行一次。
pub struct Registry {
    /// 绑定存储
    bindings: RwLock<HashMap<Key, Arc<Binding>>>,

    /// 循环依赖检测
    creation_tracker: CreationTracker,
}

impl Registry {
    /// 创建空注册表
    ///
    /// 注册表总是以 `Arc` 持有，工厂和解析器通过它回调注册表。
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bindings: RwLock::new(HashMap::new()),
            creation_tracker: CreationTracker::new(),
        })
    }

    /// 注册绑定，同一个键的最后一次注册生效
    pub fn register<F>(&self, key: impl Into<Key>, shared: bool, factory: F)
    where
        F: Fn(&Arc<Registry>) -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        let key = key.into();
        self.insert(Binding::new(key, shared, factory));
    }

    /// 注册共享绑定，工厂最多执行一次
    pub fn register_shared<T, F>(&self, key: impl Into<Key>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Arc<Registry>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(key, true, move |registry| {
            factory(registry).map(|value| Arc::new(value) as Instance)
        });
    }

    /// 注册非共享绑定，每次解析都会执行工厂
    pub fn register_factory<T, F>(&self, key: impl Into<Key>, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Arc<Registry>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(key, false, move |registry| {
            factory(registry).map(|value| Arc::new(value) as Instance)
        });
    }

    /// 以类型作为键注册
    pub fn register_type<T, F>(&self, shared: bool, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Arc<Registry>) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.register(TypeKey::of::<T>(), shared, move |registry| {
            factory(registry).map(|value| Arc::new(value) as Instance)
        });
    }

    /// 注册一个现成的实例
    pub fn register_instance<T>(&self, key: impl Into<Key>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.insert(Binding::with_instance(key.into(), Arc::new(value)));
    }

    /// 注册一个已经是 `Arc` 的实例，不再额外包装
    pub fn register_arc(&self, key: impl Into<Key>, instance: Instance) {
        self.insert(Binding::with_instance(key.into(), instance));
    }

    /// 注册别名 - 每次解析 `key` 都转而解析 `target`
    pub fn alias(&self, key: impl Into<Key>, target: impl Into<Key>) {
        let target = target.into();
        self.register(key, false, move |registry| {
            registry.resolve(&target).map_err(anyhow::Error::from)
        });
    }

    fn insert(&self, binding: Binding) {
        let key = binding.key().clone();
        let shared = binding.is_shared();
        let previous = self.bindings.write().insert(key.clone(), Arc::new(binding));

        if previous.is_some() {
            tracing::debug!(key = %key, "Overriding existing binding (last registration wins)");
        } else {
            tracing::trace!(key = %key, shared, "Binding registered");
        }
    }

    /// 检查键是否已注册
    pub fn has(&self, key: impl Into<Key>) -> bool {
        self.bindings.read().contains_key(&key.into())
    }

    /// 检查类型键是否已注册
    pub fn has_type<T: ?Sized + Any>(&self) -> bool {
        self.has(TypeKey::of::<T>())
    }

    /// 获取绑定（只读视图）
    pub fn binding(&self, key: impl Into<Key>) -> Option<Arc<Binding>> {
        self.bindings.read().get(&key.into()).cloned()
    }

    /// 所有已注册的键
    pub fn keys(&self) -> Vec<Key> {
        self.bindings.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// 解析键对应的实例
    ///
    /// 共享绑定只在第一次解析时执行工厂；并发的首次解析会等待同一次创建完成。
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownService`] 键未注册
    /// - [`RegistryError::CircularDependency`] 当前线程正在解析同一个键
    /// - [`RegistryError::FactoryFailed`] 工厂返回错误
    pub fn resolve(self: &Arc<Self>, key: impl Into<Key>) -> Result<Instance, RegistryError> {
        let key = key.into();
        tracing::trace!(key = %key, "Resolving service");

        // 先复制出绑定再释放锁，工厂内部可以继续解析
        let binding = self.bindings.read().get(&key).cloned().ok_or_else(|| {
            tracing::debug!(key = %key, "Service not found in registry");
            RegistryError::UnknownService(key.clone())
        })?;

        if let Some(instance) = binding.cached.get() {
            tracing::trace!(key = %key, "Returning cached shared instance");
            return Ok(Arc::clone(instance));
        }

        let _guard = self.creation_tracker.enter(&key)?;

        if binding.shared {
            let instance = binding
                .cached
                .get_or_try_init(|| {
                    tracing::debug!(key = %key, "Creating shared instance");
                    self.build(&binding)
                })
                .map(Arc::clone)?;
            Ok(instance)
        } else {
            tracing::trace!(key = %key, "Creating new instance of non-shared binding");
            self.build(&binding)
        }
    }

    /// 解析并向下转型
    pub fn resolve_as<T>(self: &Arc<Self>, key: impl Into<Key>) -> Result<Arc<T>, RegistryError>
    where
        T: Any + Send + Sync,
    {
        let key = key.into();
        self.resolve(&key)?
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                key,
                expected: std::any::type_name::<T>(),
            })
    }

    /// 按类型键解析
    pub fn resolve_type<T>(self: &Arc<Self>) -> Result<Arc<T>, RegistryError>
    where
        T: Any + Send + Sync,
    {
        self.resolve_as::<T>(TypeKey::of::<T>())
    }

    /// 安装模块 - 调用模块的 `provide`
    pub fn install(self: &Arc<Self>, module: &dyn Module) -> anyhow::Result<()> {
        tracing::debug!(module = module.name(), "Installing module");
        module.provide(self)
    }

    fn build(self: &Arc<Self>, binding: &Binding) -> Result<Instance, RegistryError> {
        (binding.factory)(self).map_err(|error| match error.downcast::<RegistryError>() {
            // 循环依赖原样向上传播，不包装
            Ok(RegistryError::CircularDependency { chain }) => {
                RegistryError::CircularDependency { chain }
            }
            Ok(other) => RegistryError::FactoryFailed {
                key: binding.key.clone(),
                source: other.into(),
            },
            Err(error) => RegistryError::FactoryFailed {
                key: binding.key.clone(),
                source: error,
            },
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("bindings", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Database {
        url: String,
    }

    struct UserRepository {
        db: Arc<Database>,
    }

    #[test]
    fn test_shared_binding_returns_identical_instance() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        registry.register_shared("db", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Database {
                url: "sqlite::memory:".to_string(),
            })
        });

        let first = registry.resolve("db").unwrap();
        let second = registry.resolve("db").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_non_shared_binding_returns_distinct_instances() {
        let registry = Registry::new();
        registry.register_factory("db", |_| {
            Ok(Database {
                url: "sqlite::memory:".to_string(),
            })
        });

        let first = registry.resolve("db").unwrap();
        let second = registry.resolve("db").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_unknown_service() {
        let registry = Registry::new();
        let err = registry.resolve("missing").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownService(Key::Name(ref n)) if n == "missing"));
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register_instance("greeting", "hello".to_string());
        registry.register_instance("greeting", "bonjour".to_string());

        let greeting = registry.resolve_as::<String>("greeting").unwrap();
        assert_eq!(greeting.as_str(), "bonjour");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_provider_chain() {
        let registry = Registry::new();
        registry.register_type::<Database, _>(true, |_| {
            Ok(Database {
                url: "postgres://localhost/app".to_string(),
            })
        });
        registry.register_shared("users", |registry| {
            Ok(UserRepository {
                db: registry.resolve_type::<Database>()?,
            })
        });

        let users = registry.resolve_as::<UserRepository>("users").unwrap();
        assert_eq!(users.db.url, "postgres://localhost/app");
    }

    #[test]
    fn test_alias_resolves_target() {
        let registry = Registry::new();
        registry.register_type::<Database, _>(true, |_| {
            Ok(Database {
                url: "db".to_string(),
            })
        });
        registry.alias("database", TypeKey::of::<Database>());

        let by_alias = registry.resolve("database").unwrap();
        let by_type = registry.resolve(TypeKey::of::<Database>()).unwrap();
        assert!(Arc::ptr_eq(&by_alias, &by_type));
    }

    #[test]
    fn test_circular_dependency_is_detected() {
        let registry = Registry::new();
        registry.register_shared("a", |registry| {
            registry.resolve("b")?;
            Ok(1_u8)
        });
        registry.register_shared("b", |registry| {
            registry.resolve("a")?;
            Ok(2_u8)
        });

        match registry.resolve("a") {
            Err(RegistryError::CircularDependency { chain }) => {
                assert_eq!(chain, "a -> b -> a");
            }
            other => panic!("expected circular dependency, got {:?}", other.map(|_| ())),
        }

        // 失败后不会留下残余标记
        assert!(matches!(
            registry.resolve("b"),
            Err(RegistryError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = Registry::new();
        registry.register_instance("port", 8080_u16);

        let err = registry.resolve_as::<String>("port").unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }

    #[test]
    fn test_factory_failure_is_wrapped() {
        let registry = Registry::new();
        registry.register_shared::<Database, _>("db", |_| Err(anyhow::anyhow!("connection refused")));

        let err = registry.resolve("db").unwrap_err();
        assert!(matches!(err, RegistryError::FactoryFailed { .. }));
        assert!(err.to_string().contains("connection refused"));
        assert!(!registry.binding("db").unwrap().is_cached());
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let registry = Registry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        registry.register_shared("slow", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok("ready".to_string())
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve("slow").unwrap())
            })
            .collect();

        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
