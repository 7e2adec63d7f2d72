//! 事件分发 - 同步、按注册顺序通知监听器
//!
//! 监听器中的 panic 会被捕获并记录，不会中断请求或命令的执行。

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

/// 事件 trait - 所有事件都必须实现此 trait
pub trait Event: Any + Send + Sync {
    fn event_name(&self) -> &'static str;

    /// 转换为 Any 引用，用于类型转换
    fn as_any(&self) -> &dyn Any;
}

/// 应用启动完成事件
#[derive(Debug, Clone)]
pub struct ApplicationStarted {
    pub app_name: String,
    /// 启动耗时（毫秒）
    pub startup_time_ms: u128,
    pub timestamp: SystemTime,
}

impl ApplicationStarted {
    pub fn new(app_name: impl Into<String>, startup_time_ms: u128) -> Self {
        Self {
            app_name: app_name.into(),
            startup_time_ms,
            timestamp: SystemTime::now(),
        }
    }
}

impl Event for ApplicationStarted {
    fn event_name(&self) -> &'static str {
        "ApplicationStarted"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// 事件监听器 trait
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &dyn Event);

    /// 获取监听器名称（用于日志）
    fn listener_name(&self) -> &str {
        "AnonymousListener"
    }

    /// 是否支持该事件类型（默认支持所有事件）
    fn supports_event(&self, _event: &dyn Event) -> bool {
        true
    }
}

/// 闭包监听器 - 只接收类型为 `E` 的事件
pub struct FnListener<E, F> {
    name: String,
    handler: F,
    _event: PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            _event: PhantomData,
        }
    }
}

impl<E, F> EventListener for FnListener<E, F>
where
    E: Event,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &dyn Event) {
        if let Some(typed) = event.as_any().downcast_ref::<E>() {
            (self.handler)(typed);
        }
    }

    fn listener_name(&self) -> &str {
        &self.name
    }

    fn supports_event(&self, event: &dyn Event) -> bool {
        event.as_any().is::<E>()
    }
}

/// 事件分发器
///
/// 在注册表中以名称 `events` 和自身类型注册；未注册时框架不发出任何事件。
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!("Added event listener: {}", listener.listener_name());
        self.listeners.write().push(listener);
    }

    /// 注册类型化的闭包监听器
    pub fn listen<E, F>(&self, handler: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let name = format!("listener<{}>", crate::utils::naming::short_type_name(std::any::type_name::<E>()));
        self.add_listener(Arc::new(FnListener::<E, F>::new(name, handler)));
    }

    pub fn remove_listener(&self, listener_name: &str) {
        self.listeners
            .write()
            .retain(|listener| listener.listener_name() != listener_name);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// 同步分发事件
    pub fn dispatch(&self, event: &dyn Event) {
        // 先复制监听器列表，监听器内部可以再注册监听器
        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .filter(|listener| listener.supports_event(event))
            .map(Arc::clone)
            .collect();

        tracing::trace!(
            "Dispatching event: {} to {} listener(s)",
            event.event_name(),
            listeners.len()
        );

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                tracing::error!(
                    "Listener '{}' panicked while handling event '{}'",
                    listener.listener_name(),
                    event.event_name()
                );
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Ping(u32);

    impl Event for Ping {
        fn event_name(&self) -> &'static str {
            "Ping"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_typed_listeners_receive_only_their_events() {
        let dispatcher = EventDispatcher::new();
        let pings = Arc::new(Mutex::new(Vec::new()));
        let starts = Arc::new(Mutex::new(0));

        let seen = Arc::clone(&pings);
        dispatcher.listen::<Ping, _>(move |event| seen.lock().push(event.0));
        let counter = Arc::clone(&starts);
        dispatcher.listen::<ApplicationStarted, _>(move |_| *counter.lock() += 1);

        dispatcher.dispatch(&Ping(1));
        dispatcher.dispatch(&Ping(2));
        dispatcher.dispatch(&ApplicationStarted::new("test", 3));

        assert_eq!(*pings.lock(), vec![1, 2]);
        assert_eq!(*starts.lock(), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let dispatcher = EventDispatcher::new();
        let reached = Arc::new(Mutex::new(false));

        dispatcher.listen::<Ping, _>(|_| panic!("listener failure"));
        let flag = Arc::clone(&reached);
        dispatcher.listen::<Ping, _>(move |_| *flag.lock() = true);

        dispatcher.dispatch(&Ping(7));
        assert!(*reached.lock());
    }

    #[test]
    fn test_remove_listener() {
        let dispatcher = EventDispatcher::new();
        dispatcher.add_listener(Arc::new(FnListener::<Ping, _>::new("audit", |_: &Ping| {})));
        assert_eq!(dispatcher.listener_count(), 1);

        dispatcher.remove_listener("audit");
        assert_eq!(dispatcher.listener_count(), 0);
    }
}
