//! Utility functions for the registry
//!
//! Naming helpers used when qualifying target identifiers, and the
//! per-thread creation tracker used for circular dependency detection.

/// Naming convention utilities
pub mod naming {
    /// Path separator used by qualified identifiers.
    pub const PATH_SEPARATOR: &str = "::";

    /// Returns `true` when the identifier already carries a namespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use keel_core::utils::naming::is_qualified;
    ///
    /// assert!(is_qualified("app::controllers::Users"));
    /// assert!(is_qualified("::Users"));
    /// assert!(!is_qualified("Users"));
    /// ```
    pub fn is_qualified(name: &str) -> bool {
        name.contains(PATH_SEPARATOR)
    }

    /// Prefixes an unqualified identifier with `namespace`.
    ///
    /// A leading `::` marks an identifier as absolute; it is stripped and
    /// the rest is returned untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use keel_core::utils::naming::qualify;
    ///
    /// assert_eq!(qualify("app::controllers", "Users"), "app::controllers::Users");
    /// assert_eq!(qualify("app::controllers", "admin::Users"), "admin::Users");
    /// assert_eq!(qualify("app::controllers", "::Users"), "Users");
    /// assert_eq!(qualify("", "Users"), "Users");
    /// ```
    pub fn qualify(namespace: &str, name: &str) -> String {
        if let Some(absolute) = name.strip_prefix(PATH_SEPARATOR) {
            return absolute.to_string();
        }
        if is_qualified(name) || namespace.is_empty() {
            return name.to_string();
        }
        let namespace = namespace.trim_end_matches(PATH_SEPARATOR);
        format!("{}{}{}", namespace, PATH_SEPARATOR, name)
    }

    /// Returns the last path segment of a type name.
    pub fn short_type_name(type_name: &str) -> &str {
        let without_generics = type_name.split('<').next().unwrap_or(type_name);
        without_generics
            .rsplit(PATH_SEPARATOR)
            .next()
            .unwrap_or(without_generics)
    }
}

/// Dependency resolution utilities
pub mod dependency {
    use crate::error::RegistryError;
    use crate::key::Key;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::thread::{self, ThreadId};

    /// Tracks keys currently being resolved, per thread.
    ///
    /// A key that is entered twice on the same thread before its first
    /// resolution finishes is a cycle. Separate threads resolving the same
    /// key concurrently are not cycles; they each get their own chain.
    #[derive(Debug, Default)]
    pub struct CreationTracker {
        chains: Mutex<HashMap<ThreadId, Vec<Key>>>,
    }

    impl CreationTracker {
        /// Creates a new empty creation tracker.
        pub fn new() -> Self {
            Self::default()
        }

        /// Marks `key` as being resolved on the current thread.
        ///
        /// The returned guard unmarks it when dropped, including on error
        /// paths.
        ///
        /// # Errors
        ///
        /// Returns [`RegistryError::CircularDependency`] with the full chain
        /// when `key` is already being resolved on this thread.
        pub fn enter(&self, key: &Key) -> Result<CreationGuard<'_>, RegistryError> {
            let thread = thread::current().id();
            let mut chains = self.chains.lock();
            let chain = chains.entry(thread).or_default();

            if chain.contains(key) {
                let mut cycle: Vec<String> = chain.iter().map(ToString::to_string).collect();
                cycle.push(key.to_string());
                return Err(RegistryError::CircularDependency {
                    chain: cycle.join(" -> "),
                });
            }

            chain.push(key.clone());
            Ok(CreationGuard {
                tracker: self,
                thread,
            })
        }

        /// Keys currently being resolved on the calling thread, outermost first.
        pub fn current_chain(&self) -> Vec<Key> {
            let thread = thread::current().id();
            self.chains
                .lock()
                .get(&thread)
                .cloned()
                .unwrap_or_default()
        }

        fn leave(&self, thread: ThreadId) {
            let mut chains = self.chains.lock();
            if let Some(chain) = chains.get_mut(&thread) {
                chain.pop();
                if chain.is_empty() {
                    chains.remove(&thread);
                }
            }
        }
    }

    /// RAII marker returned by [`CreationTracker::enter`].
    pub struct CreationGuard<'a> {
        tracker: &'a CreationTracker,
        thread: ThreadId,
    }

    impl Drop for CreationGuard<'_> {
        fn drop(&mut self) {
            self.tracker.leave(self.thread);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::dependency::CreationTracker;
    use super::naming::*;
    use crate::error::RegistryError;
    use crate::key::Key;

    #[test]
    fn test_qualify() {
        assert_eq!(qualify("app::controllers", "Users"), "app::controllers::Users");
        assert_eq!(qualify("app::controllers::", "Users"), "app::controllers::Users");
        assert_eq!(qualify("app", "blog::Posts"), "blog::Posts");
        assert_eq!(qualify("app", "::Posts"), "Posts");
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("keel_web::routing::RouteTable"), "RouteTable");
        assert_eq!(short_type_name("alloc::sync::Arc<dyn Foo>"), "Arc");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_tracker_detects_reentry() {
        let tracker = CreationTracker::new();
        let a = Key::from("a");
        let b = Key::from("b");

        let _outer = tracker.enter(&a).unwrap();
        let _inner = tracker.enter(&b).unwrap();

        match tracker.enter(&a) {
            Err(RegistryError::CircularDependency { chain }) => assert_eq!(chain, "a -> b -> a"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("cycle not detected"),
        };
    }

    #[test]
    fn test_tracker_guard_releases_key() {
        let tracker = CreationTracker::new();
        let a = Key::from("a");

        {
            let _guard = tracker.enter(&a).unwrap();
            assert_eq!(tracker.current_chain(), vec![a.clone()]);
        }

        assert!(tracker.current_chain().is_empty());
        assert!(tracker.enter(&a).is_ok());
    }

    #[test]
    fn test_tracker_is_per_thread() {
        let tracker = std::sync::Arc::new(CreationTracker::new());
        let a = Key::from("a");
        let _guard = tracker.enter(&a).unwrap();

        let other = std::sync::Arc::clone(&tracker);
        let handle = std::thread::spawn(move || other.enter(&Key::from("a")).is_ok());
        assert!(handle.join().unwrap());
    }
}
