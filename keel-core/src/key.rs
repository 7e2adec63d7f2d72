//! 服务键与类型标识
//!
//! 注册表中的每个绑定都由 [`Key`] 标识：要么是一个不透明的名称，要么是一个类型标识 [`TypeKey`]。

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// 类型标识 - `TypeId` 加上可读的类型名称
///
/// 相等性与哈希只依赖 `TypeId`，名称仅用于日志和错误信息。
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 是否为内置标量类型（整数、浮点、布尔、字符、字符串）
    ///
    /// 内置类型永远不会被当作注册表的键来查找。
    pub fn is_builtin(&self) -> bool {
        builtin_type_ids().contains(&self.id)
    }
}

fn builtin_type_ids() -> [TypeId; 19] {
    [
        TypeId::of::<bool>(),
        TypeId::of::<char>(),
        TypeId::of::<i8>(),
        TypeId::of::<i16>(),
        TypeId::of::<i32>(),
        TypeId::of::<i64>(),
        TypeId::of::<i128>(),
        TypeId::of::<isize>(),
        TypeId::of::<u8>(),
        TypeId::of::<u16>(),
        TypeId::of::<u32>(),
        TypeId::of::<u64>(),
        TypeId::of::<u128>(),
        TypeId::of::<usize>(),
        TypeId::of::<f32>(),
        TypeId::of::<f64>(),
        TypeId::of::<String>(),
        TypeId::of::<&'static str>(),
        TypeId::of::<()>(),
    ]
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// 注册表键
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    /// 按名称注册，例如 `"router"`
    Name(String),
    /// 按类型注册
    Type(TypeKey),
}

impl Key {
    pub fn name(name: impl Into<String>) -> Self {
        Key::Name(name.into())
    }

    pub fn of<T: ?Sized + Any>() -> Self {
        Key::Type(TypeKey::of::<T>())
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl From<TypeKey> for Key {
    fn from(type_key: TypeKey) -> Self {
        Key::Type(type_key)
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Type(type_key) => write!(f, "<{}>", type_key.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct UserService;

    #[test]
    fn test_type_key_equality_ignores_name() {
        assert_eq!(TypeKey::of::<UserService>(), TypeKey::of::<UserService>());
        assert_ne!(TypeKey::of::<UserService>(), TypeKey::of::<String>());
    }

    #[test]
    fn test_builtin_detection() {
        assert!(TypeKey::of::<i64>().is_builtin());
        assert!(TypeKey::of::<String>().is_builtin());
        assert!(!TypeKey::of::<UserService>().is_builtin());
        assert!(!TypeKey::of::<Vec<String>>().is_builtin());
    }

    #[test]
    fn test_name_and_type_keys_are_distinct() {
        let mut keys = HashSet::new();
        keys.insert(Key::from("userService"));
        keys.insert(Key::of::<UserService>());
        keys.insert(Key::name("userService"));
        assert_eq!(keys.len(), 2);
    }
}
