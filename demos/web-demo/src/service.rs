use parking_lot::RwLock;

use crate::models::{CreateUserRequest, User};

/// 内存中的用户存储
pub struct UserService {
    users: RwLock<Vec<User>>,
}

impl UserService {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(vec![
                User {
                    id: 1,
                    name: "Alice".to_string(),
                    email: "alice@example.com".to_string(),
                },
                User {
                    id: 2,
                    name: "Bob".to_string(),
                    email: "bob@example.com".to_string(),
                },
            ]),
        }
    }

    pub fn list_users(&self) -> Vec<User> {
        self.users.read().clone()
    }

    pub fn get_user_by_id(&self, id: u32) -> Option<User> {
        self.users.read().iter().find(|u| u.id == id).cloned()
    }

    pub fn create_user(&self, request: CreateUserRequest) -> User {
        let mut users = self.users.write();
        let id = users.iter().map(|u| u.id).max().unwrap_or(0) + 1;
        let user = User {
            id,
            name: request.name,
            email: request.email,
        };
        users.push(user.clone());
        tracing::info!(id, "User created");
        user
    }
}

impl Default for UserService {
    fn default() -> Self {
        Self::new()
    }
}
