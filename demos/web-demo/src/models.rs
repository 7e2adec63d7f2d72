use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u32,
    pub name: String,
    pub email: String,
}

/// 创建用户请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 20, message = "name must be 2-20 characters"))]
    pub name: String,

    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
}
