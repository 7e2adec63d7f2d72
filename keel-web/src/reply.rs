//! 处理函数返回值的规范化
//!
//! 返回响应的处理函数原样返回；其他返回值被转换为字符串，作为 200 响应的正文。

use crate::http::Response;

/// 处理函数的返回值
#[derive(Debug)]
pub enum Reply {
    Response(Response),
    Text(String),
}

impl Reply {
    /// 转换为响应；文本返回值成为 200 纯文本响应
    pub fn into_response(self) -> Response {
        match self {
            Reply::Response(response) => response,
            Reply::Text(text) => Response::text(text),
        }
    }
}

/// 可以作为处理函数返回值的类型
pub trait IntoReply {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply {
        self
    }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply {
        Reply::Response(self)
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply {
        Reply::Text(self)
    }
}

impl IntoReply for &str {
    fn into_reply(self) -> Reply {
        Reply::Text(self.to_string())
    }
}

/// 空返回值对应空正文
impl IntoReply for () {
    fn into_reply(self) -> Reply {
        Reply::Text(String::new())
    }
}

impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Reply {
        match self {
            Some(value) => value.into_reply(),
            None => Reply::Text(String::new()),
        }
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Reply {
        Reply::Text(self.to_string())
    }
}

macro_rules! display_reply {
    ($($ty:ty),*) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Reply {
                    Reply::Text(self.to_string())
                }
            }
        )*
    };
}

display_reply!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);
