//! 视图渲染
//!
//! 基于 Tera 模板引擎。错误处理中间件用 `error.html` 渲染 HTML 错误页，控制器通过
//! [`Renderable`](crate::controller::Renderable) 渲染页面。
//!
//! ## 使用示例
//!
//! ```ignore
//! let renderer = TeraRenderer::from_dir("templates")?;
//! let html = renderer.render("welcome.html", &json!({ "name": "World" }))?;
//! ```

use std::path::Path;

use keel_core::Environment;
use parking_lot::RwLock;
use serde::Serialize;
use tera::Tera;

use crate::constants::VIEW_TEMPLATE_DIR;

/// 内置错误页模板名称
pub const ERROR_TEMPLATE: &str = "error.html";

const DEFAULT_ERROR_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{ code }} {{ message }}</title>
</head>
<body>
    <h1>{{ code }} {{ message }}</h1>
    <p>{{ description }}</p>
    {% if debug %}
    <h2>{{ debug.exception }}: {{ debug.message }}</h2>
    <p>{{ debug.file }}:{{ debug.line }}</p>
    <pre>{{ debug.trace }}</pre>
    {% endif %}
</body>
</html>
"#;

/// 模板错误类型
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to render template '{template}': {cause}")]
    RenderError { template: String, cause: String },

    #[error("Template initialization error: {0}")]
    InitError(String),
}

/// 视图渲染器
pub trait ViewRenderer: Send + Sync {
    /// 用 JSON 对象作为变量渲染模板
    fn render(&self, template: &str, context: &serde_json::Value) -> Result<String, TemplateError>;

    fn exists(&self, template: &str) -> bool;
}

/// Tera 实现
pub struct TeraRenderer {
    tera: RwLock<Tera>,
}

impl TeraRenderer {
    /// 只包含内置错误页的渲染器
    pub fn new() -> Self {
        let mut tera = Tera::default();
        install_defaults(&mut tera);
        Self {
            tera: RwLock::new(tera),
        }
    }

    /// 加载目录下的所有模板
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let pattern = format!("{}/**/*", dir.as_ref().display());
        let mut tera = Tera::new(&pattern).map_err(|e| {
            TemplateError::InitError(format!(
                "Failed to initialize Tera with pattern '{}': {}",
                pattern, e
            ))
        })?;
        install_defaults(&mut tera);

        tracing::info!(pattern = %pattern, "Template engine created");

        Ok(Self {
            tera: RwLock::new(tera),
        })
    }

    /// 从 Environment 创建，未配置 `view.template_dir` 时只有内置模板
    pub fn from_environment(env: &Environment) -> Result<Self, TemplateError> {
        match env.get_string(VIEW_TEMPLATE_DIR) {
            Some(dir) => Self::from_dir(dir),
            None => Ok(Self::new()),
        }
    }

    /// 添加内联模板（同名覆盖）
    pub fn add_template(&self, name: &str, content: &str) -> Result<(), TemplateError> {
        self.tera
            .write()
            .add_raw_template(name, content)
            .map_err(|e| TemplateError::InitError(e.to_string()))
    }
}

impl Default for TeraRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRenderer for TeraRenderer {
    fn render(&self, template: &str, context: &serde_json::Value) -> Result<String, TemplateError> {
        let tera = self.tera.read();
        if !tera.get_template_names().any(|name| name == template) {
            return Err(TemplateError::NotFound(template.to_string()));
        }

        let context = tera::Context::from_value(context.clone()).map_err(|e| {
            TemplateError::RenderError {
                template: template.to_string(),
                cause: e.to_string(),
            }
        })?;

        tera.render(template, &context).map_err(|e| {
            tracing::error!(error = ?e, template, "Template render error");
            TemplateError::RenderError {
                template: template.to_string(),
                cause: e.to_string(),
            }
        })
    }

    fn exists(&self, template: &str) -> bool {
        self.tera.read().get_template_names().any(|name| name == template)
    }
}

/// 模板变量构建器
#[derive(Debug, Default, Clone)]
pub struct ViewContext {
    values: serde_json::Map<String, serde_json::Value>,
}

impl ViewContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加单个变量，无法序列化的值记为 `null`
    pub fn with<V: Serialize>(mut self, key: impl Into<String>, value: V) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.values.insert(key.into(), value);
        self
    }

    pub fn into_value(self) -> serde_json::Value {
        serde_json::Value::Object(self.values)
    }
}

fn install_defaults(tera: &mut Tera) {
    if tera.get_template_names().any(|name| name == ERROR_TEMPLATE) {
        return;
    }
    if let Err(e) = tera.add_raw_template(ERROR_TEMPLATE, DEFAULT_ERROR_TEMPLATE) {
        tracing::warn!(error = %e, "Failed to install default error template");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_error_template() {
        let renderer = TeraRenderer::new();
        assert!(renderer.exists(ERROR_TEMPLATE));

        let html = renderer
            .render(
                ERROR_TEMPLATE,
                &json!({ "code": 404, "message": "Not Found", "description": "missing" }),
            )
            .unwrap();
        assert!(html.contains("404 Not Found"));
        assert!(html.contains("missing"));
    }

    #[test]
    fn test_inline_template() {
        let renderer = TeraRenderer::new();
        renderer.add_template("hello.html", "Hello {{ name }}").unwrap();

        let context = ViewContext::new().with("name", "World").into_value();
        assert_eq!(renderer.render("hello.html", &context).unwrap(), "Hello World");
    }

    #[test]
    fn test_missing_template() {
        let renderer = TeraRenderer::new();
        assert!(matches!(
            renderer.render("nope.html", &json!({})),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_escapes_html() {
        let renderer = TeraRenderer::new();
        let html = renderer
            .render(
                ERROR_TEMPLATE,
                &json!({ "code": 500, "message": "<b>x</b>", "description": "" }),
            )
            .unwrap();
        assert!(!html.contains("<b>x</b>"));
    }
}
