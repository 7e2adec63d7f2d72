//! Keel Web 演示应用
//!
//! ```bash
//! cargo run -p web-demo -- serve
//! cargo run -p web-demo -- routes
//! cargo run -p web-demo -- token --subject alice
//! ```

mod commands;
mod controllers;
mod models;
mod service;

use std::sync::Arc;

use keel_console::{Console, ConsoleModule};
use keel_core::{KeelApplication, MapPropertySource, Module, ParameterDescriptor, Registry};
use keel_web::auth::Claims;
use keel_web::constants::VIEW_TEMPLATE_DIR;
use keel_web::prelude::*;

use crate::service::UserService;

/// 应用自身的绑定
struct AppModule;

impl Module for AppModule {
    fn name(&self) -> &str {
        "web-demo"
    }

    fn provide(&self, registry: &Arc<Registry>) -> anyhow::Result<()> {
        registry.register_type(true, |_| Ok(UserService::new()));
        Ok(())
    }
}

fn routes() -> anyhow::Result<RouteTable> {
    let mut routes = RouteTable::new();
    routes
        .get("/", "HomeController@index")?
        .get("/home", "HomeController@legacy")?
        .get("/users", "UsersController@index")?
        .get("/users/{id:\\d+}", "UsersController@show")?
        .post("/users", "UsersController@store")?
        .get(
            "/health",
            Handler::new([], |_| Ok(serde_json::json!({ "status": "UP" }))).named("health"),
        )?
        .get(
            "/api/me",
            Handler::new([ParameterDescriptor::new("request").of::<Request>()], |args| {
                let request = args.get::<Request>("request")?;
                let claims = Claims::from_request(&request)
                    .ok_or_else(|| HttpFailure::unauthorized("Authentication required"))?;
                Ok(claims.as_value().clone())
            })
            .named("api.me"),
        )?;
    Ok(routes)
}

fn application() -> anyhow::Result<KeelApplication> {
    Ok(KeelApplication::new("web-demo")
        .config_file(concat!(env!("CARGO_MANIFEST_DIR"), "/keel.toml"))
        .property_source(MapPropertySource::new("demo").with_property(
            VIEW_TEMPLATE_DIR,
            concat!(env!("CARGO_MANIFEST_DIR"), "/templates"),
        ))
        .module(AppModule)
        .module(
            HttpModule::new(routes()?)
                .controller(controllers::home())
                .controller(controllers::users()),
        )
        .module(ConsoleModule::new().command(commands::token())))
}

fn main() -> anyhow::Result<()> {
    let registry = application()?.run()?;

    let code = Console::new(registry).named("web-demo").run(std::env::args());
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_console::Output;

    fn registry() -> Arc<Registry> {
        application()
            .unwrap()
            .env_prefix("WEB_DEMO_TEST_")
            .without_logging()
            .run()
            .unwrap()
    }

    fn handle(registry: &Arc<Registry>, request: Request) -> Response {
        registry
            .resolve_type::<WebEntrypoint>()
            .unwrap()
            .handle(request)
    }

    #[test]
    fn home_page_lists_users() {
        let registry = registry();
        let response = handle(&registry, Request::get("/"));

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.body_text();
        assert!(body.contains("Alice"));
        assert!(body.contains("visited this page 1 time(s)"));
        assert!(response.header("set-cookie").unwrap().starts_with("DEMOSESSID="));
    }

    #[test]
    fn legacy_home_redirects_back() {
        let registry = registry();
        let response = handle(
            &registry,
            Request::get("/home").with_header("referer", "/users"),
        );

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/users"));
    }

    #[test]
    fn users_show_and_store() {
        let registry = registry();

        let found = handle(&registry, Request::get("/users/1"));
        assert_eq!(found.status(), StatusCode::OK);
        assert!(found.body_text().contains("alice@example.com"));

        let missing = handle(
            &registry,
            Request::get("/users/99").with_header("accept", "application/json"),
        );
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let created = handle(
            &registry,
            Request::post("/users")
                .with_header("content-type", "application/json")
                .with_body(r#"{"name":"Carol","email":"carol@example.com"}"#),
        );
        assert_eq!(created.status(), StatusCode::CREATED);
        assert!(created.body_text().contains("\"id\":3"));

        let invalid = handle(
            &registry,
            Request::post("/users")
                .with_header("content-type", "application/json")
                .with_header("accept", "application/json")
                .with_body(r#"{"name":"C","email":"nope"}"#),
        );
        assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn api_requires_token_signed_by_command() {
        let registry = registry();

        let anonymous = handle(
            &registry,
            Request::get("/api/me").with_header("accept", "application/json"),
        );
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let (output, captured) = Output::captured();
        let code = Console::new(Arc::clone(&registry))
            .with_output(output)
            .run(["web-demo", "token", "--subject", "alice"]);
        assert_eq!(code, 0);
        let token = captured.stdout().trim().to_string();

        let response = handle(
            &registry,
            Request::get("/api/me").with_header("authorization", &format!("Bearer {}", token)),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body_text().contains("alice"));
    }
}
