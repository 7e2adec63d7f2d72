//! 演示控制器

use std::sync::Arc;

use keel_core::{Environment, ParameterDescriptor};
use keel_web::controller::{ControllerDefinition, Redirectable, Renderable, Validatable};
use keel_web::prelude::*;
use keel_web::session::Session;
use keel_web::view::ViewContext;

use crate::models::CreateUserRequest;
use crate::service::UserService;

// ==================== HomeController ====================

pub struct HomeController {
    views: Arc<dyn ViewRenderer>,
    app_name: String,
}

impl Renderable for HomeController {
    fn views(&self) -> &dyn ViewRenderer {
        self.views.as_ref()
    }
}

impl Redirectable for HomeController {}

impl HomeController {
    fn index(&self, users: &UserService, session: Option<Arc<Session>>) -> anyhow::Result<Response> {
        let visits = match session {
            Some(session) => {
                let visits = session.get::<u64>("visits").unwrap_or(0) + 1;
                session.put("visits", visits)?;
                visits
            }
            None => 1,
        };

        let context = ViewContext::new()
            .with("app", &self.app_name)
            .with("visits", visits)
            .with("users", users.list_users());
        Ok(self.render("home", context.into_value())?)
    }
}

pub fn home() -> ControllerDefinition {
    ControllerDefinition::build::<HomeController, _>(
        "HomeController",
        [
            ParameterDescriptor::new("views").of::<Arc<dyn ViewRenderer>>(),
            ParameterDescriptor::new("config").of::<Environment>(),
        ],
        |args| {
            Ok(HomeController {
                views: args.cloned::<Arc<dyn ViewRenderer>>("views")?,
                app_name: args.get::<Environment>("config")?.get_string_or("app.name", "keel"),
            })
        },
    )
    .action(
        "index",
        [
            ParameterDescriptor::new("users").of::<UserService>(),
            ParameterDescriptor::new("request").of::<Request>(),
        ],
        |c, args| {
            let request = args.get::<Request>("request")?;
            c.index(&*args.get::<UserService>("users")?, Session::from_request(&request))
        },
    )
    .action("legacy", [ParameterDescriptor::new("request").of::<Request>()], |c, args| {
        Ok(c.redirect_back(&*args.get::<Request>("request")?, "/"))
    })
    .finish()
}

// ==================== UsersController ====================

pub struct UsersController {
    users: Arc<UserService>,
}

impl Validatable for UsersController {}

impl UsersController {
    fn index(&self) -> anyhow::Result<Response> {
        Ok(Response::json(&self.users.list_users())?)
    }

    fn show(&self, id: u32) -> anyhow::Result<Response> {
        match self.users.get_user_by_id(id) {
            Some(user) => Ok(Response::json(&user)?),
            None => Err(HttpFailure::with_message(
                FailureKind::NotFound,
                format!("User {} not found", id),
            )
            .into()),
        }
    }

    fn store(&self, request: &Request) -> anyhow::Result<Response> {
        let data: CreateUserRequest = self.validated_json(request)?;
        let user = self.users.create_user(data);
        Ok(Response::json(&user)?.with_status(StatusCode::CREATED))
    }
}

pub fn users() -> ControllerDefinition {
    ControllerDefinition::build::<UsersController, _>(
        "UsersController",
        [ParameterDescriptor::new("users").of::<UserService>()],
        |args| {
            Ok(UsersController {
                users: args.get::<UserService>("users")?,
            })
        },
    )
    .action("index", [], |c, _| c.index())
    .action("show", [ParameterDescriptor::new("id").of::<u32>()], |c, args| {
        c.show(*args.get::<u32>("id")?)
    })
    .action("store", [ParameterDescriptor::new("request").of::<Request>()], |c, args| {
        c.store(&*args.get::<Request>("request")?)
    })
    .finish()
}
