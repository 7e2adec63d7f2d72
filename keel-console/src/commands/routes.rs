//! `routes` - 列出路由表

use keel_core::ParameterDescriptor;
use keel_web::router::SharedRouter;

use crate::catalog::CommandDefinition;
use crate::output::Output;

pub struct RoutesCommand {
    router: SharedRouter,
}

impl RoutesCommand {
    pub fn execute(&self, output: &Output) -> i32 {
        let routes = self.router.routes();
        if routes.is_empty() {
            output.writeln("No routes registered.");
            return 0;
        }

        let rows: Vec<(String, String, String)> = routes
            .iter()
            .map(|route| {
                (
                    route.method.to_string(),
                    route.path.clone(),
                    route.target.clone(),
                )
            })
            .collect();
        let method_width = rows.iter().map(|row| row.0.len()).max().unwrap_or(0).max(6);
        let path_width = rows.iter().map(|row| row.1.len()).max().unwrap_or(0).max(4);

        output.writeln(&format!(
            "{:<mw$}  {:<pw$}  TARGET",
            "METHOD",
            "PATH",
            mw = method_width,
            pw = path_width
        ));
        for (method, path, target) in rows {
            output.writeln(&format!(
                "{:<mw$}  {:<pw$}  {}",
                method,
                path,
                target,
                mw = method_width,
                pw = path_width
            ));
        }
        0
    }
}

pub fn definition() -> CommandDefinition {
    CommandDefinition::build::<RoutesCommand, _>(
        "routes",
        [ParameterDescriptor::new("router").of::<SharedRouter>()],
        |args| {
            Ok(RoutesCommand {
                router: args.cloned::<SharedRouter>("router")?,
            })
        },
    )
    .about("List registered routes")
    .execute([ParameterDescriptor::new("output").of::<Output>()], |command, args| {
        let output = args.get::<Output>("output")?;
        Ok(command.execute(&output))
    })
}
