//! `serve` - 启动 HTTP 服务器

use std::sync::Arc;

use clap::{ArgMatches, Args, FromArgMatches};
use keel_core::{ParameterDescriptor, Registry};
use keel_web::KeelServer;

use crate::catalog::CommandDefinition;
use crate::output::Output;

/// `serve` 的命令行参数，未给出时使用 `server.host` / `server.port`
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// 监听地址
    #[arg(long)]
    pub host: Option<String>,

    /// 监听端口
    #[arg(long)]
    pub port: Option<u16>,
}

pub struct ServeCommand {
    registry: Arc<Registry>,
}

impl ServeCommand {
    pub fn execute(&self, args: &ServeArgs, output: &Output) -> anyhow::Result<i32> {
        let mut server = KeelServer::from_registry(&self.registry)?;
        let properties = server.properties().clone();
        server = server.bind(
            args.host.clone().unwrap_or(properties.host),
            args.port.unwrap_or(properties.port),
        );

        output.info("Keel development server started");
        output.writeln(&format!(" Server: http://{}", server.properties().address()));
        output.writeln("Press Ctrl+C to stop the server");

        tokio::runtime::Runtime::new()?.block_on(server.run())?;
        Ok(0)
    }
}

pub fn definition() -> CommandDefinition {
    CommandDefinition::build::<ServeCommand, _>(
        "serve",
        [ParameterDescriptor::new("registry").of::<Registry>()],
        |args| {
            Ok(ServeCommand {
                registry: args.get::<Registry>("registry")?,
            })
        },
    )
    .about("Start the HTTP server")
    .args::<ServeArgs>()
    .execute(
        [
            ParameterDescriptor::new("matches").of::<ArgMatches>(),
            ParameterDescriptor::new("output").of::<Output>(),
        ],
        |command, args| {
            let serve_args = ServeArgs::from_arg_matches(&*args.get::<ArgMatches>("matches")?)?;
            let output = args.get::<Output>("output")?;
            command.execute(&serve_args, &output)
        },
    )
}
