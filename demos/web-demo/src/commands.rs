//! 演示命令

use clap::{ArgMatches, Args, FromArgMatches};
use keel_console::prelude::*;
use keel_core::{Environment, ParameterDescriptor};
use keel_web::auth::JwtDecoder;
use serde_json::json;

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// token 的 subject
    #[arg(long, default_value = "demo-user")]
    pub subject: String,
}

pub struct TokenCommand {
    decoder: JwtDecoder,
}

/// `token` - 用配置的密钥签发一个演示 JWT
pub fn token() -> CommandDefinition {
    CommandDefinition::build::<TokenCommand, _>(
        "token",
        [ParameterDescriptor::new("config").of::<Environment>()],
        |args| {
            Ok(TokenCommand {
                decoder: JwtDecoder::from_environment(&*args.get::<Environment>("config")?)?,
            })
        },
    )
    .about("Sign a demo JWT for the /api routes")
    .args::<TokenArgs>()
    .execute(
        [
            ParameterDescriptor::new("matches").of::<ArgMatches>(),
            ParameterDescriptor::new("output").of::<Output>(),
        ],
        |command, args| {
            let token_args = TokenArgs::from_arg_matches(&*args.get::<ArgMatches>("matches")?)?;
            let token = command.decoder.sign(&json!({ "sub": token_args.subject }))?;
            args.get::<Output>("output")?.writeln(&token);
            Ok(0)
        },
    )
}
