pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use crate::commands::resolve::ResolveArgs;

#[derive(Debug, Parser)]
#[command(
    name = "synapse",
    about = "Synapse operator CLI",
    long_about = "Apply migrations, inspect configuration, and check which process version a request would be served by.",
    after_help = "Examples:\n  synapse migrate\n  synapse config\n  synapse resolve --tenant acme --process summarise --environment sandbox --pin 3"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Resolve the version a generation request would use, with its response headers")]
    Resolve(ResolveArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Resolve(args) => commands::resolve::run(&args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
