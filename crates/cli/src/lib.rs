pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "salescope",
    about = "Salescope sales assistant CLI",
    long_about = "Chat with the sales assistant, prepare the analytics database, and inspect runtime readiness.",
    after_help = "Examples:\n  salescope seed\n  salescope chat --session demo\n  salescope doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive chat session (type `exit` to quit)")]
    Chat {
        #[arg(long, help = "Resume an existing session id instead of minting a new one")]
        session: Option<String>,
    },
    #[command(about = "Apply pending migrations to the analytics and session databases")]
    Migrate,
    #[command(about = "Load the deterministic demo sales dataset into the analytics database")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, session store, and reasoning backend readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Chat { session } => commands::chat::run(session),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
