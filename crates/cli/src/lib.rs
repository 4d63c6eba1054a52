pub mod commands;
pub mod logging;
pub mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use shopper_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "shopper",
    about = "Shopping concierge operator CLI",
    long_about = "Chat with the shopping concierge, manage the local catalog database, and inspect configuration.",
    after_help = "Examples:\n  shopper seed\n  shopper chat --offline\n  shopper chat -m \"sandals under $50\" -m \"summarize the first one\"\n  shopper doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Read configuration from this TOML file instead of shopper.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Talk to the concierge interactively, or run scripted turns and print a JSON transcript")]
    Chat {
        #[arg(short, long = "message", help = "Run this turn non-interactively (repeatable)")]
        messages: Vec<String>,
        #[arg(long, help = "Skip the language model; rule-based routing and no summaries, ideas or SQL")]
        offline: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog into the analytics database")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, catalog readiness, and model configuration")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    let result = match cli.command {
        Command::Chat { messages, offline } => commands::chat::run(&options, messages, offline),
        Command::Migrate => commands::migrate::run(&options),
        Command::Seed => commands::seed::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
