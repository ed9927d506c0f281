pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hearth",
    about = "Hearth operator CLI",
    long_about = "Ask the assistant one-shot questions and inspect the tool catalog, \
                  effective configuration, and runtime readiness.",
    after_help = "Examples:\n  hearth ask \"add a task to call Jane Doe tomorrow\"\n  hearth tools\n  hearth doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Send one question through the assistant and print the answer")]
    Ask {
        #[arg(help = "The question or instruction to send")]
        question: String,
        #[arg(long, default_value = "local", help = "User id the turn is attributed to")]
        user: String,
        #[arg(long, help = "Approve any confirmation the assistant asks for and finish the work")]
        yes: bool,
    },
    #[command(about = "List every registered tool with its approval level and permissions")]
    Tools {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model credentials, and catalog integrity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Ask { question, user, yes } => commands::ask::run(&question, &user, yes),
        Command::Tools { json } => {
            commands::CommandResult { exit_code: 0, output: commands::tools::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
