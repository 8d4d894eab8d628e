pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "boilerbrain",
    about = "BoilerBrain operator CLI",
    long_about = "Prepare the knowledge store, inspect configuration, and run diagnostic turns from the terminal.",
    after_help = "Examples:\n  boilerbrain doctor --json\n  boilerbrain seed\n  boilerbrain ask --session van-7 \"Ideal Logic Combi 30 showing F1\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load and verify the deterministic boiler knowledge seed")]
    Seed,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, knowledge tables, and reasoning provider")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List the knowledge tables the reasoning model may query")]
    Tables,
    #[command(about = "Run one diagnostic turn for a session")]
    Ask {
        #[arg(long, help = "Conversation session identifier")]
        session: String,
        #[arg(help = "Question from the engineer")]
        question: String,
        #[arg(long, help = "Include the stored session history in the output")]
        show_history: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Tables => commands::tables::run(),
        Command::Ask { session, question, show_history } => {
            commands::ask::run(&session, &question, show_history)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
