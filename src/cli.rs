//! CLI argument parsing for the delivery-batcher binary.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "delivery-batcher", about = "Delivery batch generation worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the NATS worker (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Run one batching pass and print the result as JSON
    Generate {
        /// Delivery date (YYYY-MM-DD); defaults to the next delivery day
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Skip the routing service and use the geographic heuristic
        #[arg(long)]
        force_fallback: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["delivery-batcher", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["delivery-batcher"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_generate_with_date() {
        let cli = Cli::parse_from(["delivery-batcher", "generate", "--date", "2026-10-23", "--force-fallback"]);
        match cli.command {
            Some(Command::Generate { date, force_fallback }) => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 23));
                assert!(force_fallback);
            }
            _ => panic!("expected generate command"),
        }
    }

    #[test]
    fn test_cli_generate_defaults() {
        let cli = Cli::parse_from(["delivery-batcher", "generate"]);
        assert!(matches!(
            cli.command,
            Some(Command::Generate { date: None, force_fallback: false })
        ));
    }

    #[test]
    fn test_cli_generate_rejects_bad_date() {
        assert!(Cli::try_parse_from(["delivery-batcher", "generate", "--date", "next tuesday"]).is_err());
    }
}
