//! Command-line interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::app::StatusReport;

#[derive(Parser, Debug)]
#[command(name = "gmail-notifier")]
#[command(version)]
#[command(about = "Forward unread Gmail to a Discord direct message", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    /// Directory holding the database and legacy files (overrides storage.data_dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Poll Gmail and deliver notifications until interrupted (default)
    Run,

    /// Show stored credentials and delivery state
    Status,

    /// Forget the stored Gmail authorization
    ResetAuth {
        /// Also forget the uploaded client credentials
        #[arg(long)]
        all: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Run)
    }
}

pub fn print_status(report: &StatusReport) {
    let yes_no = |flag: bool| if flag { "stored" } else { "missing" };

    println!("\n========================================");
    println!("gmail-notifier status");
    println!("========================================");
    println!("Database: {}", report.database_path.display());
    println!("Notified messages: {}", report.processed_ids);
    println!("Client credentials: {}", yes_no(report.has_client_credentials));
    println!("Gmail authorization: {}", yes_no(report.has_user_token));
    if !report.legacy_files.is_empty() {
        println!("\nLegacy files to migrate on next run:");
        for path in &report.legacy_files {
            println!("  - {}", path.display());
        }
    }
    println!("========================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["gmail-notifier"]).unwrap();
        assert_eq!(cli.command(), &Commands::Run);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert_eq!(cli.config, PathBuf::from("config.toml"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gmail-notifier",
            "status",
            "--data-dir",
            "/var/lib/notifier",
            "--log-format",
            "json",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.command(), &Commands::Status);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/var/lib/notifier")));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_reset_auth_all() {
        let cli = Cli::try_parse_from(["gmail-notifier", "reset-auth", "--all"]).unwrap();
        assert_eq!(cli.command(), &Commands::ResetAuth { all: true });
    }

    #[test]
    fn test_init_config_defaults() {
        let cli = Cli::try_parse_from(["gmail-notifier", "init-config"]).unwrap();
        assert_eq!(
            cli.command(),
            &Commands::InitConfig {
                output: PathBuf::from("config.toml"),
                force: false
            }
        );
    }

    #[test]
    fn test_unknown_log_format_rejected() {
        assert!(Cli::try_parse_from(["gmail-notifier", "--log-format", "xml"]).is_err());
    }
}
