//! Command-line interface for scuttle
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Scuttle - FreeBSD jail teardown
#[derive(Parser)]
#[command(name = "scuttle")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (default: /usr/local/etc/scuttle.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Tear down a jail and reclaim everything it holds
    Cleanup {
        /// Jail name or JID
        #[arg(short, long)]
        jail: String,

        /// Seconds to wait for jailed processes to exit
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Leave the first devfs mount below the jail root in place
        #[arg(long)]
        skip_first_devfs: bool,

        /// Run in this process instead of a disposable child
        #[arg(long)]
        in_process: bool,
    },

    /// Show what a cleanup would touch, without changing anything
    Inspect {
        /// Jail name or JID
        #[arg(short, long)]
        jail: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List running jails
    Jails {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Child side of `cleanup`: request on stdin, report on stdout
    #[command(name = "isolated-cleanup", hide = true)]
    IsolatedCleanup,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "scuttle", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cleanup() {
        let cli = Cli::try_parse_from([
            "scuttle", "cleanup", "-j", "web", "--timeout", "10", "--skip-first-devfs",
        ])
        .unwrap();

        match cli.command {
            Commands::Cleanup {
                jail,
                timeout,
                skip_first_devfs,
                in_process,
            } => {
                assert_eq!(jail, "web");
                assert_eq!(timeout, Some(10));
                assert!(skip_first_devfs);
                assert!(!in_process);
            }
            _ => panic!("expected cleanup"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["scuttle", "jails", "-v", "-c", "/tmp/s.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.toml")));
    }

    #[test]
    fn test_isolated_cleanup_is_hidden() {
        let cli = Cli::try_parse_from(["scuttle", "isolated-cleanup"]).unwrap();
        assert!(matches!(cli.command, Commands::IsolatedCleanup));

        let help = Cli::command().render_help().to_string();
        assert!(!help.contains("isolated-cleanup"));
    }

    #[test]
    fn test_cleanup_requires_jail() {
        assert!(Cli::try_parse_from(["scuttle", "cleanup"]).is_err());
    }
}
