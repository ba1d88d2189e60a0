//! Scuttle - FreeBSD jail teardown
//!
//! Kills a jail's processes and reclaims its nested jails, epairs, mounts
//! and VMM devices.

mod cli;

use cli::{Cli, Commands};
use scuttle::cleanup::{self, CleanupPlan, isolate};
use scuttle::config;
use scuttle::error::{Error, Result};
use scuttle::host::{FreeBsdHost, Host};
use scuttle::jail::JailIdentity;
use scuttle::trace::Tracer;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// RUST_LOG wins over --verbose
fn init_logging(verbose: bool) {
    let default = if verbose { "scuttle=debug" } else { "scuttle=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_jail(host: &FreeBsdHost, key: &str) -> Result<JailIdentity> {
    let jails = host.list_jails()?;
    JailIdentity::find(&jails, key)
        .cloned()
        .ok_or_else(|| Error::JailNotFound(key.to_string()))
}

fn run(cli: Cli) -> Result<i32> {
    // Commands that don't require config
    match cli.command {
        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            return Ok(0);
        }
        Commands::IsolatedCleanup => {
            isolate::serve_isolated()?;
            return Ok(0);
        }
        _ => {}
    }

    let config = config::load_or_default(cli.config.as_deref())?;
    let host = FreeBsdHost::new(config.host.vmm_dir.clone());

    match cli.command {
        Commands::Cleanup {
            jail,
            timeout,
            skip_first_devfs,
            in_process,
        } => {
            let mut options = config.options()?;
            if let Some(secs) = timeout {
                if secs == 0 {
                    return Err(Error::ConfigValidation(
                        "--timeout must be at least 1 second".into(),
                    ));
                }
                options.kill_timeout = Duration::from_secs(secs);
            }
            options.skip_first_devfs |= skip_first_devfs;

            let jail = resolve_jail(&host, &jail)?;
            let tracer = Tracer::with_tracing();

            let outcome = if in_process {
                cleanup::cleanup_jail_in_process(host, &jail, &options, &tracer)?
            } else {
                cleanup::cleanup_jail(&host, &jail, &options, &tracer)?
            };

            if !outcome.is_success() {
                eprintln!(
                    "Cleanup of jail '{}' finished with {} failure(s)",
                    jail.name, outcome.failures
                );
            }
            Ok(outcome.exit_code())
        }

        Commands::Inspect { jail, json } => {
            let jail = resolve_jail(&host, &jail)?;
            let plan = CleanupPlan::collect(&host, &jail, config.cleanup.skip_first_devfs)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("{}", plan);
            }
            Ok(0)
        }

        Commands::Jails { json } => {
            let jails = host.list_jails()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&jails)?);
            } else {
                println!("{:<6} {:<20} {:<8} {}", "JID", "NAME", "PARENT", "PATH");
                println!("{}", "-".repeat(60));
                for jail in &jails {
                    let parent = jail.parent().map(|p| p.to_string()).unwrap_or_default();
                    println!(
                        "{:<6} {:<20} {:<8} {}",
                        jail.jid,
                        jail.name,
                        parent,
                        jail.path.display()
                    );
                }
            }
            Ok(0)
        }

        Commands::Completion { .. } | Commands::IsolatedCleanup => Ok(0),
    }
}
