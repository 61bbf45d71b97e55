use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

/// Warden script sandbox.
///
/// Checks scripts against a policy and rewrites them so that every call made
/// at run time goes through the capability proxy and every loop is bounded.
///
/// EXAMPLES:
///     warden validate job.rb                    Check against ./warden.toml
///     warden validate job.rb --policy strict.toml --json
///     warden rewrite job.rb --local record      Print the instrumented script
///
/// ENVIRONMENT VARIABLES:
///     WARDEN_DIAGNOSTICS      Set to 'json' for JSON output by default
///     WARDEN_LOG              Log filter (default: warn)
///     WARDEN_MAX_ITERATIONS   Override the policy iteration limit
///     WARDEN_MAX_INVOCATIONS  Override the policy invocation limit
///     WARDEN_DISABLE          Set to '1' to disable enforcement
#[derive(Parser)]
#[command(name = "warden")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a script against a policy
    ///
    /// Prints one diagnostic per line and exits with status 1 when any
    /// violation or syntax error is found.
    ///
    /// EXAMPLES:
    ///     warden validate job.rb
    ///     warden validate job.rb --json
    #[command(visible_alias = "v")]
    Validate {
        /// Path to the script
        file: PathBuf,
        /// Policy file (default: nearest warden.toml)
        #[arg(long, short = 'p')]
        policy: Option<PathBuf>,
        /// Output diagnostics in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Instrument a script for sandboxed evaluation
    ///
    /// EXAMPLES:
    ///     warden rewrite job.rb
    ///     warden rewrite job.rb --local record --local user -o job.safe.rb
    ///     warden rewrite job.rb --keep-going
    #[command(visible_alias = "r")]
    Rewrite {
        /// Path to the script
        file: PathBuf,
        /// Policy file (default: nearest warden.toml)
        #[arg(long, short = 'p')]
        policy: Option<PathBuf>,
        /// Local bound by the host before evaluation (repeatable)
        #[arg(long = "local", short = 'l', value_name = "NAME")]
        locals: Vec<String>,
        /// Report violations on stderr instead of stopping at the first
        #[arg(long)]
        keep_going: bool,
        /// Write the result here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let config = config::Config::from_env();
    init_tracing(&config.log_filter);

    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { file, policy, json } => {
            commands::validate::run(commands::validate::ValidateArgs {
                file,
                policy,
                json: json || config.default_json,
            })?;
        }
        Commands::Rewrite {
            file,
            policy,
            locals,
            keep_going,
            output,
        } => {
            commands::rewrite::run(commands::rewrite::RewriteArgs {
                file,
                policy,
                locals,
                keep_going,
                output,
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_validate_json_flag() {
        let cli = Cli::parse_from(["warden", "validate", "job.rb", "--json"]);
        match cli.command {
            Commands::Validate { json, file, .. } => {
                assert!(json);
                assert_eq!(file, PathBuf::from("job.rb"));
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_cli_rewrite_repeated_locals() {
        let cli = Cli::parse_from([
            "warden", "rewrite", "job.rb", "--local", "record", "-l", "user", "--keep-going",
        ]);
        match cli.command {
            Commands::Rewrite {
                locals, keep_going, ..
            } => {
                assert_eq!(locals, vec!["record", "user"]);
                assert!(keep_going);
            }
            _ => panic!("Expected Rewrite command"),
        }
    }

    #[test]
    fn test_alias_v_for_validate() {
        let cli = Cli::parse_from(["warden", "v", "job.rb"]);
        assert!(matches!(cli.command, Commands::Validate { .. }));
    }

    #[test]
    fn test_alias_r_for_rewrite() {
        let cli = Cli::parse_from(["warden", "r", "job.rb"]);
        assert!(matches!(cli.command, Commands::Rewrite { .. }));
    }
}
