//! CLI definitions for watchdog.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use watchdog::database::models::StatusRange;

const MAX_STATS_HOURS: u64 = 24 * 366;

/// watchdog CLI.
#[derive(Parser)]
#[command(name = "watchdog")]
#[command(about = "HTTP health checks with alerting")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.config/watchdog/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the monitoring service in the foreground (default)
    Run,

    /// Register a new target
    Add {
        /// URL to probe (http or https)
        url: String,

        #[command(flatten)]
        options: TargetArgs,

        /// Add the target paused
        #[arg(long)]
        paused: bool,
    },

    /// Change an existing target
    Update {
        /// Target id (or unique prefix)
        id: String,

        /// New URL
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        options: TargetArgs,
    },

    /// Delete a target with its history
    Remove {
        /// Target id (or unique prefix)
        id: String,
    },

    /// List targets and their current state
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Stop checking a target
    Pause {
        /// Target id (or unique prefix)
        id: String,
    },

    /// Resume checking a target
    Resume {
        /// Target id (or unique prefix)
        id: String,
    },

    /// Resume every target
    StartAll,

    /// Pause every target
    StopAll,

    /// Show the latest check results of a target
    Results {
        /// Target id (or unique prefix)
        id: String,

        /// Number of results to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show uptime, state and recent alerts of a target
    Stats {
        /// Target id (or unique prefix)
        id: String,

        /// Window for the uptime figures, in hours (at most 366 days)
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(1..=MAX_STATS_HOURS))]
        hours: u64,
    },

    /// Print the effective configuration
    Config,
}

/// Target fields shared by `add` and `update`
#[derive(Args, Default)]
pub(crate) struct TargetArgs {
    /// Display name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Seconds between checks
    #[arg(short, long)]
    pub interval: Option<u64>,

    /// Seconds before a check counts as timed out
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// HTTP method
    #[arg(short, long)]
    pub method: Option<String>,

    /// Request header as `Name: value` (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Healthy status codes, e.g. `200-299` or `204`
    #[arg(long)]
    pub expect: Option<StatusRange>,

    /// Telegram chat that receives this target's alerts
    #[arg(long)]
    pub chat_id: Option<String>,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw.split_once(':').ok_or_else(|| format!("expected `Name: value`, got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header name is empty in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_command() {
        let cli = Cli::try_parse_from([
            "watchdog",
            "add",
            "https://example.com",
            "--interval",
            "30",
            "--header",
            "Authorization: Bearer x",
            "--expect",
            "200-299",
        ])
        .unwrap();

        let Some(Commands::Add { url, options, paused }) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(url, "https://example.com");
        assert_eq!(options.interval, Some(30));
        assert_eq!(options.headers, vec![("Authorization".to_string(), "Bearer x".to_string())]);
        assert_eq!(options.expect, Some(StatusRange::new(200, 299)));
        assert!(!paused);
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["watchdog", "list", "--config", "/tmp/w.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/w.toml")));
        assert!(matches!(cli.command, Some(Commands::List { json: false })));
    }

    #[test]
    fn stats_window_is_bounded() {
        let cli = Cli::try_parse_from(["watchdog", "stats", "abc", "--hours", "48"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Stats { hours: 48, .. })));

        assert!(Cli::try_parse_from(["watchdog", "stats", "abc", "--hours", "0"]).is_err());
        assert!(Cli::try_parse_from(["watchdog", "stats", "abc", "--hours", "18446744073709551615"]).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }
}
