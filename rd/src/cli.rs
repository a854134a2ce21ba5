//! CLI command definitions and subcommands

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::domain::{SearchFilters, SearchRequest};

/// RouteDaemon - scatter-gather route search
#[derive(Parser)]
#[command(
    name = "rd",
    about = "Fan route searches out to providers and merge their answers",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine in the foreground until SIGINT/SIGTERM
    Run,

    /// Run one search against an in-process engine and print the result
    Search {
        /// Origin place
        origin: String,

        /// Destination place
        destination: String,

        /// Departure time (RFC 3339, e.g. 2026-11-02T08:00:00Z)
        #[arg(value_name = "ORIGIN_TIME")]
        origin_time: DateTime<Utc>,

        /// Upper bound on total price
        #[arg(long)]
        max_price: Option<f64>,

        /// Proposals must stay valid at least until this time (RFC 3339)
        #[arg(long)]
        min_valid_until: Option<DateTime<Utc>>,

        /// Exact arrival time at the destination (RFC 3339)
        #[arg(long)]
        destination_time: Option<DateTime<Utc>>,

        /// Answer from the cache only
        #[arg(long)]
        only_cached: bool,

        /// User on whose behalf to search
        #[arg(short, long, default_value = "cli")]
        user_id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the configured provider roster
    Providers {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

impl Command {
    /// Build the search request a `search` command describes
    pub fn search_request(&self) -> Option<SearchRequest> {
        debug!("Command::search_request: called");
        let Command::Search {
            origin,
            destination,
            origin_time,
            max_price,
            min_valid_until,
            destination_time,
            only_cached,
            ..
        } = self
        else {
            return None;
        };
        let filters = SearchFilters {
            max_price: *max_price,
            min_valid_until: *min_valid_until,
            destination_time: *destination_time,
            only_cached: only_cached.then_some(true),
        };
        let request = SearchRequest::new(origin.clone(), destination.clone(), *origin_time);
        if filters == SearchFilters::default() {
            Some(request)
        } else {
            Some(request.with_filters(filters))
        }
    }
}

/// Output format for search and roster listings
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file `setup_logging` writes to
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("routedaemon")
        .join("logs")
        .join("routedaemon.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("plain".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_search_command_parses_filters() {
        let cli = Cli::try_parse_from([
            "rd",
            "--log-level",
            "debug",
            "search",
            "A",
            "B",
            "2030-01-01T08:00:00Z",
            "--max-price",
            "150",
            "--only-cached",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        let command = cli.command.unwrap();
        let request = command.search_request().unwrap();
        assert_eq!(request.origin, "A");
        assert_eq!(request.max_price(), Some(150.0));
        assert!(request.only_cached());
        assert!(matches!(command, Command::Search { format: OutputFormat::Json, .. }));
    }

    #[test]
    fn test_search_without_filters() {
        let cli = Cli::try_parse_from(["rd", "search", "A", "B", "2030-01-01T08:00:00Z"]).unwrap();
        let request = cli.command.unwrap().search_request().unwrap();
        assert!(request.filters.is_none());
    }

    #[test]
    fn test_bad_time_rejected() {
        assert!(Cli::try_parse_from(["rd", "search", "A", "B", "tomorrow"]).is_err());
    }

    #[test]
    fn test_non_search_has_no_request() {
        assert!(Command::Run.search_request().is_none());
    }
}
