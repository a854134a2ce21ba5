//! RouteDaemon - scatter-gather route search
//!
//! CLI entry point for running the engine and issuing searches.

use std::fs;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use routedaemon::cli::{Cli, Command, OutputFormat, get_log_path};
use routedaemon::config::Config;
use routedaemon::daemon::Daemon;
use routedaemon::domain::{Completion, SearchResponse};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(providers = config.providers.len(), "RouteDaemon loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Run) => {
            debug!("main: matched Run command");
            cmd_run(&config).await
        }
        Some(ref command @ Command::Search { ref user_id, ref format, .. }) => {
            debug!(%user_id, %format, "main: matched Search command");
            let request = command
                .search_request()
                .ok_or_else(|| eyre::eyre!("search command without a request"))?;
            cmd_search(&config, user_id, request, format).await
        }
        Some(Command::Providers { format }) => {
            debug!(%format, "main: matched Providers command");
            cmd_providers(&config, &format)
        }
        None => {
            debug!("main: no command, printing help");
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Run the engine until SIGINT/SIGTERM
async fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    info!("Daemon starting...");
    let daemon = Daemon::start(config).await.context("Failed to start daemon")?;
    println!(
        "{} with {} provider(s); logs at {}",
        "RouteDaemon running".green(),
        config.providers.len(),
        get_log_path().display()
    );

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                debug!("cmd_run: SIGINT received, initiating shutdown");
                warn!("SIGINT received");
            }
            _ = sigterm.recv() => {
                debug!("cmd_run: SIGTERM received, initiating shutdown");
                warn!("SIGTERM received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("cmd_run: waiting for ctrl_c (non-Unix)");
        tokio::signal::ctrl_c().await?;
    }

    daemon.shutdown().await?;
    println!("{}", "RouteDaemon stopped".yellow());
    Ok(())
}

/// Start an in-process engine, run one search, print it
async fn cmd_search(
    config: &Config,
    user_id: &str,
    request: routedaemon::domain::SearchRequest,
    format: &OutputFormat,
) -> Result<()> {
    debug!(user_id, "cmd_search: called");
    let daemon = Daemon::start(config).await.context("Failed to start daemon")?;
    let result = daemon.client().search(user_id, request).await;
    daemon.shutdown().await?;
    let response = result.context("Search failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => print_response(&response),
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    let status = match response.completion {
        Completion::Completed => "completed".green(),
        Completion::TimedOut => "timed out (partial results)".yellow(),
    };
    println!("{} {} - {}", "Request".bold(), response.request_id, status);
    if !response.answered.is_empty() {
        println!("  answered: {}", response.answered.join(", "));
    }
    if !response.failed.is_empty() {
        println!("  failed:   {}", response.failed.join(", ").red());
    }
    if response.proposals.is_empty() {
        println!("  no proposals");
        return;
    }
    println!(
        "  {} proposal(s), price {:.2}..{:.2}, {}..{} min",
        response.proposals.len(),
        response.stats.min_price,
        response.stats.max_price,
        response.stats.min_minutes,
        response.stats.max_minutes
    );
    for proposal in &response.proposals {
        let stops: Vec<&str> = std::iter::once(proposal.origin().name.as_str())
            .chain(proposal.segments().iter().map(|s| s.destination.name.as_str()))
            .collect();
        println!(
            "  {:>9.2}  {:>5} min  {}  (valid until {})",
            proposal.total_price(),
            proposal.duration().num_minutes(),
            stops.join(" -> ").cyan(),
            proposal.valid_until.format("%Y-%m-%d %H:%M")
        );
    }
}

fn cmd_providers(config: &Config, format: &OutputFormat) -> Result<()> {
    debug!(%format, "cmd_providers: called");
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config.providers)?),
        OutputFormat::Text => {
            if config.providers.is_empty() {
                println!("No providers configured");
            }
            for provider in &config.providers {
                let target = provider.base_url.as_deref().unwrap_or("-");
                let kind = format!("{:?}", provider.kind).to_lowercase();
                println!("{:<20} {:<8} {}", provider.id.yellow(), kind, target);
            }
        }
    }
    Ok(())
}
