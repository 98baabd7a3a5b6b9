//! Supercomponent - pulse-paced conference coordinator
//!
//! CLI entry point: runs a supercomponent and optional demo modules.

use clap::Parser;
use eyre::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};
use wirecodec::Codec;

use supercomponent::cli::{Cli, render_status};
use supercomponent::demo::run_counter_module;
use supercomponent::{Conference, StatusSnapshot, Supercomponent, SupercomponentConfig};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
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

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install subscriber: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

async fn run(cli: &Cli, config: SupercomponentConfig) -> Result<StatusSnapshot> {
    debug!(cid = config.cid, level = %config.managed_level, "run: called");
    let codec = Codec::with_max_message_size(config.max_message_size);
    let conference = Conference::new(config.cid, codec);
    let (sink, source) = conference.join();

    let scheduler = Supercomponent::new(config.clone(), codec, sink, source);
    let handle = scheduler.handle();
    let scheduler_task = tokio::spawn(scheduler.run());

    let modules: Vec<_> = cli
        .demo_modules
        .iter()
        .map(|name| tokio::spawn(run_counter_module(conference.clone(), name.clone(), config.frequency)))
        .collect();

    match cli.cycles {
        Some(cycles) => {
            handle.wait_for(|s| s.metrics.cycles_completed >= cycles).await;
        }
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
            info!("Interrupted, stopping");
        }
    }
    handle.stop();
    let status = scheduler_task.await.context("Scheduler task failed")?;

    for (name, result) in cli.demo_modules.iter().zip(join_all(modules).await) {
        match result {
            Ok(Ok(exit_code)) => info!(module = %name, ?exit_code, "Demo module finished"),
            Ok(Err(e)) => warn!(module = %name, error = %e, "Demo module failed"),
            Err(e) => warn!(module = %name, error = %e, "Demo module task failed"),
        }
    }
    Ok(status)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = SupercomponentConfig::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = SupercomponentConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let status = run(&cli, config).await?;
    println!("{}", render_status(&status, &cli.format)?);
    Ok(())
}
