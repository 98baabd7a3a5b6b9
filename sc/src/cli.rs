//! Command-line interface and status output

use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::Result;
use tracing::debug;

use crate::config::{ManagedLevel, SupercomponentConfig};
use crate::messages::ModuleState;
use crate::scheduler::StatusSnapshot;

/// Supercomponent - conference coordinator with execution management
#[derive(Debug, Parser)]
#[command(
    name = "sc",
    about = "Conference coordinator with pulse-based execution management",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, help = "Path to config file (YAML or key = value)")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    /// Conference identifier
    #[arg(long)]
    pub cid: Option<u32>,

    /// Scheduler frequency in Hz
    #[arg(long)]
    pub freq: Option<f64>,

    /// Managed level for all modules
    #[arg(long, value_enum)]
    pub managed: Option<ManagedLevel>,

    /// Demo modules to run inside this process
    #[arg(long, value_delimiter = ',', value_name = "NAME,...")]
    pub demo_modules: Vec<String>,

    /// Stop after this many cycles instead of waiting for ctrl-c
    #[arg(long)]
    pub cycles: Option<u64>,

    /// Output format for the final status
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

impl Cli {
    /// Command-line values take priority over the config file
    pub fn apply(&self, config: &mut SupercomponentConfig) {
        debug!(cid = ?self.cid, freq = ?self.freq, managed = ?self.managed, "Cli::apply: called");
        if let Some(cid) = self.cid {
            config.cid = cid;
        }
        if let Some(freq) = self.freq {
            config.frequency = freq;
        }
        if let Some(managed) = self.managed {
            config.managed_level = managed;
        }
    }
}

/// Output format for the final status
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
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Render the final status in `format`
pub fn render_status(status: &StatusSnapshot, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(status)?),
        OutputFormat::Text => Ok(render_table(status)),
    }
}

fn render_table(status: &StatusSnapshot) -> String {
    let mut out = format!(
        "{} cid={} level={} state={:?} cycles={}\n",
        "Supercomponent".bold(),
        status.cid,
        status.managed_level,
        status.state,
        status.metrics.cycles_completed,
    );
    out.push_str(&format!(
        "{:<16} {:<12} {:>8} {:>8} {:>8}  {}\n",
        "MODULE", "STATE", "PULSES", "ACKS", "STALLS", "NOTES"
    ));
    for module in &status.modules {
        let state = if module.terminated {
            format!("{:<12}", "TERMINATED").yellow()
        } else if module.state == ModuleState::Running {
            format!("{:<12}", "RUNNING").green()
        } else {
            format!("{:<12}", "NOT_RUNNING").normal()
        };
        let stalls = format!("{:>8}", module.stalls);
        let stalls = if module.stalls > 0 { stalls.red() } else { stalls.normal() };

        let mut notes = Vec::new();
        if module.excluded {
            notes.push("excluded".to_string());
        }
        if let Some(code) = module.exit_code {
            notes.push(format!("exit={:?}", code));
        }
        out.push_str(&format!(
            "{} {} {:>8} {:>8} {}  {}\n",
            format!("{:<16}", module.name).cyan(),
            state,
            module.pulses,
            module.acks,
            stalls,
            notes.join(", ")
        ));
    }
    let m = &status.metrics;
    out.push_str(&format!(
        "pulses={} acks={} stalls={} rejected-acks={} malformed={} retries={}\n",
        m.pulses_sent, m.acks_received, m.stalls, m.rejected_acks, m.malformed_messages, m.send_retries
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerState;
    use crate::tracker::ModuleDescriptor;
    use wirecodec::TimeStamp;

    fn status() -> StatusSnapshot {
        let mut player = ModuleDescriptor::new("player", 1, 10.0, TimeStamp::from_micros(1));
        player.state = ModuleState::Running;
        player.stalls = 2;
        let monitor = ModuleDescriptor::new("monitor", 2, 10.0, TimeStamp::from_micros(1)).excluded(true);
        StatusSnapshot {
            cid: 111,
            state: SchedulerState::Stopped,
            managed_level: ManagedLevel::PulseTimeAck,
            modules: vec![player, monitor],
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "sc",
            "--cid",
            "42",
            "--freq",
            "2",
            "--managed",
            "pulse_time_ack",
            "--demo-modules",
            "a,b",
            "--cycles",
            "3",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.demo_modules, vec!["a", "b"]);
        assert_eq!(cli.cycles, Some(3));
        assert_eq!(cli.format, OutputFormat::Json);

        let mut config = SupercomponentConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.cid, 42);
        assert_eq!(config.frequency, 2.0);
        assert_eq!(config.managed_level, ManagedLevel::PulseTimeAck);
    }

    #[test]
    fn test_unknown_managed_level_rejected() {
        assert!(Cli::try_parse_from(["sc", "--managed", "simulation"]).is_err());
    }

    #[test]
    fn test_render_text() {
        colored::control::set_override(false);
        let text = render_status(&status(), &OutputFormat::Text).unwrap();
        assert!(text.contains("level=pulse_time_ack"));
        assert!(text.lines().any(|l| l.starts_with("player") && l.contains("RUNNING")));
        assert!(text.lines().any(|l| l.starts_with("monitor") && l.contains("excluded")));
    }

    #[test]
    fn test_render_json() {
        let json = render_status(&status(), &OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cid"], 111);
        assert_eq!(value["modules"][0]["name"], "player");
        assert_eq!(value["modules"][0]["stalls"], 2);
        assert_eq!(value["modules"][1]["excluded"], true);
    }
}
