//! Supercomponent configuration types and loading
//!
//! Two file formats are accepted: the YAML layout below, and the older
//! `key = value # comment` layout with `odsupercomponent.*` keys.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use eyre::{Context, Result, bail, eyre};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wirecodec::DEFAULT_MAX_MESSAGE_SIZE;

/// Execution-management policy applied to every non-excluded module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ManagedLevel {
    /// Modules run on their own clocks
    #[default]
    #[value(name = "not_managed")]
    NotManaged,
    /// One pulse per module per cycle, shifted by a fixed increment
    #[value(name = "pulse_shift")]
    PulseShift,
    /// Modules run one at a time, each acknowledging its pulse
    #[value(name = "pulse_time_ack")]
    PulseTimeAck,
}

impl ManagedLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotManaged => "not_managed",
            Self::PulseShift => "pulse_shift",
            Self::PulseTimeAck => "pulse_time_ack",
        }
    }
}

impl fmt::Display for ManagedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagedLevel {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "not_managed" | "none" => Ok(Self::NotManaged),
            "pulse_shift" => Ok(Self::PulseShift),
            "pulse_time_ack" => Ok(Self::PulseTimeAck),
            other => Err(eyre!("Unknown managed level: {}", other)),
        }
    }
}

/// Settings for `pulse_shift`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PulseShiftConfig {
    /// Offset added per module position, in microseconds
    #[serde(default = "default_shift_increment_micros")]
    pub shift_increment_micros: u64,
}

fn default_shift_increment_micros() -> u64 {
    debug!("default_shift_increment_micros: called");
    10_000
}

impl Default for PulseShiftConfig {
    fn default() -> Self {
        Self {
            shift_increment_micros: default_shift_increment_micros(),
        }
    }
}

impl PulseShiftConfig {
    pub fn shift_increment(&self) -> Duration {
        Duration::from_micros(self.shift_increment_micros)
    }
}

/// Settings for `pulse_time_ack`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PulseTimeAckConfig {
    /// How long to wait for each module's ack, in milliseconds
    #[serde(default = "default_timeout_millis")]
    pub timeout_millis: u64,

    /// Pause after an ack before pulsing the next module, in microseconds
    #[serde(default = "default_yield_micros")]
    pub yield_micros: u64,

    /// Modules that are tracked but never pulsed
    #[serde(default)]
    pub excluded_modules: BTreeSet<String>,
}

fn default_timeout_millis() -> u64 {
    debug!("default_timeout_millis: called");
    5000
}

fn default_yield_micros() -> u64 {
    debug!("default_yield_micros: called");
    5000
}

impl Default for PulseTimeAckConfig {
    fn default() -> Self {
        Self {
            timeout_millis: default_timeout_millis(),
            yield_micros: default_yield_micros(),
            excluded_modules: BTreeSet::new(),
        }
    }
}

impl PulseTimeAckConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }

    pub fn yield_delay(&self) -> Duration {
        Duration::from_micros(self.yield_micros)
    }
}

/// Main supercomponent configuration
///
/// Fixed for the lifetime of one run; the managed level in particular is never
/// switched while modules are connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SupercomponentConfig {
    /// Conference identifier
    #[serde(default = "default_cid")]
    pub cid: u32,

    /// Scheduler cycle frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency: f64,

    #[serde(default)]
    pub managed_level: ManagedLevel,

    /// Reject state reports that are not newer than the stored one
    #[serde(default)]
    pub strict_timestamps: bool,

    /// Largest encoded container accepted or produced, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Capacity of the inbound container queue
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Log level used when none is given on the command line
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub pulse_shift: PulseShiftConfig,

    #[serde(default)]
    pub pulse_time_ack: PulseTimeAckConfig,
}

fn default_cid() -> u32 {
    debug!("default_cid: called");
    111
}

fn default_frequency() -> f64 {
    debug!("default_frequency: called");
    10.0
}

fn default_max_message_size() -> usize {
    debug!("default_max_message_size: called");
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_inbox_capacity() -> usize {
    debug!("default_inbox_capacity: called");
    1000
}

impl Default for SupercomponentConfig {
    fn default() -> Self {
        debug!("SupercomponentConfig::default: called");
        Self {
            cid: default_cid(),
            frequency: default_frequency(),
            managed_level: ManagedLevel::default(),
            strict_timestamps: false,
            max_message_size: default_max_message_size(),
            inbox_capacity: default_inbox_capacity(),
            log_level: None,
            pulse_shift: PulseShiftConfig::default(),
            pulse_time_ack: PulseTimeAckConfig::default(),
        }
    }
}

impl SupercomponentConfig {
    /// Length of one scheduler cycle
    ///
    /// Never zero. A frequency `validate` would reject falls back to 1 Hz.
    pub fn cycle_period(&self) -> Duration {
        debug!(frequency = %self.frequency, "SupercomponentConfig::cycle_period: called");
        usable_period(self.frequency)
    }

    pub fn is_excluded(&self, module: &str) -> bool {
        self.pulse_time_ack.excluded_modules.contains(module)
    }

    /// Managed level a given module is told to use
    pub fn effective_level(&self, module: &str) -> ManagedLevel {
        if self.is_excluded(module) {
            ManagedLevel::NotManaged
        } else {
            self.managed_level
        }
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        match period_of(self.frequency) {
            None => bail!("Frequency must be a positive number of Hz, got {}", self.frequency),
            Some(period) if period < MIN_PERIOD => {
                bail!("Frequency {} Hz is too high, the cycle period rounds to zero", self.frequency)
            }
            Some(_) => {}
        }
        if self.inbox_capacity == 0 {
            bail!("Inbox capacity must be at least 1");
        }
        if self.max_message_size == 0 {
            bail!("Max message size must be at least 1 byte");
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let mut candidates = vec![PathBuf::from("supercomponent.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("supercomponent").join("supercomponent.yml"));
        }
        candidates.push(PathBuf::from("configuration"));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", candidate.display(), e),
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Log level from the config file, read before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::from_key_values(&content)?
        };

        tracing::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parse the `key = value # comment` format
    ///
    /// Keys outside the `odsupercomponent.` namespace belong to other
    /// components and are skipped.
    pub fn from_key_values(content: &str) -> Result<Self> {
        debug!("SupercomponentConfig::from_key_values: called");
        let mut config = Self::default();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                bail!("Line {}: expected `key = value`, got `{}`", lineno + 1, line);
            };
            config
                .apply_key_value(key.trim(), value.trim())
                .context(format!("Line {}", lineno + 1))?;
        }
        Ok(config)
    }

    fn apply_key_value(&mut self, key: &str, value: &str) -> Result<()> {
        let Some(key) = key.strip_prefix("odsupercomponent.") else {
            debug!(%key, "SupercomponentConfig::apply_key_value: skipping foreign key");
            return Ok(());
        };
        match key {
            "cid" => self.cid = parse_number(key, value)?,
            "frequency" | "freq" => self.frequency = parse_number(key, value)?,
            "managedlevel" | "managed_level" => self.managed_level = value.parse()?,
            "strict_timestamps" => self.strict_timestamps = parse_number(key, value)?,
            "pulseshift.shift" => self.pulse_shift.shift_increment_micros = parse_number(key, value)?,
            "pulsetimeack.timeout" => self.pulse_time_ack.timeout_millis = parse_number(key, value)?,
            "pulsetimeack.yield" => self.pulse_time_ack.yield_micros = parse_number(key, value)?,
            "pulsetimeack.exclude" => {
                self.pulse_time_ack.excluded_modules = value
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect();
            }
            other => warn!("Ignoring unknown configuration key odsupercomponent.{}", other),
        }
        Ok(())
    }
}

/// Module-side runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModuleConfig {
    /// Name announced to the supercomponent; unique within a conference
    pub name: String,

    /// Own cycle frequency in Hz, used when not managed
    #[serde(default = "default_frequency")]
    pub frequency: f64,

    /// How long to wait for the supercomponent to answer the announcement
    #[serde(default = "default_handshake_timeout_millis")]
    pub handshake_timeout_millis: u64,

    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

fn default_handshake_timeout_millis() -> u64 {
    debug!("default_handshake_timeout_millis: called");
    5000
}

impl ModuleConfig {
    pub fn new(name: impl Into<String>, frequency: f64) -> Self {
        Self {
            name: name.into(),
            frequency,
            handshake_timeout_millis: default_handshake_timeout_millis(),
            inbox_capacity: default_inbox_capacity(),
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_millis)
    }

    /// Length of one free-running cycle; unusable frequencies fall back to 1 Hz
    pub fn period(&self) -> Duration {
        usable_period(self.frequency)
    }
}

const MIN_PERIOD: Duration = Duration::from_nanos(1);
const FALLBACK_PERIOD: Duration = Duration::from_secs(1);

/// `1 / frequency`, or `None` for a frequency with no representable period
fn period_of(frequency: f64) -> Option<Duration> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / frequency).ok()
}

fn usable_period(frequency: f64) -> Duration {
    match period_of(frequency) {
        Some(period) => period.max(MIN_PERIOD),
        None => {
            warn!(frequency, "No usable period for frequency, running at 1 Hz");
            FALLBACK_PERIOD
        }
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e| eyre!("Invalid value `{}` for {}: {}", value, key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY_VALUES: &str = "\
global.buffer.memorySegmentSize = 2800000 # Size of a memory segment
global.buffer.numberOfMemorySegments = 20
odsupercomponent.pulseshift.shift = 10000 # (in microseconds)
odsupercomponent.pulsetimeack.timeout = 5000 # (in milliseconds)
odsupercomponent.pulsetimeack.yield = 5000 # (in microseconds)
odsupercomponent.pulsetimeack.exclude = cockpit,monitor # never pulsed
";

    #[test]
    fn test_default_config() {
        let config = SupercomponentConfig::default();
        assert_eq!(config.cid, 111);
        assert_eq!(config.managed_level, ManagedLevel::NotManaged);
        assert!(!config.strict_timestamps);
        assert_eq!(config.pulse_shift.shift_increment(), Duration::from_micros(10_000));
        assert_eq!(config.pulse_time_ack.timeout(), Duration::from_millis(5000));
        assert_eq!(config.pulse_time_ack.yield_delay(), Duration::from_micros(5000));
        assert!(config.pulse_time_ack.excluded_modules.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cycle_period() {
        let config = SupercomponentConfig {
            frequency: 4.0,
            ..Default::default()
        };
        assert_eq!(config.cycle_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_cycle_period_is_never_zero() {
        let period = |frequency| {
            SupercomponentConfig {
                frequency,
                ..Default::default()
            }
            .cycle_period()
        };
        assert_eq!(period(1e10), Duration::from_nanos(1));
        assert_eq!(period(f64::MAX), Duration::from_nanos(1));
        assert_eq!(period(0.0), Duration::from_secs(1));
        assert_eq!(period(-5.0), Duration::from_secs(1));
        assert_eq!(period(f64::NAN), Duration::from_secs(1));
        assert_eq!(period(1e-320), Duration::from_secs(1));
        assert_eq!(ModuleConfig::new("fast", 1e12).period(), Duration::from_nanos(1));
    }

    #[test]
    fn test_managed_level_parse() {
        assert_eq!("pulse_shift".parse::<ManagedLevel>().unwrap(), ManagedLevel::PulseShift);
        assert_eq!(" PULSE_TIME_ACK ".parse::<ManagedLevel>().unwrap(), ManagedLevel::PulseTimeAck);
        assert_eq!("none".parse::<ManagedLevel>().unwrap(), ManagedLevel::NotManaged);
        assert!("simulation".parse::<ManagedLevel>().is_err());
        assert_eq!(ManagedLevel::PulseTimeAck.to_string(), "pulse_time_ack");
    }

    #[test]
    fn test_key_values() {
        let config = SupercomponentConfig::from_key_values(KEY_VALUES).unwrap();
        assert_eq!(config.pulse_shift.shift_increment_micros, 10_000);
        assert_eq!(config.pulse_time_ack.timeout_millis, 5000);
        assert_eq!(config.pulse_time_ack.yield_micros, 5000);
        assert!(config.is_excluded("cockpit"));
        assert!(config.is_excluded("monitor"));
        assert!(!config.is_excluded("player"));
    }

    #[test]
    fn test_key_values_rejects_garbage() {
        assert!(SupercomponentConfig::from_key_values("odsupercomponent.pulsetimeack.timeout = soon").is_err());
        assert!(SupercomponentConfig::from_key_values("just some words").is_err());
    }

    #[test]
    fn test_effective_level() {
        let mut config = SupercomponentConfig {
            managed_level: ManagedLevel::PulseTimeAck,
            ..Default::default()
        };
        config.pulse_time_ack.excluded_modules.insert("monitor".to_string());
        assert_eq!(config.effective_level("monitor"), ManagedLevel::NotManaged);
        assert_eq!(config.effective_level("player"), ManagedLevel::PulseTimeAck);
    }

    #[test]
    fn test_validate_frequency() {
        for frequency in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e10, f64::MAX, 1e-320] {
            let config = SupercomponentConfig {
                frequency,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "frequency {} accepted", frequency);
        }
    }

    #[test]
    fn test_deserialize_yaml() {
        let yaml = r#"
cid: 42
frequency: 2.5
managed-level: pulse_time_ack
pulse-time-ack:
  timeout-millis: 100
  excluded-modules: [monitor]
"#;
        let config: SupercomponentConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cid, 42);
        assert_eq!(config.frequency, 2.5);
        assert_eq!(config.managed_level, ManagedLevel::PulseTimeAck);
        assert_eq!(config.pulse_time_ack.timeout_millis, 100);
        assert_eq!(config.pulse_time_ack.yield_micros, 5000);
        assert!(config.is_excluded("monitor"));
        assert_eq!(config.pulse_shift, PulseShiftConfig::default());
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("sc.yml");
        fs::write(&yaml_path, "managed-level: pulse_shift\n").unwrap();
        let config = SupercomponentConfig::load(Some(&yaml_path)).unwrap();
        assert_eq!(config.managed_level, ManagedLevel::PulseShift);

        let kv_path = dir.path().join("configuration");
        let mut file = fs::File::create(&kv_path).unwrap();
        file.write_all(KEY_VALUES.as_bytes()).unwrap();
        let config = SupercomponentConfig::load(Some(&kv_path)).unwrap();
        assert!(config.is_excluded("cockpit"));
    }

    #[test]
    fn test_module_config() {
        let config = ModuleConfig::new("player", 20.0);
        assert_eq!(config.period(), Duration::from_millis(50));
        assert_eq!(config.handshake_timeout(), Duration::from_secs(5));
        assert_eq!(ModuleConfig::new("broken", 0.0).period(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let missing = PathBuf::from("/nonexistent/supercomponent.yml");
        assert!(SupercomponentConfig::load(Some(&missing)).is_err());
    }
}
