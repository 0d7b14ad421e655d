//! Configuration management
//!
//! Settings come from an optional INI file (`~/.agent-say.cfg`, or the
//! path in `AGENT_SAY_CONFIG`). Every key has a built-in default, so a
//! missing file or a bad value never stops the server from starting.

use crate::{Result, SayError};
use ini::Ini;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that overrides the config file location
pub const CONFIG_ENV: &str = "AGENT_SAY_CONFIG";

/// Tunables for the speech dispatcher
///
/// These are the knobs of the adaptive timeout, the dedupe cache and the
/// concurrency cap. `Default` gives the values the server ships with.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Number of speech processes allowed to run at once
    pub max_concurrent: usize,
    /// How long a fire-and-forget request probes for a free slot
    pub busy_probe: Duration,
    /// Time between SIGTERM and SIGKILL when stopping a process
    pub grace: Duration,
    /// Dedupe window used when the caller does not give one
    pub default_dedupe_seconds: f64,
    /// Absolute timeout backstop used when the caller does not give one
    pub hard_timeout_seconds: f64,

    /// Fallback chars/sec for an engine with no measurements yet
    pub default_cps: f64,
    /// Exponential moving average factor for the speed profile
    pub smoothing: f64,
    /// Estimate slowdown for text containing CJK characters
    pub cjk_factor: f64,
    /// Fixed startup/teardown allowance added to every estimate
    pub buffer_seconds: f64,
    /// Floor for any estimated timeout
    pub min_timeout: f64,
    /// Floor applied in auto mode (no explicit caller timeout)
    pub auto_cap_seconds: f64,
    /// Timeout hint assumed when the caller leaves it unset
    pub default_timeout_seconds: f64,

    /// Words per minute an engine speaks at speed 1.0
    pub default_wpm: u32,
    /// Lowest accepted speed multiplier
    pub min_speed: f64,
    /// Highest accepted speed multiplier
    pub max_speed: f64,
    /// Throwaway utterance spoken before the real one when warmup is asked
    pub warmup_text: String,
    /// Explicit path to the Swift TTS script
    pub swift_script: Option<PathBuf>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            busy_probe: Duration::from_millis(10),
            grace: Duration::from_secs(2),
            default_dedupe_seconds: 30.0,
            hard_timeout_seconds: 600.0,
            default_cps: 6.0,
            smoothing: 0.2,
            cjk_factor: 1.35,
            buffer_seconds: 2.0,
            min_timeout: 5.0,
            auto_cap_seconds: 300.0,
            default_timeout_seconds: 20.0,
            default_wpm: 175,
            min_speed: 0.25,
            max_speed: 4.0,
            warmup_text: "ウォームアップ".to_string(),
            swift_script: None,
        }
    }
}

/// Application configuration backed by an INI document
pub struct Config {
    /// INI configuration storage
    ini: Ini,

    /// Where the config was (or would be) loaded from
    path: PathBuf,
}

impl Config {
    /// Load configuration from disk, or fall back to defaults
    ///
    /// Unlike a settings UI, the server never writes the file; it only
    /// reads what the user put there.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        debug!("Loading config from {:?}", path);

        let ini = if path.exists() {
            Ini::load_from_file(&path)
                .map_err(|e| SayError::Config(format!("Failed to load config: {}", e)))?
        } else {
            info!("Config file not found, using defaults");
            Ini::new()
        };

        Ok(Self { ini, path })
    }

    /// Parse configuration from INI text
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| SayError::Config(format!("Failed to parse config: {}", e)))?;
        Ok(Self {
            ini,
            path: PathBuf::from("<memory>"),
        })
    }

    /// Resolve the config file path
    fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-say.cfg")
    }

    /// Expose the config file path for display
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Get a string value from config
    pub fn get_string(&self, section: &str, key: &str, default: &str) -> String {
        self.ini
            .get_from(Some(section), key)
            .unwrap_or(default)
            .to_string()
    }

    /// Get an integer value from config
    pub fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.ini
            .get_from(Some(section), key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Get a float value from config
    ///
    /// Non-finite values are treated like parse failures.
    pub fn get_float(&self, section: &str, key: &str, default: f64) -> f64 {
        match self.ini.get_from(Some(section), key) {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => v,
                _ => {
                    warn!("Ignoring invalid value {:?} for [{}] {}", raw, section, key);
                    default
                }
            },
            None => default,
        }
    }

    /// Build dispatcher settings, filling gaps with defaults
    pub fn settings(&self) -> DispatchSettings {
        let d = DispatchSettings::default();

        let max_concurrent = self
            .get_int("dispatch", "max_concurrent", d.max_concurrent as i64)
            .max(1) as usize;
        let busy_probe_ms = self
            .get_int("dispatch", "busy_probe_ms", d.busy_probe.as_millis() as i64)
            .max(0) as u64;
        let grace = self
            .get_float("dispatch", "grace_seconds", d.grace.as_secs_f64())
            .max(0.0);

        let swift_script = self
            .ini
            .get_from(Some("speech"), "swift_script")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        DispatchSettings {
            max_concurrent,
            busy_probe: Duration::from_millis(busy_probe_ms),
            grace: Duration::try_from_secs_f64(grace).unwrap_or_else(|_| {
                warn!("Ignoring out-of-range grace_seconds {}", grace);
                d.grace
            }),
            default_dedupe_seconds: self.get_float(
                "dispatch",
                "default_dedupe_seconds",
                d.default_dedupe_seconds,
            ),
            hard_timeout_seconds: self.get_float(
                "dispatch",
                "hard_timeout_seconds",
                d.hard_timeout_seconds,
            ),
            default_cps: self.get_float("timing", "default_cps", d.default_cps),
            smoothing: self
                .get_float("timing", "smoothing", d.smoothing)
                .clamp(0.0, 1.0),
            cjk_factor: self.get_float("timing", "cjk_factor", d.cjk_factor),
            buffer_seconds: self.get_float("timing", "buffer_seconds", d.buffer_seconds),
            min_timeout: self.get_float("timing", "min_timeout", d.min_timeout),
            auto_cap_seconds: self.get_float("timing", "auto_cap_seconds", d.auto_cap_seconds),
            default_timeout_seconds: self.get_float(
                "timing",
                "default_timeout_seconds",
                d.default_timeout_seconds,
            ),
            default_wpm: self
                .get_int("speech", "default_wpm", d.default_wpm as i64)
                .clamp(1, 1000) as u32,
            min_speed: self.get_float("speech", "min_speed", d.min_speed),
            max_speed: self.get_float("speech", "max_speed", d.max_speed),
            warmup_text: self.get_string("speech", "warmup_text", &d.warmup_text),
            swift_script,
        }
    }
}
