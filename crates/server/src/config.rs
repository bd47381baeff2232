//! Server configuration management

use anyhow::{Context, Result, anyhow};
use common::LogStreamConfig;
use protocol::MIN_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    /// Recovery watchdog timing
    #[serde(default)]
    pub watchdog: WatchdogSettings,
    /// Packet bridge retry policy
    #[serde(default)]
    pub bridge: BridgeSettings,
    /// Event recorder and log ring sizing
    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,
    /// Simulated host used by the demo run
    #[serde(default)]
    pub simulation: SimulationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub log_level: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Recovery watchdog timing
///
/// # Example Configuration
/// ```toml
/// [watchdog]
/// tick = "250ms"
/// grace_period = "2s"
/// max_attempts = 5
/// initial_backoff = "2500ms"
/// max_backoff = "15s"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    /// Interval between watchdog evaluations
    #[serde(with = "duration_serde")]
    pub tick: Duration,
    /// Time after mount within which the first frame is expected
    #[serde(with = "duration_serde")]
    pub grace_period: Duration,
    /// Recoveries allowed per mount cycle
    pub max_attempts: u32,
    #[serde(with = "duration_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,
    /// Pause between link down and link up in a kick
    #[serde(with = "duration_serde")]
    pub kick_delay: Duration,
    /// How long the device stays detached during recovery
    #[serde(with = "duration_serde")]
    pub detach_duration: Duration,
    /// Wait after reattach before the post-recovery kick
    #[serde(with = "duration_serde")]
    pub settle_duration: Duration,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            grace_period: Duration::from_secs(2),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(2500),
            max_backoff: Duration::from_secs(15),
            kick_delay: Duration::from_millis(200),
            detach_duration: Duration::from_secs(1),
            settle_duration: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Send attempts per outbound frame
    pub tx_attempts: u32,
    #[serde(with = "duration_serde")]
    pub tx_timeout: Duration,
    #[serde(with = "duration_serde")]
    pub tx_retry_delay: Duration,
    /// Largest frame accepted from the transport, in bytes
    pub max_frame_len: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            tx_attempts: 3,
            tx_timeout: Duration::from_millis(100),
            tx_retry_delay: Duration::from_millis(10),
            max_frame_len: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub event_capacity: usize,
    pub event_detail_max: usize,
    pub log_capacity: usize,
    pub log_line_max: usize,
    pub max_log_readers: usize,
    /// Sleep between polls of an idle log stream
    #[serde(with = "duration_serde")]
    pub stream_poll: Duration,
    pub keepalive_idle_polls: u32,
    /// Bounded wait on the packet counter lock
    #[serde(with = "duration_serde")]
    pub lock_timeout: Duration,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            event_capacity: common::event_log::DEFAULT_EVENT_CAPACITY,
            event_detail_max: common::event_log::DEFAULT_DETAIL_MAX,
            log_capacity: common::log_ring::DEFAULT_LOG_CAPACITY,
            log_line_max: common::log_ring::DEFAULT_LINE_MAX,
            max_log_readers: common::log_ring::DEFAULT_MAX_READERS,
            stream_poll: Duration::from_millis(50),
            keepalive_idle_polls: 100,
            lock_timeout: Duration::from_millis(50),
        }
    }
}

impl DiagnosticsSettings {
    pub fn stream_config(&self) -> LogStreamConfig {
        LogStreamConfig {
            poll_interval: self.stream_poll,
            keepalive_idle_polls: self.keepalive_idle_polls,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Enumerations during which the host ignores link-up
    pub stale_enumerations: u32,
    /// Host reaction time to link notifications and offers
    #[serde(with = "duration_serde")]
    pub response_delay: Duration,
    /// Delay before the host mounts the device after start
    #[serde(with = "duration_serde")]
    pub plug_in_delay: Duration,
    /// Time the host takes to mount the device again after a reattach
    #[serde(with = "duration_serde")]
    pub reenumeration_delay: Duration,
    /// Delay before the IP stack comes up
    #[serde(with = "duration_serde")]
    pub stack_start_delay: Duration,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            stale_enumerations: 1,
            response_delay: Duration::from_millis(50),
            plug_in_delay: Duration::from_millis(100),
            reenumeration_delay: Duration::ZERO,
            stack_start_delay: Duration::ZERO,
        }
    }
}

/// Custom serde module for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format_duration(*duration).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse "250ms", "2s", "1m30s", "1h"; a bare number means seconds
    pub fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim().to_lowercase();
        if s.is_empty() {
            return Err("Empty duration".to_string());
        }

        let mut total_ms: u64 = 0;
        let mut segments = 0;
        let mut chars = s.chars().peekable();
        while chars.peek().is_some() {
            let mut num = String::new();
            while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
                num.push(c);
                chars.next();
            }
            let mut unit = String::new();
            while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
                unit.push(c);
                chars.next();
            }

            if num.is_empty() {
                return Err(format!("Invalid duration format: {}", s));
            }
            let value: u64 = num
                .parse()
                .map_err(|_| format!("Invalid number in duration: {}", num))?;

            let scale = match unit.as_str() {
                "h" => 3_600_000,
                "m" => 60_000,
                "s" | "" => 1_000,
                "ms" => 1,
                other => return Err(format!("Invalid duration unit: {}", other)),
            };
            total_ms = value
                .checked_mul(scale)
                .and_then(|v| total_ms.checked_add(v))
                .ok_or_else(|| format!("Duration out of range: {}", s))?;

            // A unitless number is only accepted on its own
            if unit.is_empty() && (segments > 0 || chars.peek().is_some()) {
                return Err(format!("Invalid duration format: {}", s));
            }
            segments += 1;
        }

        Ok(Duration::from_millis(total_ms))
    }

    pub fn format_duration(d: Duration) -> String {
        let total_ms = d.as_millis() as u64;
        if total_ms % 1000 != 0 {
            return format!("{}ms", total_ms);
        }

        let secs = total_ms / 1000;
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        let mut result = String::new();
        if hours > 0 {
            result.push_str(&format!("{}h", hours));
        }
        if mins > 0 {
            result.push_str(&format!("{}m", mins));
        }
        if secs > 0 || result.is_empty() {
            result.push_str(&format!("{}s", secs));
        }
        result
    }
}

impl ServerConfig {
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-ncm-bridge/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-ncm-bridge").join("server.toml")
        } else {
            PathBuf::from(".config/usb-ncm-bridge/server.toml")
        }
    }

    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        let w = &self.watchdog;
        Self::require_nonzero("watchdog.tick", w.tick)?;
        Self::require_nonzero("watchdog.grace_period", w.grace_period)?;
        Self::require_nonzero("watchdog.initial_backoff", w.initial_backoff)?;
        if w.max_attempts == 0 {
            return Err(anyhow!("watchdog.max_attempts must be at least 1"));
        }
        if w.max_backoff < w.initial_backoff {
            return Err(anyhow!(
                "watchdog.max_backoff ({:?}) is shorter than initial_backoff ({:?})",
                w.max_backoff,
                w.initial_backoff
            ));
        }

        let b = &self.bridge;
        if b.tx_attempts == 0 {
            return Err(anyhow!("bridge.tx_attempts must be at least 1"));
        }
        Self::require_nonzero("bridge.tx_timeout", b.tx_timeout)?;
        if b.max_frame_len < MIN_FRAME_LEN {
            return Err(anyhow!(
                "bridge.max_frame_len {} is below the minimum Ethernet frame ({})",
                b.max_frame_len,
                MIN_FRAME_LEN
            ));
        }

        let d = &self.diagnostics;
        for (name, value) in [
            ("diagnostics.event_capacity", d.event_capacity),
            ("diagnostics.log_capacity", d.log_capacity),
            ("diagnostics.log_line_max", d.log_line_max),
            ("diagnostics.max_log_readers", d.max_log_readers),
        ] {
            if value == 0 {
                return Err(anyhow!("{} must be greater than 0", name));
            }
        }
        Self::require_nonzero("diagnostics.stream_poll", d.stream_poll)?;
        Self::require_nonzero("diagnostics.lock_timeout", d.lock_timeout)?;
        if d.keepalive_idle_polls == 0 {
            return Err(anyhow!("diagnostics.keepalive_idle_polls must be greater than 0"));
        }

        Ok(())
    }

    fn require_nonzero(name: &str, value: Duration) -> Result<()> {
        if value.is_zero() {
            return Err(anyhow!("{} must be greater than 0", name));
        }
        Ok(())
    }
}

pub use duration_serde::parse_duration;

/// Load configuration from a user-supplied path (`~` expanded)
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ServerConfig::load(Some(path_buf))
}
