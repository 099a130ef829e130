/*!
 * Configuration types for Orbit Guard
 *
 * Wrappers are declared by name in a TOML document and built on demand:
 *
 * ```toml
 * [logging]
 * level = "info"
 *
 * [circuit_breakers.payments]
 * threshold = 5
 * period_ms = 60000
 * reset_ms = 30000
 *
 * [flow_regulators.search]
 * max_requests = 100
 * period_ms = 1000
 *
 * [performance_monitors.db]
 * latency_window_ms = 60000
 * percentile_window_ms = 300000
 * ```
 */

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::flow_regulator::ConstantFlowRegulator;
use crate::performance_monitor::{PerformanceMonitor, PerformanceMonitorConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading, validating, or applying configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No {kind} named '{name}' in configuration")]
    Missing { kind: &'static str, name: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    /// Emit JSON instead of the compact human format
    #[serde(default)]
    pub json: bool,

    /// Write logs to this file (always JSON) instead of stdout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// `[circuit_breakers.<name>]` entry
///
/// Either `threshold` (count policy) or `failure_rate_percent` (rate
/// policy) may be given, not both. With neither, a threshold of 5 applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_rate_percent: Option<f64>,

    /// Minimum calls in the period before the rate policy can trip
    #[serde(default = "default_min_requests")]
    pub min_requests: u32,

    #[serde(default = "default_breaker_period_ms")]
    pub period_ms: u64,

    #[serde(default = "default_reset_ms")]
    pub reset_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            threshold: None,
            failure_rate_percent: None,
            min_requests: default_min_requests(),
            period_ms: default_breaker_period_ms(),
            reset_ms: default_reset_ms(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Check the entry and convert it to a runtime configuration
    pub fn to_config(&self, name: &str) -> Result<CircuitBreakerConfig, ConfigError> {
        if self.period_ms == 0 {
            return Err(invalid("circuit breaker", name, "period_ms must be > 0"));
        }

        let config = CircuitBreakerConfig::new()
            .with_period(Duration::from_millis(self.period_ms))
            .with_reset(Duration::from_millis(self.reset_ms));

        match (self.threshold, self.failure_rate_percent) {
            (Some(_), Some(_)) => Err(invalid(
                "circuit breaker",
                name,
                "threshold and failure_rate_percent are mutually exclusive",
            )),
            (Some(0), None) => Err(invalid("circuit breaker", name, "threshold must be > 0")),
            (Some(threshold), None) => Ok(config.with_failure_threshold(threshold)),
            (None, Some(percent)) => {
                // Also rejects NaN
                if !(percent > 0.0 && percent <= 100.0) {
                    return Err(invalid(
                        "circuit breaker",
                        name,
                        "failure_rate_percent must be in (0, 100]",
                    ));
                }
                Ok(config.with_failure_rate(percent, self.min_requests))
            }
            (None, None) => Ok(config),
        }
    }

    /// Build the breaker described by this entry
    pub fn build(&self, name: &str) -> Result<CircuitBreaker, ConfigError> {
        Ok(CircuitBreaker::new(name, self.to_config(name)?))
    }
}

/// `[flow_regulators.<name>]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRegulatorSettings {
    /// Admissions per period, 0 for unlimited
    pub max_requests: u32,

    #[serde(default = "default_regulator_period_ms")]
    pub period_ms: u64,
}

impl FlowRegulatorSettings {
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(invalid("flow regulator", name, "period_ms must be > 0"));
        }
        Ok(())
    }

    /// Build the regulator described by this entry
    pub fn build(&self, name: &str) -> Result<ConstantFlowRegulator, ConfigError> {
        self.validate(name)?;
        Ok(ConstantFlowRegulator::new(
            name,
            self.max_requests,
            Duration::from_millis(self.period_ms),
        ))
    }
}

/// `[performance_monitors.<name>]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMonitorSettings {
    #[serde(default = "default_latency_window_ms")]
    pub latency_window_ms: u64,

    #[serde(default = "default_percentile_window_ms")]
    pub percentile_window_ms: u64,
}

impl Default for PerformanceMonitorSettings {
    fn default() -> Self {
        Self {
            latency_window_ms: default_latency_window_ms(),
            percentile_window_ms: default_percentile_window_ms(),
        }
    }
}

impl PerformanceMonitorSettings {
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.latency_window_ms == 0 {
            return Err(invalid(
                "performance monitor",
                name,
                "latency_window_ms must be > 0",
            ));
        }
        if self.percentile_window_ms == 0 {
            return Err(invalid(
                "performance monitor",
                name,
                "percentile_window_ms must be > 0",
            ));
        }
        Ok(())
    }

    /// Build the monitor described by this entry
    pub fn build(&self, name: &str) -> Result<PerformanceMonitor, ConfigError> {
        self.validate(name)?;
        Ok(PerformanceMonitor::new(
            name,
            PerformanceMonitorConfig {
                latency_window: Duration::from_millis(self.latency_window_ms),
                percentile_window: Duration::from_millis(self.percentile_window_ms),
            },
        ))
    }
}

/// Complete guard configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSettings>,

    #[serde(default)]
    pub flow_regulators: BTreeMap<String, FlowRegulatorSettings>,

    #[serde(default)]
    pub performance_monitors: BTreeMap<String, PerformanceMonitorSettings>,
}

impl GuardConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_toml_string()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every entry
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, settings) in &self.circuit_breakers {
            settings.to_config(name)?;
        }
        for (name, settings) in &self.flow_regulators {
            settings.validate(name)?;
        }
        for (name, settings) in &self.performance_monitors {
            settings.validate(name)?;
        }
        Ok(())
    }

    /// Build the circuit breaker declared as `name`
    pub fn circuit_breaker(&self, name: &str) -> Result<CircuitBreaker, ConfigError> {
        self.circuit_breakers
            .get(name)
            .ok_or_else(|| missing("circuit breaker", name))?
            .build(name)
    }

    /// Build the flow regulator declared as `name`
    pub fn flow_regulator(&self, name: &str) -> Result<ConstantFlowRegulator, ConfigError> {
        self.flow_regulators
            .get(name)
            .ok_or_else(|| missing("flow regulator", name))?
            .build(name)
    }

    /// Build the performance monitor declared as `name`
    pub fn performance_monitor(&self, name: &str) -> Result<PerformanceMonitor, ConfigError> {
        self.performance_monitors
            .get(name)
            .ok_or_else(|| missing("performance monitor", name))?
            .build(name)
    }
}

fn invalid(kind: &str, name: &str, problem: &str) -> ConfigError {
    ConfigError::Invalid(format!("{} '{}': {}", kind, name, problem))
}

fn missing(kind: &'static str, name: &str) -> ConfigError {
    ConfigError::Missing {
        kind,
        name: name.to_string(),
    }
}

fn default_min_requests() -> u32 {
    10
}

fn default_breaker_period_ms() -> u64 {
    60_000
}

fn default_reset_ms() -> u64 {
    30_000
}

fn default_regulator_period_ms() -> u64 {
    1_000
}

fn default_latency_window_ms() -> u64 {
    60_000
}

fn default_percentile_window_ms() -> u64 {
    300_000
}
