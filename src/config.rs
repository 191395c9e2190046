//! Lifecycle configuration
//!
//! Defaults mirror what a Kubernetes pod expects from its probe sidecar:
//! - probes on port 9000
//! - SIGTERM, SIGHUP and SIGINT trigger shutdown
//! - 5s pause before shutdown handlers run, so the kubelet observes the
//!   failing readiness probe and stops routing traffic
//!
//! The configuration is validated once when the lifecycle is constructed and
//! never changes afterwards.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default port for the probe endpoints
pub const DEFAULT_PORT: u16 = 9000;

/// Default ceiling on the whole shutdown sequence
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default ceiling on running the shutdown handlers
pub const DEFAULT_SHUTDOWN_HANDLER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between the shutdown trigger and the handlers
pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(5);

/// Environment variable Kubernetes injects into every pod
const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "shutdown handler timeout ({handler:?}) must not exceed graceful shutdown timeout ({graceful:?})"
    )]
    HandlerTimeoutExceedsGraceful {
        handler: Option<Duration>,
        graceful: Option<Duration>,
    },

    #[error("Unknown signal name: {0}")]
    UnknownSignal(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// OS signals that can trigger shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutdownSignalKind {
    Terminate,
    Hangup,
    Interrupt,
    Quit,
    User1,
    User2,
}

impl ShutdownSignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            ShutdownSignalKind::Terminate => "SIGTERM",
            ShutdownSignalKind::Hangup => "SIGHUP",
            ShutdownSignalKind::Interrupt => "SIGINT",
            ShutdownSignalKind::Quit => "SIGQUIT",
            ShutdownSignalKind::User1 => "SIGUSR1",
            ShutdownSignalKind::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for ShutdownSignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ShutdownSignalKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" => Ok(ShutdownSignalKind::Terminate),
            "HUP" => Ok(ShutdownSignalKind::Hangup),
            "INT" => Ok(ShutdownSignalKind::Interrupt),
            "QUIT" => Ok(ShutdownSignalKind::Quit),
            "USR1" => Ok(ShutdownSignalKind::User1),
            "USR2" => Ok(ShutdownSignalKind::User2),
            _ => Err(ConfigError::UnknownSignal(s.to_string())),
        }
    }
}

/// Action run when the shutdown sequence has to be cut short
///
/// Production code uses `ProcessExit`. Tests pass a closure that records
/// the call instead of exiting.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// Exits the process with status 1
pub struct ProcessExit;

impl Terminate for ProcessExit {
    fn terminate(&self) {
        std::process::exit(1);
    }
}

impl<F> Terminate for F
where
    F: Fn() + Send + Sync,
{
    fn terminate(&self) {
        self()
    }
}

/// Configuration supplied when constructing a [`crate::Lightship`]
///
/// Timeouts set to `None` are unbounded.
#[derive(Clone)]
pub struct LightshipConfig {
    pub port: u16,
    pub detect_kubernetes: bool,
    pub signals: Vec<ShutdownSignalKind>,
    pub graceful_shutdown_timeout: Option<Duration>,
    pub shutdown_handler_timeout: Option<Duration>,
    pub shutdown_delay: Duration,
    pub terminate: Arc<dyn Terminate>,
}

impl Default for LightshipConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            detect_kubernetes: true,
            signals: vec![
                ShutdownSignalKind::Terminate,
                ShutdownSignalKind::Hangup,
                ShutdownSignalKind::Interrupt,
            ],
            graceful_shutdown_timeout: Some(DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT),
            shutdown_handler_timeout: Some(DEFAULT_SHUTDOWN_HANDLER_TIMEOUT),
            shutdown_delay: DEFAULT_SHUTDOWN_DELAY,
            terminate: Arc::new(ProcessExit),
        }
    }
}

impl fmt::Debug for LightshipConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LightshipConfig")
            .field("port", &self.port)
            .field("detect_kubernetes", &self.detect_kubernetes)
            .field("signals", &self.signals)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .field("shutdown_handler_timeout", &self.shutdown_handler_timeout)
            .field("shutdown_delay", &self.shutdown_delay)
            .finish_non_exhaustive()
    }
}

impl LightshipConfig {
    /// Build a configuration from defaults overlaid with `LIGHTSHIP_*` env vars
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_var("LIGHTSHIP_PORT") {
            config.port = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "LIGHTSHIP_PORT",
                value: value.clone(),
            })?;
        }
        if let Some(value) = env_var("LIGHTSHIP_DETECT_KUBERNETES") {
            config.detect_kubernetes = parse_bool("LIGHTSHIP_DETECT_KUBERNETES", &value)?;
        }
        if let Some(value) = env_var("LIGHTSHIP_SIGNALS") {
            config.signals = parse_signals(&value)?;
        }
        if let Some(value) = env_var("LIGHTSHIP_SHUTDOWN_DELAY_MS") {
            config.shutdown_delay = parse_millis("LIGHTSHIP_SHUTDOWN_DELAY_MS", &value)?
                .unwrap_or(Duration::ZERO);
        }
        if let Some(value) = env_var("LIGHTSHIP_GRACEFUL_SHUTDOWN_TIMEOUT_MS") {
            config.graceful_shutdown_timeout =
                parse_millis("LIGHTSHIP_GRACEFUL_SHUTDOWN_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = env_var("LIGHTSHIP_SHUTDOWN_HANDLER_TIMEOUT_MS") {
            config.shutdown_handler_timeout =
                parse_millis("LIGHTSHIP_SHUTDOWN_HANDLER_TIMEOUT_MS", &value)?;
        }

        Ok(config)
    }

    /// Reject configurations whose handler budget exceeds the overall budget
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exceeds = match (self.shutdown_handler_timeout, self.graceful_shutdown_timeout) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(handler), Some(graceful)) => handler > graceful,
        };
        if exceeds {
            return Err(ConfigError::HandlerTimeoutExceedsGraceful {
                handler: self.shutdown_handler_timeout,
                graceful: self.graceful_shutdown_timeout,
            });
        }
        Ok(())
    }
}

/// Check whether this process runs inside a Kubernetes pod
pub fn is_kubernetes() -> bool {
    std::env::var_os(KUBERNETES_SERVICE_HOST).is_some()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        }),
    }
}

/// Parse a millisecond duration; `0` and `none` mean unbounded
pub(crate) fn parse_millis(
    name: &'static str,
    value: &str,
) -> Result<Option<Duration>, ConfigError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let millis: u64 = value.parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })?;
    if millis == 0 {
        Ok(None)
    } else {
        Ok(Some(Duration::from_millis(millis)))
    }
}

pub(crate) fn parse_signals(value: &str) -> Result<Vec<ShutdownSignalKind>, ConfigError> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
