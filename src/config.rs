// Location: src/config.rs

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bounds::DEFAULT_MODEL_ID;
use crate::error::{Result, ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub model: ModelConfig,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub model id (e.g. "gpt2") or a local directory holding the model files
    pub model_id: String,

    /// Hub cache directory; `None` uses `$HF_HOME/hub`
    pub cache_dir: Option<PathBuf>,

    /// Where to place the model
    pub device: DevicePreference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    /// Use the first accelerator if one is present, otherwise the CPU
    Auto,
    Cpu,
    Cuda(usize),
}

impl FromStr for DevicePreference {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|ordinal| ordinal.parse().ok())
                .map(DevicePreference::Cuda)
                .ok_or_else(|| {
                    ServiceError::configuration(
                        "DEVICE",
                        format!("expected auto, cpu, cuda or cuda:N, got '{}'", other),
                    )
                }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Number of generate calls allowed to run on the model at once
    pub max_concurrent_generations: usize,

    /// Deadline for one generate call, queueing included
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Log level
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ServiceError::configuration(
                "LOG_LEVEL",
                format!("unknown level '{}'", other),
            )),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                cache_dir: None,
                device: DevicePreference::Auto,
            },
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                port: 8000,
            },
            limits: LimitsConfig {
                max_concurrent_generations: 1,
                request_timeout: Duration::from_secs(120),
            },
            monitoring: MonitoringConfig {
                log_level: LogLevel::Info,
            },
        }
    }
}

impl ServiceConfig {
    /// Read the configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup, starting from defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(model_id) = lookup("MODEL_NAME") {
            config.model.model_id = model_id;
        }
        if let Some(dir) = lookup("MODEL_CACHE_DIR").filter(|d| !d.trim().is_empty()) {
            config.model.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(device) = lookup("DEVICE") {
            config.model.device = device.parse()?;
        }
        if let Some(host) = lookup("HOST") {
            config.server.host = parse_var("HOST", &host)?;
        }
        if let Some(port) = lookup("PORT") {
            config.server.port = parse_var("PORT", &port)?;
        }
        if let Some(slots) = lookup("GENERATION_CONCURRENCY") {
            config.limits.max_concurrent_generations = parse_var("GENERATION_CONCURRENCY", &slots)?;
        }
        if let Some(secs) = lookup("REQUEST_TIMEOUT_SECS") {
            config.limits.request_timeout =
                Duration::from_secs(parse_var("REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.monitoring.log_level = level.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.model_id.trim().is_empty() {
            return Err(ServiceError::configuration(
                "MODEL_NAME",
                "model identifier cannot be empty",
            ));
        }

        if self.limits.max_concurrent_generations == 0 {
            return Err(ServiceError::configuration(
                "GENERATION_CONCURRENCY",
                "at least one concurrent generation must be allowed",
            ));
        }

        if self.limits.request_timeout.is_zero() {
            return Err(ServiceError::configuration(
                "REQUEST_TIMEOUT_SECS",
                "timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ServiceError::configuration(name, format!("invalid value '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.model.model_id, "gpt2");
        assert_eq!(config.model.device, DevicePreference::Auto);
        assert_eq!(config.server.port, 8000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("MODEL_NAME", "distilgpt2"),
            ("MODEL_CACHE_DIR", "/models/hub"),
            ("DEVICE", "cuda:1"),
            ("PORT", "9000"),
            ("GENERATION_CONCURRENCY", "4"),
            ("REQUEST_TIMEOUT_SECS", "30"),
            ("LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.model.model_id, "distilgpt2");
        assert_eq!(config.model.cache_dir, Some(PathBuf::from("/models/hub")));
        assert_eq!(config.model.device, DevicePreference::Cuda(1));
        assert_eq!(config.server.bind_addr().port(), 9000);
        assert_eq!(config.limits.max_concurrent_generations, 4);
        assert_eq!(config.limits.request_timeout, Duration::from_secs(30));
        assert_eq!(config.monitoring.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_config_validation() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = ServiceConfig::from_lookup(lookup_from(&[("GENERATION_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("GENERATION_CONCURRENCY"));

        assert!(ServiceConfig::from_lookup(lookup_from(&[("DEVICE", "tpu")])).is_err());
        assert!(ServiceConfig::from_lookup(lookup_from(&[("MODEL_NAME", " ")])).is_err());
    }

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("AUTO".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("cpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(0));
        assert!("cuda:x".parse::<DevicePreference>().is_err());
    }
}
