use crate::{AcceleratorDevice, Device, DeviceError, DeviceRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ACCELERATORS_ENV: &str = "STRIDE_ACCELERATORS";
pub const SEED_ENV: &str = "STRIDE_SEED";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Which locations exist, and the default seed for sampled fills.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub accelerators: usize,
    pub seed: Option<u64>,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Defaults overridden by `STRIDE_ACCELERATORS` and `STRIDE_SEED`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ACCELERATORS_ENV) {
            self.accelerators = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ACCELERATORS_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(SEED_ENV) {
            let seed = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: SEED_ENV,
                value: value.clone(),
            })?;
            self.seed = Some(seed);
        }
        Ok(self)
    }
}

/// The execution environment: decides which locations are present.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        log::debug!(
            "Runtime initialized with {} accelerator(s)",
            config.accelerators
        );
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn request_device(&self, request: DeviceRequest) -> Result<Device, DeviceError> {
        match request {
            DeviceRequest::CPU => Ok(Device::CPU),
            DeviceRequest::Accelerator(ordinal) if ordinal < self.config.accelerators => Ok(
                Device::Accelerator(AcceleratorDevice::new(ordinal)),
            ),
            DeviceRequest::Accelerator(_) => Err(DeviceError::UnavailableLocation(request)),
        }
    }

    /// Every location present, host first.
    pub fn locations(&self) -> Vec<Device> {
        std::iter::once(Device::CPU)
            .chain(
                (0..self.config.accelerators)
                    .map(|ordinal| Device::Accelerator(AcceleratorDevice::new(ordinal))),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_is_host_only() {
        let runtime = Runtime::default();
        assert_eq!(runtime.locations(), vec![Device::CPU]);
        let err = runtime
            .request_device(DeviceRequest::Accelerator(0))
            .unwrap_err();
        assert!(matches!(
            err,
            DeviceError::UnavailableLocation(DeviceRequest::Accelerator(0))
        ));
    }

    #[test]
    fn configured_accelerators_are_available() {
        let runtime = Runtime::new(RuntimeConfig {
            accelerators: 2,
            seed: None,
        });
        assert_eq!(runtime.locations().len(), 3);
        let device = runtime
            .request_device(DeviceRequest::Accelerator(1))
            .unwrap();
        assert!(device.is_accelerator());
        assert!(runtime
            .request_device(DeviceRequest::Accelerator(2))
            .is_err());
    }

    #[test]
    fn config_from_json_and_env() {
        let cfg = RuntimeConfig::from_json(r#"{"accelerators": 1}"#).unwrap();
        assert_eq!(cfg.accelerators, 1);
        assert_eq!(cfg.seed, None);

        let cfg = RuntimeConfig::default()
            .merge_env(|key| match key {
                ACCELERATORS_ENV => Some("3".to_string()),
                SEED_ENV => Some(" 42 ".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(cfg.accelerators, 3);
        assert_eq!(cfg.seed, Some(42));

        let err = RuntimeConfig::default()
            .merge_env(|key| (key == ACCELERATORS_ENV).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}
