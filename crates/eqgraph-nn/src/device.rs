//! Execution target as a configuration value.
//!
//! The device only decides where tensors live; it never changes results.

use std::fmt;
use std::str::FromStr;

use candle_core::Device;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceConfig {
    #[default]
    Cpu,
    /// CUDA device ordinal (needs the `cuda` feature).
    Cuda(usize),
    /// Metal device ordinal (needs the `metal` feature).
    Metal(usize),
}

impl DeviceConfig {
    /// Open the configured device.
    pub fn device(self) -> Result<Device> {
        Ok(match self {
            DeviceConfig::Cpu => Device::Cpu,
            DeviceConfig::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceConfig::Metal(ordinal) => Device::new_metal(ordinal)?,
        })
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConfig::Cpu => f.write_str("cpu"),
            DeviceConfig::Cuda(i) => write!(f, "cuda:{i}"),
            DeviceConfig::Metal(i) => write!(f, "metal:{i}"),
        }
    }
}

impl FromStr for DeviceConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidConfig(format!("unknown device `{s}` (expected cpu, cuda:N or metal:N)"));
        if s == "cpu" {
            return Ok(DeviceConfig::Cpu);
        }
        let (kind, ordinal) = match s.split_once(':') {
            Some((kind, ordinal)) => (kind, ordinal.parse::<usize>().map_err(|_| invalid())?),
            None => (s, 0),
        };
        match kind {
            "cuda" => Ok(DeviceConfig::Cuda(ordinal)),
            "metal" => Ok(DeviceConfig::Metal(ordinal)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for DeviceConfig {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceConfig> for String {
    fn from(value: DeviceConfig) -> Self {
        value.to_string()
    }
}
