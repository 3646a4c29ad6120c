use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// An execution device the embedding model may run on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DevicePreference {
    /// Apple Metal Performance Shaders
    Mps,
    /// CUDA device with the given ordinal
    Cuda(usize),
    /// General-purpose CPU, always available
    Cpu,
}

impl DevicePreference {
    /// Default priority chain: MPS, then the first CUDA device, then CPU
    pub fn default_chain() -> Vec<DevicePreference> {
        vec![Self::Mps, Self::Cuda(0), Self::Cpu]
    }

    /// Parse a comma-separated preference list such as `"cuda:1,cpu"`
    pub fn parse_list(list: &str) -> Result<Vec<DevicePreference>, AppError> {
        let prefs = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<DevicePreference>)
            .collect::<Result<Vec<_>, _>>()?;

        if prefs.is_empty() {
            return Err(AppError::Config("device preference list is empty".to_string()));
        }
        Ok(prefs)
    }
}

impl FromStr for DevicePreference {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "mps" => Ok(Self::Mps),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(index) => index
                    .parse()
                    .map(Self::Cuda)
                    .map_err(|_| AppError::Config(format!("invalid CUDA device index: {}", s))),
                None => Err(AppError::Config(format!("unknown device: {}", s))),
            },
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mps => write!(f, "mps"),
            Self::Cuda(index) => write!(f, "cuda:{}", index),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Resolve a preference list to the first available torch device, falling back to CPU
#[cfg(feature = "embeddings")]
pub fn resolve_device(preferences: &[DevicePreference]) -> tch::Device {
    for pref in preferences {
        match *pref {
            DevicePreference::Mps if tch::utils::has_mps() => return tch::Device::Mps,
            DevicePreference::Cuda(index)
                if tch::Cuda::is_available() && index < tch::Cuda::device_count() as usize =>
            {
                return tch::Device::Cuda(index)
            }
            DevicePreference::Cpu => return tch::Device::Cpu,
            _ => log::debug!("Device {} is not available, trying next", pref),
        }
    }
    tch::Device::Cpu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_devices() {
        assert_eq!("mps".parse::<DevicePreference>().unwrap(), DevicePreference::Mps);
        assert_eq!("CUDA".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(0));
        assert_eq!("cuda:2".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(2));
        assert_eq!(" cpu ".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert!("tpu".parse::<DevicePreference>().is_err());
        assert!("cuda:x".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_parse_list_keeps_order() {
        let prefs = DevicePreference::parse_list("cuda:1, mps,cpu").unwrap();
        assert_eq!(
            prefs,
            vec![DevicePreference::Cuda(1), DevicePreference::Mps, DevicePreference::Cpu]
        );
        assert!(DevicePreference::parse_list(" , ").is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for pref in DevicePreference::default_chain() {
            assert_eq!(pref.to_string().parse::<DevicePreference>().unwrap(), pref);
        }
    }

    #[cfg(feature = "embeddings")]
    #[test]
    fn test_cpu_only_preference_resolves_to_cpu() {
        assert_eq!(resolve_device(&[DevicePreference::Cpu]), tch::Device::Cpu);
        assert_eq!(resolve_device(&[]), tch::Device::Cpu);
    }
}
