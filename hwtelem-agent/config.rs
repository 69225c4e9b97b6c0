use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use hwtelem_raw::arch::amd::l3::CCX_THREADS;

use crate::error::{HwtelemError, Result};
use crate::metrics::delta::MIN_INTERVAL;

/// Settings consumed by the telemetry engine itself
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time stamp counter frequency in MHz, the reference clock for Intel
    /// bus-clock derivation and the generic per-core clock
    pub reference_clock_mhz: f64,
    /// Representative thread of each AMD core complex, in CCX order
    pub ccx_threads: Vec<u32>,
    /// Owner label attached to every sensor
    pub owner: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_clock_mhz: 100.0,
            ccx_threads: CCX_THREADS.to_vec(),
            owner: "cpu/0".to_string(),
        }
    }
}

/// Sensor parameter override key: sensor name and parameter position
pub type ParameterKey = (String, usize);

/// Validated agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub listen: SocketAddr,
    pub interval: Duration,
    pub engine: EngineConfig,
    pub parameter_overrides: HashMap<ParameterKey, f64>,
}

impl AgentConfig {
    pub fn new(
        listen: SocketAddr,
        interval: Duration,
        engine: EngineConfig,
        overrides: &[String],
    ) -> Result<Self> {
        if interval < MIN_INTERVAL {
            return Err(HwtelemError::ConfigError(format!(
                "Sampling interval {interval:?} is below the {MIN_INTERVAL:?} minimum"
            )));
        }
        if !(engine.reference_clock_mhz.is_finite() && engine.reference_clock_mhz > 0.0) {
            return Err(HwtelemError::ConfigError(format!(
                "Reference clock must be positive, got {}",
                engine.reference_clock_mhz
            )));
        }

        let parameter_overrides = overrides
            .iter()
            .map(|s| Self::parse_parameter_override(s))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            listen,
            interval,
            engine,
            parameter_overrides,
        })
    }

    /// Parse `<sensor name>/<position>=<value>`, e.g. `CPU Core #1/0=95`
    pub fn parse_parameter_override(s: &str) -> Result<(ParameterKey, f64)> {
        let invalid = || {
            HwtelemError::ConfigError(format!(
                "Invalid parameter override '{s}', expected <sensor>/<position>=<value>"
            ))
        };

        let (key, value) = s.split_once('=').ok_or_else(invalid)?;
        let (name, position) = key.rsplit_once('/').ok_or_else(invalid)?;
        if name.is_empty() {
            return Err(invalid());
        }
        let position: usize = position.trim().parse().map_err(|_| invalid())?;
        let value: f64 = value.trim().parse().map_err(|_| invalid())?;

        Ok(((name.to_string(), position), value))
    }

    /// Detect online CPUs from /sys/devices/system/cpu/online
    pub fn detect_online_cpus() -> Vec<u32> {
        std::fs::read_to_string("/sys/devices/system/cpu/online")
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_else(|| {
                tracing::warn!("Failed to detect online CPUs, using default: 0");
                vec![0]
            })
    }
}

/// Parse CPU list like "0-3,8-11"
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',') {
        if let Some((start, end)) = part.split_once('-') {
            let start: u32 = start.parse().ok()?;
            let end: u32 = end.parse().ok()?;
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        assert_eq!(parse_cpu_list("0-3,8-9\n"), Some(vec![0, 1, 2, 3, 8, 9]));
        assert_eq!(parse_cpu_list("5"), Some(vec![5]));
        assert_eq!(parse_cpu_list("a-b"), None);
    }

    #[test]
    fn test_parameter_override_parsing() {
        let ((name, position), value) =
            AgentConfig::parse_parameter_override("CPU Core #1/0=95.5").unwrap();
        assert_eq!(name, "CPU Core #1");
        assert_eq!(position, 0);
        assert_eq!(value, 95.5);

        // the last slash separates the position
        let ((name, _), _) = AgentConfig::parse_parameter_override("a/b/1=2").unwrap();
        assert_eq!(name, "a/b");
    }

    #[test]
    fn test_parameter_override_rejects_garbage() {
        for s in ["CPU Core #1=95", "/0=1", "x/y=1", "x/0=warm"] {
            assert!(AgentConfig::parse_parameter_override(s).is_err(), "{s}");
        }
    }

    #[test]
    fn test_agent_config_rejects_short_interval() {
        let listen: SocketAddr = "127.0.0.1:9100".parse().unwrap();
        let result = AgentConfig::new(
            listen,
            Duration::from_millis(1),
            EngineConfig::default(),
            &[],
        );
        assert!(matches!(result, Err(HwtelemError::ConfigError(_))));

        let config = AgentConfig::new(
            listen,
            Duration::from_secs(1),
            EngineConfig::default(),
            &["Core Max/0=1".to_string()],
        )
        .unwrap();
        assert_eq!(
            config.parameter_overrides.get(&("Core Max".to_string(), 0)),
            Some(&1.0)
        );
        assert_eq!(config.engine.ccx_threads, vec![0, 8, 16, 24]);
    }
}
