use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HwtelemError {
    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error("MSR device error: {0}")]
    MsrDeviceError(#[from] hwtelem_raw::MsrError),

    #[error("PCI operation failed: {0}")]
    PciError(String),

    #[error("Physical memory access failed: {0}")]
    PhysicalMemoryError(String),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Topology error: {0}")]
    TopologyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, HwtelemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_error_converts() {
        fn fail() -> Result<()> {
            Err(prometheus::Error::Msg("duplicate metric".to_string()))?;
            Ok(())
        }
        let err = fail().unwrap_err();
        assert!(matches!(err, HwtelemError::PrometheusError(_)));
        assert_eq!(err.to_string(), "Prometheus error: Error: duplicate metric");
    }
}
