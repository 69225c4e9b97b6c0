//! Vendor-specific register definitions
//!
//! - **AMD** (`amd` feature) - family 17h core, L3, data fabric and SMU registers
//! - **Intel** (`intel` feature) - core PMU, thermal, RAPL, client IMC and C-box registers

#[cfg(feature = "amd")]
pub mod amd;

#[cfg(feature = "intel")]
pub mod intel;
