//! AMD family 17h (Zen, Zen+, Zen 2) register definitions
//!
//! ## Units
//!
//! - **perf** - per-core performance counters and HWCR
//! - **l3** - per-CCX L3 cache counters
//! - **df** - data fabric counters
//! - **power** - P-state status and RAPL-style energy counters
//! - **smu** - thermal and SVI2 telemetry reached over SMN
//!
//! ## References
//!
//! - Processor Programming Reference (PPR) for AMD Family 17h Model 01h, Revision B1
//! - Processor Programming Reference (PPR) for AMD Family 17h Model 71h, Revision B0

pub mod df;
pub mod l3;
pub mod perf;
pub mod power;
pub mod smu;

/// CPUID family of every processor defined in this module
pub const FAMILY_17H: u32 = 0x17;
