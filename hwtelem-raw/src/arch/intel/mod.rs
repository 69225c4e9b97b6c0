//! Intel register definitions, NetBurst through Tiger Lake
//!
//! ## Units
//!
//! - **core** - architectural core PMU (programmable and fixed counters)
//! - **thermal** - digital thermal sensor status and TjMax
//! - **clock** - platform info and current P-state ratio
//! - **rapl** - running average power limit energy counters
//! - **uncore** - client uncore global control and C-box counters
//! - **imc** - client integrated memory controller free-running counters
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - 6th Generation Intel® Core™ Processor Family Uncore Performance Monitoring Reference Manual

pub mod clock;
pub mod core;
pub mod imc;
pub mod rapl;
pub mod thermal;
pub mod uncore;

/// CPUID family of every Core-era Intel processor
pub const FAMILY_6: u32 = 0x06;

/// CPUID family of NetBurst processors
pub const FAMILY_NETBURST: u32 = 0x0F;
