//! # hwtelem-raw
//!
//! Register definitions for CPU telemetry on AMD family 17h (Zen, Zen+, Zen 2)
//! and Intel processors from NetBurst through Tiger Lake.
//!
//! Every control value that reaches hardware is packed here by a
//! [`RegisterLayout`], and every counter register declares its
//! [`CounterWidth`] so wraparound is never guessed.
//!
//! ## Features
//!
//! - `amd` (default) - AMD core, L3, data fabric and SMU definitions
//! - `intel` (default) - Intel core PMU, thermal, RAPL, client IMC and C-box definitions
//!
//! ## Usage
//!
//! ```ignore
//! use hwtelem_raw::arch::amd::perf::{msr, PerfCtl};
//! use hwtelem_raw::{Register, RegisterLayout};
//!
//! let dc_access = Register::new(msr::PERF_CTL[0], PerfCtl::counting(0x40, 0x00));
//! assert_eq!(dc_access.value().bits(), 0x43_0040);
//! ```

pub mod arch;
pub mod msr;
pub mod register;

pub use msr::{MsrDevice, MsrError, Result};
pub use register::{CounterRegister, CounterWidth, Register, RegisterLayout, RegisterValue};
