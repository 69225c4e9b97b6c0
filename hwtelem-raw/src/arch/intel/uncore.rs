//! Client uncore PMU register definitions (Skylake client)
//!
//! The client uncore exposes one fixed counter counting uncore clocks and a
//! C-box (coherence box) per LLC slice with two programmable counters each.
//! Uncore MSRs are package scoped and need no thread pinning.

use crate::register::{CounterRegister, CounterWidth, RegisterLayout};

/// Address distance between consecutive C-box banks
pub const CBO_STRIDE: u32 = 0x10;

/// Programmable counters per C-box
pub const CBO_COUNTERS: usize = 2;

/// MSR addresses for the client uncore
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// MSR_UNC_PERF_GLOBAL_CTRL
    pub const UNC_PERF_GLOBAL_CTRL: u32 = 0xE01;

    /// MSR_UNC_PERF_FIXED_CTRL
    pub const UNC_PERF_FIXED_CTRL: u32 = 0x394;

    /// MSR_UNC_PERF_FIXED_CTR, uncore clock ticks
    pub const UNC_PERF_FIXED_CTR: CounterRegister = CounterRegister::new(0x395, CounterWidth::Bits48);

    /// MSR_UNC_CBO_CONFIG
    pub const UNC_CBO_CONFIG: u32 = 0x396;

    /// C-box 0 event select bases
    pub const UNC_CBO_PERFEVTSEL_BASE: [u32; 2] = [0x700, 0x701];

    /// C-box 0 counter bases
    pub const UNC_CBO_PERFCTR_BASE: [u32; 2] = [0x706, 0x707];
}

/// Address layout of the C-box banks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CboxLayout {
    /// Address distance between consecutive banks
    pub stride: u32,
    /// Bits of MSR_UNC_CBO_CONFIG holding the bank count
    pub bank_count_mask: u8,
}

impl CboxLayout {
    pub const CLIENT: Self = Self {
        stride: CBO_STRIDE,
        bank_count_mask: 0x0F,
    };

    /// Event select address of counter `counter` in bank `bank`
    pub const fn event_select(&self, bank: u32, counter: usize) -> u32 {
        msr::UNC_CBO_PERFEVTSEL_BASE[counter] + bank * self.stride
    }

    /// Counter register `counter` in bank `bank`
    pub const fn counter(&self, bank: u32, counter: usize) -> CounterRegister {
        CounterRegister::new(
            msr::UNC_CBO_PERFCTR_BASE[counter] + bank * self.stride,
            CounterWidth::Bits44,
        )
    }

    pub fn bank_count(&self, config: CboConfig) -> u32 {
        (config.bank_count & self.bank_count_mask) as u32
    }
}

/// Uncore global control, only the enable-all bit (29) is modelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UncPerfGlobalCtrl {
    pub enable: bool,
}

impl RegisterLayout for UncPerfGlobalCtrl {
    fn to_msr_value(&self) -> u64 {
        if self.enable {
            1 << 29
        } else {
            0
        }
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            enable: (value & (1 << 29)) != 0,
        }
    }
}

/// Uncore fixed counter control
///
/// | Bits | Field              |
/// |------|--------------------|
/// | 20   | overflow_propagate |
/// | 22   | enable             |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UncPerfFixedCtrl {
    pub overflow_propagate: bool,
    pub enable: bool,
}

impl RegisterLayout for UncPerfFixedCtrl {
    fn to_msr_value(&self) -> u64 {
        (if self.overflow_propagate { 1 << 20 } else { 0 }) | (if self.enable { 1 << 22 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            overflow_propagate: (value & (1 << 20)) != 0,
            enable: (value & (1 << 22)) != 0,
        }
    }
}

/// Number of C-box banks with programmable counters, bits 0-3
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CboConfig {
    pub bank_count: u8,
}

impl RegisterLayout for CboConfig {
    fn to_msr_value(&self) -> u64 {
        self.bank_count as u64 & 0x0F
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            bank_count: (value & 0x0F) as u8,
        }
    }
}

/// C-box Performance Event Select layout
///
/// ## Register Format
///
/// | Bits   | Field     | Description                           |
/// |--------|-----------|---------------------------------------|
/// | 0-7    | event     | Event select                          |
/// | 8-15   | umask     | Unit mask                             |
/// | 18     | edge      | Edge detect                           |
/// | 20     | int       | Overflow PMI                          |
/// | 22     | enable    | Local counter enable                  |
/// | 23     | invert    | Invert threshold comparison           |
/// | 24-31  | threshold | Count when increment >= threshold     |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CboPerfEvtSel {
    pub event: u8,
    pub umask: u8,
    pub edge: bool,
    pub int: bool,
    pub enable: bool,
    pub invert: bool,
    pub threshold: u8,
}

impl CboPerfEvtSel {
    pub fn counting(event: u8, umask: u8) -> Self {
        Self {
            event,
            umask,
            enable: true,
            ..Default::default()
        }
    }
}

impl RegisterLayout for CboPerfEvtSel {
    fn to_msr_value(&self) -> u64 {
        (self.event as u64)
            | ((self.umask as u64) << 8)
            | (if self.edge { 1 << 18 } else { 0 })
            | (if self.int { 1 << 20 } else { 0 })
            | (if self.enable { 1 << 22 } else { 0 })
            | (if self.invert { 1 << 23 } else { 0 })
            | ((self.threshold as u64) << 24)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event: (value & 0xFF) as u8,
            umask: ((value >> 8) & 0xFF) as u8,
            edge: (value & (1 << 18)) != 0,
            int: (value & (1 << 20)) != 0,
            enable: (value & (1 << 22)) != 0,
            invert: (value & (1 << 23)) != 0,
            threshold: ((value >> 24) & 0xFF) as u8,
        }
    }
}
