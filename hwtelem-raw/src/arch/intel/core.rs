//! Architectural core PMU register definitions
//!
//! Four programmable counters and three fixed-function counters per logical
//! processor.

use crate::register::RegisterLayout;

/// Number of general-purpose performance counters per thread
pub const CORE_PMU_COUNTERS: usize = 4;

/// Number of fixed-function performance counters
pub const CORE_FIXED_COUNTERS: usize = 3;

/// MSR addresses for the core PMU
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// Performance Event Select registers (IA32_PERFEVTSELx)
    pub const IA32_PERFEVTSEL: [u32; 4] = [0x186, 0x187, 0x188, 0x189];

    /// Full-width performance counters (IA32_A_PMCx)
    pub const IA32_A_PMC: [CounterRegister; 4] = [
        CounterRegister::new(0x4C1, CounterWidth::Bits48),
        CounterRegister::new(0x4C2, CounterWidth::Bits48),
        CounterRegister::new(0x4C3, CounterWidth::Bits48),
        CounterRegister::new(0x4C4, CounterWidth::Bits48),
    ];

    /// Fixed-function Performance Counter Control
    pub const IA32_FIXED_CTR_CTRL: u32 = 0x38D;

    /// Instructions retired
    pub const IA32_FIXED_CTR0: CounterRegister = CounterRegister::new(0x309, CounterWidth::Bits48);
    /// Unhalted core cycles
    pub const IA32_FIXED_CTR1: CounterRegister = CounterRegister::new(0x30A, CounterWidth::Bits48);
    /// Unhalted reference cycles
    pub const IA32_FIXED_CTR2: CounterRegister = CounterRegister::new(0x30B, CounterWidth::Bits48);

    /// Performance Counter Global Control
    pub const IA32_PERF_GLOBAL_CTRL: u32 = 0x38F;
}

/// Core Performance Event Select Register layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                    |
/// |--------|-------------|--------------------------------|
/// | 0-7    | event_select| Event select                   |
/// | 8-15   | umask       | Unit mask                      |
/// | 16     | usr         | User mode                      |
/// | 17     | os          | OS mode                        |
/// | 18     | edge        | Edge detect                    |
/// | 19     | pc          | Pin control                    |
/// | 20     | int         | APIC interrupt enable          |
/// | 21     | any_thread  | Any thread                     |
/// | 22     | enable      | Enable counter                 |
/// | 23     | invert      | Invert counter mask            |
/// | 24-31  | cmask       | Counter mask                   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfEvtSel {
    pub event_select: u8,
    pub umask: u8,
    pub usr: bool,
    pub os: bool,
    pub edge: bool,
    pub pc: bool,
    pub int: bool,
    pub any_thread: bool,
    pub enable: bool,
    pub invert: bool,
    pub cmask: u8,
}

impl PerfEvtSel {
    /// Event counted in user and OS mode with the counter enabled
    pub fn counting(event_select: u8, umask: u8) -> Self {
        Self {
            event_select,
            umask,
            usr: true,
            os: true,
            enable: true,
            ..Default::default()
        }
    }
}

impl RegisterLayout for PerfEvtSel {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.umask as u64) << 8)
            | (if self.usr { 1 << 16 } else { 0 })
            | (if self.os { 1 << 17 } else { 0 })
            | (if self.edge { 1 << 18 } else { 0 })
            | (if self.pc { 1 << 19 } else { 0 })
            | (if self.int { 1 << 20 } else { 0 })
            | (if self.any_thread { 1 << 21 } else { 0 })
            | (if self.enable { 1 << 22 } else { 0 })
            | (if self.invert { 1 << 23 } else { 0 })
            | ((self.cmask as u64) << 24)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            umask: ((value >> 8) & 0xFF) as u8,
            usr: (value & (1 << 16)) != 0,
            os: (value & (1 << 17)) != 0,
            edge: (value & (1 << 18)) != 0,
            pc: (value & (1 << 19)) != 0,
            int: (value & (1 << 20)) != 0,
            any_thread: (value & (1 << 21)) != 0,
            enable: (value & (1 << 22)) != 0,
            invert: (value & (1 << 23)) != 0,
            cmask: ((value >> 24) & 0xFF) as u8,
        }
    }
}

/// Control nibble of one fixed counter: [os, usr, any_thread, pmi]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedCounterMode {
    pub os: bool,
    pub usr: bool,
    pub any_thread: bool,
    pub pmi: bool,
}

impl FixedCounterMode {
    /// Count in both privilege levels, no PMI, this thread only
    pub const USR_OS: Self = Self {
        os: true,
        usr: true,
        any_thread: false,
        pmi: false,
    };

    fn bits(&self) -> u64 {
        (if self.os { 1 } else { 0 })
            | (if self.usr { 1 << 1 } else { 0 })
            | (if self.any_thread { 1 << 2 } else { 0 })
            | (if self.pmi { 1 << 3 } else { 0 })
    }

    fn from_bits(nibble: u64) -> Self {
        Self {
            os: (nibble & 1) != 0,
            usr: (nibble & (1 << 1)) != 0,
            any_thread: (nibble & (1 << 2)) != 0,
            pmi: (nibble & (1 << 3)) != 0,
        }
    }
}

/// Fixed Counter Control Register layout
///
/// Counter `i` is controlled by bits `4*i .. 4*i+3`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedCtrCtrl {
    pub counters: [FixedCounterMode; CORE_FIXED_COUNTERS],
}

impl FixedCtrCtrl {
    pub fn all(mode: FixedCounterMode) -> Self {
        Self {
            counters: [mode; CORE_FIXED_COUNTERS],
        }
    }
}

impl RegisterLayout for FixedCtrCtrl {
    fn to_msr_value(&self) -> u64 {
        self.counters
            .iter()
            .enumerate()
            .fold(0, |acc, (i, mode)| acc | (mode.bits() << (4 * i)))
    }

    fn from_msr_value(value: u64) -> Self {
        let mut counters = [FixedCounterMode::default(); CORE_FIXED_COUNTERS];
        for (i, mode) in counters.iter_mut().enumerate() {
            *mode = FixedCounterMode::from_bits((value >> (4 * i)) & 0x0F);
        }
        Self { counters }
    }
}

/// Global enable bits for programmable and fixed counters
///
/// | Bits  | Field        |
/// |-------|--------------|
/// | 0-3   | pmc_enable   |
/// | 32-34 | fixed_enable |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfGlobalCtrl {
    pub pmc_enable: u8,
    pub fixed_enable: u8,
}

impl PerfGlobalCtrl {
    /// Every programmable and fixed counter enabled
    pub fn all() -> Self {
        Self {
            pmc_enable: 0x0F,
            fixed_enable: 0x07,
        }
    }
}

impl RegisterLayout for PerfGlobalCtrl {
    fn to_msr_value(&self) -> u64 {
        (self.pmc_enable as u64 & 0x0F) | ((self.fixed_enable as u64 & 0x07) << 32)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            pmc_enable: (value & 0x0F) as u8,
            fixed_enable: ((value >> 32) & 0x07) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.pmc_enable > 0x0F {
            return Err("PMC enable mask must be <= 0xF (4 counters)");
        }
        if self.fixed_enable > 0x07 {
            return Err("Fixed enable mask must be <= 0x7 (3 counters)");
        }
        Ok(())
    }
}
