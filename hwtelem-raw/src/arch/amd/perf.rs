//! Core performance counter definitions for family 17h

use crate::register::RegisterLayout;

/// Number of programmable core counters
pub const CORE_COUNTERS: usize = 6;

/// MSR addresses for the core PMU
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// Hardware configuration register
    pub const HWCR: u32 = 0xC001_0015;

    /// Core::X86::Msr::PERF_CTL0..5
    pub const PERF_CTL: [u32; 6] = [
        0xC001_0200,
        0xC001_0202,
        0xC001_0204,
        0xC001_0206,
        0xC001_0208,
        0xC001_020A,
    ];

    /// Core::X86::Msr::PERF_CTR0..5
    pub const PERF_CTR: [CounterRegister; 6] = [
        CounterRegister::new(0xC001_0201, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0203, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0205, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0207, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0209, CounterWidth::Bits48),
        CounterRegister::new(0xC001_020B, CounterWidth::Bits48),
    ];

    /// Retired instructions, enabled through HWCR bit 30
    pub const INSTRUCTIONS_RETIRED: CounterRegister =
        CounterRegister::new(0xC000_00E9, CounterWidth::Bits64);

    /// Actual performance clock counter
    pub const APERF: CounterRegister = CounterRegister::new(0x0000_00E8, CounterWidth::Bits64);
}

/// Core performance event select layout
///
/// ## Register Format
///
/// | Bits   | Field             | Description                      |
/// |--------|-------------------|----------------------------------|
/// | 0-7    | event_select      | Event select, low byte           |
/// | 8-15   | umask             | Unit mask                        |
/// | 16     | usr               | Count in user mode               |
/// | 17     | os                | Count in OS mode                 |
/// | 18     | edge              | Edge detect                      |
/// | 20     | interrupt         | APIC interrupt on overflow       |
/// | 22     | enable            | Enable counter                   |
/// | 23     | invert            | Invert counter mask              |
/// | 24-31  | counter_mask      | Counter mask                     |
/// | 32-35  | event_select_high | Event select, bits 8-11          |
/// | 40     | host              | Count host events                |
/// | 41     | guest             | Count guest events               |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfCtl {
    pub event_select: u8,
    pub umask: u8,
    pub usr: bool,
    pub os: bool,
    pub edge: bool,
    pub interrupt: bool,
    pub enable: bool,
    pub invert: bool,
    pub counter_mask: u8,
    /// Only the low 4 bits are encoded
    pub event_select_high: u8,
    pub host: bool,
    pub guest: bool,
}

impl PerfCtl {
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

impl RegisterLayout for PerfCtl {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.umask as u64) << 8)
            | (if self.usr { 1 << 16 } else { 0 })
            | (if self.os { 1 << 17 } else { 0 })
            | (if self.edge { 1 << 18 } else { 0 })
            | (if self.interrupt { 1 << 20 } else { 0 })
            | (if self.enable { 1 << 22 } else { 0 })
            | (if self.invert { 1 << 23 } else { 0 })
            | ((self.counter_mask as u64) << 24)
            | ((self.event_select_high as u64 & 0x0F) << 32)
            | (if self.host { 1 << 40 } else { 0 })
            | (if self.guest { 1 << 41 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            umask: ((value >> 8) & 0xFF) as u8,
            usr: (value & (1 << 16)) != 0,
            os: (value & (1 << 17)) != 0,
            edge: (value & (1 << 18)) != 0,
            interrupt: (value & (1 << 20)) != 0,
            enable: (value & (1 << 22)) != 0,
            invert: (value & (1 << 23)) != 0,
            counter_mask: ((value >> 24) & 0xFF) as u8,
            event_select_high: ((value >> 32) & 0x0F) as u8,
            host: (value & (1 << 40)) != 0,
            guest: (value & (1 << 41)) != 0,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.event_select_high > 0x0F {
            return Err("Event select high must be <= 0xF (4 bits)");
        }
        Ok(())
    }
}

/// Hardware configuration register, as far as telemetry cares
///
/// Bit 30 (`IRPerfEn`) enables the retired-instruction counter. All other
/// bits are carried through untouched so a read-modify-write preserves them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hwcr {
    pub instructions_retired_enable: bool,
    other: u64,
}

const HWCR_IRPERF_EN: u64 = 1 << 30;

impl RegisterLayout for Hwcr {
    fn to_msr_value(&self) -> u64 {
        (self.other & !HWCR_IRPERF_EN)
            | (if self.instructions_retired_enable {
                HWCR_IRPERF_EN
            } else {
                0
            })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            instructions_retired_enable: (value & HWCR_IRPERF_EN) != 0,
            other: value & !HWCR_IRPERF_EN,
        }
    }
}
