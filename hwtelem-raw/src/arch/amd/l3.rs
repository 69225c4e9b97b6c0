//! L3 cache (CCX) performance counter definitions for family 17h
//!
//! L3 counters are shared by every core of a core complex and are programmed
//! from any one thread of that complex.

use crate::register::RegisterLayout;

/// Number of L3 counters programmed per CCX
pub const L3_COUNTERS: usize = 4;

/// One representative thread per CCX on a fully populated 16-core part
///
/// This is a fixed topology assumption; CCX membership is not discovered.
pub const CCX_THREADS: [u32; 4] = [0, 8, 16, 24];

/// MSR addresses for the L3 PMU
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// ChL3PmcCfg0..3
    pub const L3_PERF_CTL: [u32; 4] = [0xC001_0230, 0xC001_0232, 0xC001_0234, 0xC001_0236];

    /// ChL3Pmc0..3
    pub const L3_PERF_CTR: [CounterRegister; 4] = [
        CounterRegister::new(0xC001_0231, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0233, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0235, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0237, CounterWidth::Bits48),
    ];
}

/// L3 performance event select layout
///
/// ## Register Format
///
/// | Bits   | Field        | Description                                 |
/// |--------|--------------|---------------------------------------------|
/// | 0-7    | event_select | Event select                                |
/// | 8-15   | umask        | Unit mask                                   |
/// | 22     | enable       | Enable counter                              |
/// | 48-55  | slice_mask   | L3 slice select, bit 0 = slice 0            |
/// | 56-63  | thread_mask  | Thread select, bit 0 = c0t0, bit 1 = c0t1   |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L3PerfCtl {
    pub event_select: u8,
    pub umask: u8,
    pub enable: bool,
    pub slice_mask: u8,
    pub thread_mask: u8,
}

impl L3PerfCtl {
    /// Event counted across all four slices and all eight threads of a CCX
    pub fn all_slices(event_select: u8, umask: u8) -> Self {
        Self {
            event_select,
            umask,
            enable: true,
            slice_mask: 0x0F,
            thread_mask: 0xFF,
        }
    }
}

impl RegisterLayout for L3PerfCtl {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.umask as u64) << 8)
            | (if self.enable { 1 << 22 } else { 0 })
            | ((self.slice_mask as u64) << 48)
            | ((self.thread_mask as u64) << 56)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            umask: ((value >> 8) & 0xFF) as u8,
            enable: (value & (1 << 22)) != 0,
            slice_mask: ((value >> 48) & 0xFF) as u8,
            thread_mask: ((value >> 56) & 0xFF) as u8,
        }
    }
}
