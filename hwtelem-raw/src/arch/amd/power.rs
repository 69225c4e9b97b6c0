//! P-state status and energy counters for family 17h

use crate::register::RegisterLayout;

/// Energy counters tick in 15.3 µJ increments on every family 17h part
pub const ENERGY_UNIT_JOULES: f64 = 15.3e-6;

/// Core clock is `fid / dfs * 200 MHz`, i.e. a 100 MHz reference with a fixed
/// divisor of one half
pub const AMD_REFERENCE_CLOCK_MHZ: f64 = 100.0;

pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// MSRC001_0293
    pub const HARDWARE_PSTATE_STATUS: u32 = 0xC001_0293;

    /// MSRC001_0299, read only for completeness; the unit is fixed
    pub const PWR_UNIT: u32 = 0xC001_0299;

    /// MSRC001_029A, per core, total_energy [31:0]
    pub const CORE_ENERGY: CounterRegister = CounterRegister::new(0xC001_029A, CounterWidth::Bits32);

    /// MSRC001_029B, per package, total_energy [31:0]
    pub const PKG_ENERGY: CounterRegister = CounterRegister::new(0xC001_029B, CounterWidth::Bits32);
}

/// Current hardware P-state
///
/// | Bits  | Field          |
/// |-------|----------------|
/// | 0-7   | fid            |
/// | 8-13  | dfs            |
/// | 14-21 | vid            |
/// | 22-24 | current_pstate |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PStateStatus {
    pub fid: u8,
    pub dfs: u8,
    pub vid: u8,
    pub current_pstate: u8,
}

impl PStateStatus {
    /// Core multiplier relative to the 100 MHz reference
    ///
    /// NaN when the divisor field reads zero.
    pub fn multiplier(&self) -> f64 {
        if self.dfs == 0 {
            return f64::NAN;
        }
        self.fid as f64 / self.dfs as f64 * 2.0
    }
}

impl RegisterLayout for PStateStatus {
    fn to_msr_value(&self) -> u64 {
        (self.fid as u64)
            | ((self.dfs as u64 & 0x3F) << 8)
            | ((self.vid as u64) << 14)
            | ((self.current_pstate as u64 & 0x07) << 22)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            fid: (value & 0xFF) as u8,
            dfs: ((value >> 8) & 0x3F) as u8,
            vid: ((value >> 14) & 0xFF) as u8,
            current_pstate: ((value >> 22) & 0x07) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pstate_status_decode() {
        // fid 0x90, dfs 8, vid 0x50, pstate 0
        let raw = 0x90 | (8 << 8) | (0x50 << 14);
        let status = PStateStatus::from_msr_value(raw);
        assert_eq!(status.fid, 0x90);
        assert_eq!(status.dfs, 8);
        assert_eq!(status.vid, 0x50);
        assert_eq!(status.current_pstate, 0);
        assert_eq!(status.multiplier(), 36.0);
        assert_eq!(status.to_msr_value(), raw);
    }

    #[test]
    fn test_zero_divisor_gives_nan() {
        let status = PStateStatus {
            fid: 0x90,
            ..Default::default()
        };
        assert!(status.multiplier().is_nan());
    }

    #[test]
    fn test_upper_bits_ignored() {
        let status = PStateStatus::from_msr_value(0xFFFF_FFFF_FE00_0000);
        assert_eq!(status, PStateStatus::default());
    }
}
