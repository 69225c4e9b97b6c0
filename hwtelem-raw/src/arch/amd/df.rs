//! Data fabric performance counter definitions for family 17h

use crate::register::RegisterLayout;

/// MSR addresses for the data fabric PMU
pub mod msr {
    use crate::register::{CounterRegister, CounterWidth};

    /// DF_PERF_CTL0..3
    pub const DF_PERF_CTL: [u32; 4] = [0xC001_0240, 0xC001_0242, 0xC001_0244, 0xC001_0246];

    /// DF_PERF_CTR0..3
    pub const DF_PERF_CTR: [CounterRegister; 4] = [
        CounterRegister::new(0xC001_0241, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0243, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0245, CounterWidth::Bits48),
        CounterRegister::new(0xC001_0247, CounterWidth::Bits48),
    ];
}

/// Data fabric performance event select layout
///
/// ## Register Format
///
/// | Bits   | Field            | Description                         |
/// |--------|------------------|-------------------------------------|
/// | 0-7    | event_select     | Event select                        |
/// | 8-15   | umask            | Unit mask                           |
/// | 22     | enable           | Enable counter                      |
/// | 32-39  | event_select     | Same byte again                     |
/// | 59-60  | event_select_ext | Event select bits 12-13             |
///
/// The event byte is written twice: once at bit 0 and once at bit 32. The
/// upper copy is not an independent field. Decoding reads the low copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DfPerfCtl {
    pub event_select: u8,
    pub umask: u8,
    pub enable: bool,
    /// Only the low 2 bits are encoded
    pub event_select_ext: u8,
}

impl RegisterLayout for DfPerfCtl {
    fn to_msr_value(&self) -> u64 {
        (self.event_select as u64)
            | ((self.umask as u64) << 8)
            | (if self.enable { 1 << 22 } else { 0 })
            | ((self.event_select as u64) << 32)
            | ((self.event_select_ext as u64 & 0x03) << 59)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: (value & 0xFF) as u8,
            umask: ((value >> 8) & 0xFF) as u8,
            enable: (value & (1 << 22)) != 0,
            event_select_ext: ((value >> 59) & 0x03) as u8,
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        if self.event_select_ext > 0x03 {
            return Err("Event select extension must be <= 3 (2 bits)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_byte_is_echoed_high() {
        let ctl = DfPerfCtl {
            event_select: 0x07,
            umask: 0x38,
            enable: true,
            event_select_ext: 0,
        };
        let value = ctl.to_msr_value();
        assert_eq!(value & 0xFF, 0x07);
        assert_eq!((value >> 32) & 0xFF, 0x07);
        assert_eq!(value, 0x0000_0007_0040_3807);
    }

    #[test]
    fn test_df_perf_ctl_round_trip_boundaries() {
        for v in [0u8, 1, 0xFF] {
            for ctl in [
                DfPerfCtl {
                    event_select: v,
                    ..Default::default()
                },
                DfPerfCtl {
                    umask: v,
                    ..Default::default()
                },
            ] {
                assert_eq!(DfPerfCtl::from_msr_value(ctl.to_msr_value()), ctl);
            }
        }
        for v in [0u8, 1, 3] {
            let ctl = DfPerfCtl {
                event_select_ext: v,
                ..Default::default()
            };
            assert_eq!(DfPerfCtl::from_msr_value(ctl.to_msr_value()), ctl);
            assert_eq!(ctl.to_msr_value() >> 59, v as u64);
        }
        let enabled = DfPerfCtl {
            enable: true,
            ..Default::default()
        };
        assert_eq!(DfPerfCtl::from_msr_value(enabled.to_msr_value()), enabled);
    }

    #[test]
    fn test_df_perf_ctl_validate_extension() {
        let ctl = DfPerfCtl {
            event_select_ext: 4,
            ..Default::default()
        };
        assert!(ctl.validate().is_err());
    }
}
