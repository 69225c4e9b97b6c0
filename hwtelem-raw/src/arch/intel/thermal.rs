//! Digital thermal sensor registers

use crate::register::RegisterLayout;

pub mod msr {
    /// IA32_THERM_STATUS, per core
    pub const IA32_THERM_STATUS: u32 = 0x19C;
    /// IA32_PACKAGE_THERM_STATUS
    pub const IA32_PACKAGE_THERM_STATUS: u32 = 0x1B1;
    /// MSR_TEMPERATURE_TARGET
    pub const IA32_TEMPERATURE_TARGET: u32 = 0x1A2;
}

/// Core or package thermal status
///
/// | Bits  | Field         |
/// |-------|---------------|
/// | 16-22 | distance      |
/// | 31    | reading_valid |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThermStatus {
    /// Degrees below TjMax
    pub distance: u8,
    pub reading_valid: bool,
}

impl RegisterLayout for ThermStatus {
    fn to_msr_value(&self) -> u64 {
        ((self.distance as u64 & 0x7F) << 16) | (if self.reading_valid { 1 << 31 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            distance: ((value >> 16) & 0x7F) as u8,
            reading_valid: (value & (1 << 31)) != 0,
        }
    }
}

/// TjMax as reported by the processor, bits 16-23
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemperatureTarget {
    pub tj_max: u8,
}

impl RegisterLayout for TemperatureTarget {
    fn to_msr_value(&self) -> u64 {
        (self.tj_max as u64) << 16
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            tj_max: ((value >> 16) & 0xFF) as u8,
        }
    }
}
