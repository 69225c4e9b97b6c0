//! Bus ratio registers used to derive core clocks

use crate::register::RegisterLayout;

pub mod msr {
    /// IA32_PERF_STATUS
    pub const IA32_PERF_STATUS: u32 = 0x198;
    /// MSR_PLATFORM_INFO
    pub const MSR_PLATFORM_INFO: u32 = 0xCE;
}

/// Where the ratio sits inside a 32-bit status word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatioField {
    /// Bits 0-7 (Nehalem current ratio)
    LowByte,
    /// Bits 8-15 (Sandy Bridge and later)
    SecondByte,
    /// Bits 8-12 plus a half-ratio flag at bit 14 (Core 2, Atom, NetBurst)
    HalfStep,
}

impl RatioField {
    pub fn decode(self, word: u32) -> f64 {
        match self {
            RatioField::LowByte => (word & 0xFF) as f64,
            RatioField::SecondByte => ((word >> 8) & 0xFF) as f64,
            RatioField::HalfStep => ((word >> 8) & 0x1F) as f64 + 0.5 * ((word >> 14) & 1) as f64,
        }
    }
}

/// IA32_PERF_STATUS split into its two halves
///
/// The low half holds the current ratio; the high half holds the maximum
/// ratio on Core 2 era parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfStatus {
    pub current: u32,
    pub max: u32,
}

impl RegisterLayout for PerfStatus {
    fn to_msr_value(&self) -> u64 {
        (self.current as u64) | ((self.max as u64) << 32)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            current: value as u32,
            max: (value >> 32) as u32,
        }
    }
}

/// MSR_PLATFORM_INFO, only the non-turbo ratio (bits 8-15) is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    pub max_non_turbo_ratio: u8,
}

impl RegisterLayout for PlatformInfo {
    fn to_msr_value(&self) -> u64 {
        (self.max_non_turbo_ratio as u64) << 8
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            max_non_turbo_ratio: ((value >> 8) & 0xFF) as u8,
        }
    }
}
