//! SMU thermal and SVI2 telemetry registers for family 17h
//!
//! These live on the system management network (SMN). An SMN register is read
//! by writing its address to [`SMN_INDEX`] in the PCI configuration space of
//! the root complex (bus 0, device 0, function 0) and reading [`SMN_DATA`].

use crate::register::RegisterLayout;

/// PCI config offset taking the SMN address
pub const SMN_INDEX: u32 = 0x60;
/// PCI config offset returning the SMN data
pub const SMN_DATA: u32 = 0x64;

/// THM_TCON_CUR_TMP
pub const THM_TCON_CUR_TMP: u32 = 0x0005_9800;
/// Base of the SVI0 block
pub const SVI_BASE: u32 = 0x0005_A000;
/// SVI0_TFN_PLANE register
pub const SVI_TFN: u32 = SVI_BASE + 0x8;
/// First Zen 2 CCD temperature register; CCD `i` is at `+ 4 * i`
pub const CCD_TEMP_BASE: u32 = 0x0005_9954;
/// CCD temperature slots probed
pub const CCD_COUNT: usize = 8;

/// Degrees per CUR_TEMP step
pub const TCTL_STEP: f64 = 0.125;
/// Offset applied when the range select bit is set
pub const TCTL_RANGE_OFFSET: f64 = -49.0;

/// SMN address of CCD temperature slot `index`
pub const fn ccd_temperature(index: usize) -> u32 {
    CCD_TEMP_BASE + (index as u32) * 4
}

/// SVI2 telemetry plane addresses for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SviPlanes {
    /// Core voltage plane
    pub core: u32,
    /// SoC voltage plane
    pub soc: u32,
}

impl SviPlanes {
    /// Plane layout by CPUID model
    pub const fn for_model(model: u32) -> Self {
        match model {
            // Threadripper 3000
            0x31 => Self {
                core: SVI_BASE + 0x14,
                soc: SVI_BASE + 0x10,
            },
            // Matisse
            0x71 => Self {
                core: SVI_BASE + 0x10,
                soc: SVI_BASE + 0xC,
            },
            _ => Self {
                core: SVI_BASE + 0xC,
                soc: SVI_BASE + 0x10,
            },
        }
    }
}

/// Control temperature register
///
/// | Bits  | Field        |
/// |-------|--------------|
/// | 19    | range_select |
/// | 21-31 | current_temp |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThmTconCurTmp {
    /// 11-bit reading in 0.125 °C steps
    pub current_temp: u16,
    /// When set the reading carries an extra -49 °C offset
    pub range_select: bool,
}

impl RegisterLayout for ThmTconCurTmp {
    fn to_msr_value(&self) -> u64 {
        ((self.current_temp as u64 & 0x7FF) << 21) | (if self.range_select { 1 << 19 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            current_temp: ((value >> 21) & 0x7FF) as u16,
            range_select: (value & (1 << 19)) != 0,
        }
    }
}

/// SVI2 plane telemetry, only the voltage code is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SviTelemetry {
    /// VDD code in 6.25 mV steps below 1.55 V
    pub vdd_code: u8,
}

impl RegisterLayout for SviTelemetry {
    fn to_msr_value(&self) -> u64 {
        (self.vdd_code as u64) << 16
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            vdd_code: ((value >> 16) & 0xFF) as u8,
        }
    }
}

/// Plane presence bits; a set bit means the plane is not reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SviTfn {
    pub core_plane_disabled: bool,
    pub soc_plane_disabled: bool,
}

impl RegisterLayout for SviTfn {
    fn to_msr_value(&self) -> u64 {
        (if self.core_plane_disabled { 1 } else { 0 }) | (if self.soc_plane_disabled { 2 } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            core_plane_disabled: (value & 0x01) != 0,
            soc_plane_disabled: (value & 0x02) != 0,
        }
    }
}

/// Zen 2 per-CCD temperature
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CcdTemperature {
    pub raw: u16,
}

impl CcdTemperature {
    /// Temperature in °C, `None` for an unpopulated CCD (raw reading zero)
    pub fn celsius(&self) -> Option<f64> {
        if self.raw == 0 {
            return None;
        }
        Some((self.raw as f64 * 125.0 - 305_000.0) / 1000.0)
    }
}

impl RegisterLayout for CcdTemperature {
    fn to_msr_value(&self) -> u64 {
        self.raw as u64 & 0xFFF
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            raw: (value & 0xFFF) as u16,
        }
    }
}
