//! Microarchitecture capability table
//!
//! A static list of model entries is matched first-hit against
//! (vendor, family, model, stepping, core count). Everything not in the table
//! resolves to [`MicroArchitecture::Unknown`], which keeps a fixed 100 °C
//! ceiling and disables every optional counter group.

use hwtelem_raw::arch::amd::power::ENERGY_UNIT_JOULES;
use hwtelem_raw::arch::amd::smu::SviPlanes;
use hwtelem_raw::arch::amd::FAMILY_17H;
use hwtelem_raw::arch::intel::clock::RatioField;
use hwtelem_raw::arch::intel::rapl::RaplPowerUnit;
use hwtelem_raw::arch::intel::uncore::CboxLayout;
use hwtelem_raw::arch::intel::{FAMILY_6, FAMILY_NETBURST};

use crate::topology::{Processor, Vendor};

metric_enum! {
    pub enum MicroArchitecture {
        Unknown => "Unknown",
        NetBurst => "NetBurst",
        Core => "Core",
        Atom => "Atom",
        Nehalem => "Nehalem",
        SandyBridge => "Sandy Bridge",
        IvyBridge => "Ivy Bridge",
        Haswell => "Haswell",
        Broadwell => "Broadwell",
        Silvermont => "Silvermont",
        Skylake => "Skylake",
        Airmont => "Airmont",
        KabyLake => "Kaby Lake",
        Goldmont => "Goldmont",
        GoldmontPlus => "Goldmont Plus",
        CannonLake => "Cannon Lake",
        IceLake => "Ice Lake",
        TigerLake => "Tiger Lake",
        Tremont => "Tremont",
        Zen => "Zen",
        Zen2 => "Zen 2",
    }
}

/// Where the thermal ceiling (TjMax) comes from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalCeiling {
    Fixed(f64),
    /// IA32_TEMPERATURE_TARGET, probed per core
    FromMsr,
}

pub const DEFAULT_CEILING: f64 = 100.0;

/// How raw energy counts convert to joules
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyUnit {
    None,
    Fixed(f64),
    /// `2^-ESU` from MSR_RAPL_POWER_UNIT
    Log2Scaled,
    /// `10^-6 * 2^ESU`, Silvermont and Airmont
    MicroLog2Scaled,
}

impl EnergyUnit {
    /// Joules per count; scaled rules need the probed power-unit register
    pub fn joules(self, power_unit: Option<RaplPowerUnit>) -> Option<f64> {
        match (self, power_unit) {
            (EnergyUnit::Fixed(joules), _) => Some(joules),
            (EnergyUnit::Log2Scaled, Some(unit)) => Some(unit.energy_unit_multiplier()),
            (EnergyUnit::MicroLog2Scaled, Some(unit)) => Some(unit.micro_energy_unit_multiplier()),
            _ => None,
        }
    }

    pub fn needs_power_unit(self) -> bool {
        matches!(self, EnergyUnit::Log2Scaled | EnergyUnit::MicroLog2Scaled)
    }
}

/// Register that holds the TSC-to-bus-clock ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TscMultiplierSource {
    None,
    /// High half of IA32_PERF_STATUS, half-step encoded
    PerfStatusMax,
    /// MSR_PLATFORM_INFO non-turbo ratio
    PlatformInfo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmdFeatures {
    pub svi_planes: SviPlanes,
    /// Per-CCD Tdie readings (Zen 2)
    pub ccd_temperatures: bool,
    /// SoC plane reported regardless of the TFN disable bit
    pub soc_plane_always: bool,
    /// Tdie = Tctl + offset; zero when Tctl is Tdie
    pub tctl_offset: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntelFeatures {
    pub tsc_multiplier: TscMultiplierSource,
    pub ratio_field: RatioField,
    pub rapl: bool,
    pub core_pmu: bool,
    pub cache_pmcs: bool,
    pub client_imc: bool,
    pub cbox: Option<CboxLayout>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VendorFeatures {
    Amd(AmdFeatures),
    Intel(IntelFeatures),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityDescriptor {
    pub arch: MicroArchitecture,
    pub vendor: Vendor,
    pub ceiling: ThermalCeiling,
    pub energy_unit: EnergyUnit,
    pub features: VendorFeatures,
}

impl CapabilityDescriptor {
    fn unknown(vendor: Vendor) -> Self {
        Self {
            arch: MicroArchitecture::Unknown,
            vendor,
            ceiling: ThermalCeiling::Fixed(DEFAULT_CEILING),
            energy_unit: EnergyUnit::None,
            features: VendorFeatures::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityKey {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub core_count: usize,
}

impl CapabilityKey {
    pub fn of(processor: &Processor) -> Self {
        let identity = processor.identity();
        Self {
            vendor: identity.vendor,
            family: identity.family,
            model: identity.model,
            stepping: identity.stepping,
            core_count: processor.core_count(),
        }
    }
}

struct ModelEntry {
    vendor: Vendor,
    family: u32,
    models: &'static [u32],
    stepping: Option<u32>,
    core_count: Option<usize>,
    arch: MicroArchitecture,
    ceiling: ThermalCeiling,
}

impl ModelEntry {
    const fn new(
        vendor: Vendor,
        family: u32,
        models: &'static [u32],
        arch: MicroArchitecture,
        ceiling: ThermalCeiling,
    ) -> Self {
        Self {
            vendor,
            family,
            models,
            stepping: None,
            core_count: None,
            arch,
            ceiling,
        }
    }

    const fn stepping(mut self, stepping: u32) -> Self {
        self.stepping = Some(stepping);
        self
    }

    const fn cores(mut self, core_count: usize) -> Self {
        self.core_count = Some(core_count);
        self
    }

    fn matches(&self, key: &CapabilityKey) -> bool {
        self.vendor == key.vendor
            && self.family == key.family
            && (self.models.is_empty() || self.models.contains(&key.model))
            && self.stepping.map_or(true, |s| s == key.stepping)
            && self.core_count.map_or(true, |c| c == key.core_count)
    }
}

use MicroArchitecture as Arch;
use ThermalCeiling::{Fixed, FromMsr};

const fn intel(models: &'static [u32], arch: Arch, ceiling: ThermalCeiling) -> ModelEntry {
    ModelEntry::new(Vendor::Intel, FAMILY_6, models, arch, ceiling)
}

const CORE2_65NM: &[u32] = &[0x0F];
const ATOM_45NM: &[u32] = &[0x1C];

static MODEL_TABLE: &[ModelEntry] = &[
    // Core 2 (65nm): B2 depends on core count, G0 and M0 are fixed
    intel(CORE2_65NM, Arch::Core, Fixed(90.0)).stepping(0x06).cores(2),
    intel(CORE2_65NM, Arch::Core, Fixed(100.0)).stepping(0x06).cores(4),
    intel(CORE2_65NM, Arch::Core, Fixed(95.0)).stepping(0x06),
    intel(CORE2_65NM, Arch::Core, Fixed(100.0)).stepping(0x0B),
    intel(CORE2_65NM, Arch::Core, Fixed(95.0)).stepping(0x0D),
    intel(CORE2_65NM, Arch::Core, Fixed(95.0)),
    intel(&[0x17], Arch::Core, Fixed(100.0)),
    intel(ATOM_45NM, Arch::Atom, Fixed(90.0)).stepping(0x02),
    intel(ATOM_45NM, Arch::Atom, Fixed(100.0)).stepping(0x0A),
    intel(ATOM_45NM, Arch::Atom, Fixed(90.0)),
    intel(&[0x1A, 0x1E, 0x1F, 0x25, 0x2C, 0x2E, 0x2F], Arch::Nehalem, FromMsr),
    intel(&[0x2A, 0x2D], Arch::SandyBridge, FromMsr),
    intel(&[0x3A, 0x3E], Arch::IvyBridge, FromMsr),
    intel(&[0x3C, 0x3F, 0x45, 0x46], Arch::Haswell, FromMsr),
    intel(&[0x3D, 0x47, 0x4F, 0x56], Arch::Broadwell, FromMsr),
    intel(&[0x36], Arch::Atom, FromMsr),
    intel(&[0x37, 0x4A, 0x4D, 0x5A, 0x5D], Arch::Silvermont, FromMsr),
    intel(&[0x4E, 0x5E, 0x55], Arch::Skylake, FromMsr),
    intel(&[0x4C], Arch::Airmont, FromMsr),
    intel(&[0x8E, 0x9E], Arch::KabyLake, FromMsr),
    intel(&[0x5C, 0x5F], Arch::Goldmont, FromMsr),
    intel(&[0x7A], Arch::GoldmontPlus, FromMsr),
    intel(&[0x66], Arch::CannonLake, FromMsr),
    intel(&[0x7D, 0x7E, 0x6A, 0x6C], Arch::IceLake, FromMsr),
    intel(&[0x86], Arch::Tremont, FromMsr),
    intel(&[0x8C, 0x8D], Arch::TigerLake, FromMsr),
    ModelEntry::new(
        Vendor::Intel,
        FAMILY_NETBURST,
        &[0x00, 0x01, 0x02, 0x03, 0x04, 0x06],
        Arch::NetBurst,
        Fixed(100.0),
    ),
    ModelEntry::new(Vendor::Amd, FAMILY_17H, &[0x31, 0x71], Arch::Zen2, Fixed(DEFAULT_CEILING)),
    ModelEntry::new(Vendor::Amd, FAMILY_17H, &[], Arch::Zen, Fixed(DEFAULT_CEILING)),
];

/// Brand substrings whose Tctl reads above Tdie
const TCTL_OFFSETS: &[(&str, f64)] = &[
    ("AMD Ryzen 5 1600X", -20.0),
    ("AMD Ryzen 7 1700X", -20.0),
    ("AMD Ryzen 7 1800X", -20.0),
    ("AMD Ryzen 7 2700X", -10.0),
    ("AMD Ryzen Threadripper 19", -27.0),
    ("AMD Ryzen Threadripper 29", -27.0),
];

/// Resolve the capability descriptor for `key`
pub fn resolve(key: &CapabilityKey, brand: &str) -> CapabilityDescriptor {
    let Some(entry) = MODEL_TABLE.iter().find(|e| e.matches(key)) else {
        tracing::warn!(
            "Unrecognized CPU (vendor {:?}, family {:#x}, model {:#x}), using Unknown capabilities",
            key.vendor,
            key.family,
            key.model
        );
        return CapabilityDescriptor::unknown(key.vendor);
    };

    let descriptor = match key.vendor {
        Vendor::Amd => CapabilityDescriptor {
            arch: entry.arch,
            vendor: Vendor::Amd,
            ceiling: entry.ceiling,
            energy_unit: EnergyUnit::Fixed(ENERGY_UNIT_JOULES),
            features: VendorFeatures::Amd(amd_features(key.model, brand)),
        },
        Vendor::Intel => CapabilityDescriptor {
            arch: entry.arch,
            vendor: Vendor::Intel,
            ceiling: entry.ceiling,
            energy_unit: intel_energy_unit(entry.arch),
            features: VendorFeatures::Intel(intel_features(entry.arch, key.model)),
        },
        Vendor::Other => CapabilityDescriptor::unknown(key.vendor),
    };

    tracing::info!("Resolved microarchitecture {}", descriptor.arch.name());
    descriptor
}

fn amd_features(model: u32, brand: &str) -> AmdFeatures {
    let zen2 = matches!(model, 0x31 | 0x71);
    AmdFeatures {
        svi_planes: SviPlanes::for_model(model),
        ccd_temperatures: zen2,
        soc_plane_always: zen2,
        tctl_offset: TCTL_OFFSETS
            .iter()
            .find(|(name, _)| brand.contains(name))
            .map_or(0.0, |&(_, offset)| offset),
    }
}

fn has_rapl(arch: Arch) -> bool {
    matches!(
        arch,
        Arch::SandyBridge
            | Arch::IvyBridge
            | Arch::Haswell
            | Arch::Broadwell
            | Arch::Skylake
            | Arch::Silvermont
            | Arch::Airmont
            | Arch::Goldmont
            | Arch::KabyLake
            | Arch::GoldmontPlus
            | Arch::CannonLake
            | Arch::IceLake
            | Arch::TigerLake
            | Arch::Tremont
    )
}

fn intel_energy_unit(arch: Arch) -> EnergyUnit {
    match arch {
        Arch::Silvermont | Arch::Airmont => EnergyUnit::MicroLog2Scaled,
        a if has_rapl(a) => EnergyUnit::Log2Scaled,
        _ => EnergyUnit::None,
    }
}

fn intel_features(arch: Arch, model: u32) -> IntelFeatures {
    let (tsc_multiplier, ratio_field) = match arch {
        Arch::NetBurst | Arch::Atom | Arch::Core => {
            (TscMultiplierSource::PerfStatusMax, RatioField::HalfStep)
        }
        Arch::Nehalem => (TscMultiplierSource::PlatformInfo, RatioField::LowByte),
        Arch::Unknown | Arch::Zen | Arch::Zen2 => (TscMultiplierSource::None, RatioField::HalfStep),
        _ => (TscMultiplierSource::PlatformInfo, RatioField::SecondByte),
    };

    IntelFeatures {
        tsc_multiplier,
        ratio_field,
        rapl: has_rapl(arch),
        core_pmu: matches!(
            arch,
            Arch::SandyBridge | Arch::IvyBridge | Arch::Haswell | Arch::Skylake | Arch::KabyLake
        ),
        cache_pmcs: matches!(arch, Arch::Haswell | Arch::Skylake | Arch::KabyLake),
        client_imc: matches!(model, 0x5E | 0x3C),
        cbox: (model == 0x5E).then_some(CboxLayout::CLIENT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwtelem_raw::RegisterLayout;

    fn key(vendor: Vendor, family: u32, model: u32, stepping: u32, core_count: usize) -> CapabilityKey {
        CapabilityKey {
            vendor,
            family,
            model,
            stepping,
            core_count,
        }
    }

    fn intel_features_of(descriptor: &CapabilityDescriptor) -> IntelFeatures {
        match descriptor.features {
            VendorFeatures::Intel(features) => features,
            other => panic!("expected Intel features, got {other:?}"),
        }
    }

    #[test]
    fn test_core2_b2_ceiling_depends_on_core_count() {
        let ceiling = |cores| resolve(&key(Vendor::Intel, 6, 0x0F, 0x06, cores), "").ceiling;
        assert_eq!(ceiling(2), Fixed(90.0));
        assert_eq!(ceiling(4), Fixed(100.0));
        assert_eq!(ceiling(1), Fixed(95.0));

        let g0 = resolve(&key(Vendor::Intel, 6, 0x0F, 0x0B, 2), "");
        assert_eq!(g0.ceiling, Fixed(100.0));
        assert_eq!(g0.arch, Arch::Core);
        assert_eq!(resolve(&key(Vendor::Intel, 6, 0x0F, 0x01, 2), "").ceiling, Fixed(95.0));
    }

    #[test]
    fn test_atom_steppings() {
        assert_eq!(resolve(&key(Vendor::Intel, 6, 0x1C, 0x02, 1), "").ceiling, Fixed(90.0));
        assert_eq!(resolve(&key(Vendor::Intel, 6, 0x1C, 0x0A, 1), "").ceiling, Fixed(100.0));
        let atom = resolve(&key(Vendor::Intel, 6, 0x1C, 0x05, 1), "");
        assert_eq!(atom.ceiling, Fixed(90.0));
        assert_eq!(
            intel_features_of(&atom).tsc_multiplier,
            TscMultiplierSource::PerfStatusMax
        );
        assert!(!intel_features_of(&atom).rapl);
    }

    #[test]
    fn test_skylake_client() {
        let skylake = resolve(&key(Vendor::Intel, 6, 0x5E, 3, 4), "");
        assert_eq!(skylake.arch, Arch::Skylake);
        assert_eq!(skylake.ceiling, FromMsr);
        assert_eq!(skylake.energy_unit, EnergyUnit::Log2Scaled);

        let features = intel_features_of(&skylake);
        assert!(features.rapl && features.core_pmu && features.cache_pmcs);
        assert!(features.client_imc);
        assert_eq!(features.cbox, Some(CboxLayout::CLIENT));
        assert_eq!(features.ratio_field, RatioField::SecondByte);
        assert_eq!(features.tsc_multiplier, TscMultiplierSource::PlatformInfo);
    }

    #[test]
    fn test_optional_groups_by_generation() {
        let sandy = intel_features_of(&resolve(&key(Vendor::Intel, 6, 0x2A, 7, 4), ""));
        assert!(sandy.core_pmu && !sandy.cache_pmcs && !sandy.client_imc);

        let haswell = intel_features_of(&resolve(&key(Vendor::Intel, 6, 0x3C, 3, 4), ""));
        assert!(haswell.cache_pmcs && haswell.client_imc && haswell.cbox.is_none());

        let nehalem = resolve(&key(Vendor::Intel, 6, 0x1A, 5, 4), "");
        let features = intel_features_of(&nehalem);
        assert_eq!(features.ratio_field, RatioField::LowByte);
        assert!(!features.rapl && !features.core_pmu);
        assert_eq!(nehalem.energy_unit, EnergyUnit::None);

        let netburst = resolve(&key(Vendor::Intel, 0x0F, 0x04, 1, 1), "");
        assert_eq!(netburst.arch, Arch::NetBurst);
        assert_eq!(netburst.ceiling, Fixed(100.0));
    }

    #[test]
    fn test_energy_unit_rules() {
        let unit = RaplPowerUnit::from_msr_value(0x000A_0E03);
        let silvermont = resolve(&key(Vendor::Intel, 6, 0x37, 8, 4), "");
        assert_eq!(silvermont.energy_unit, EnergyUnit::MicroLog2Scaled);
        let joules = silvermont.energy_unit.joules(Some(unit)).unwrap();
        assert!((joules - 16384.0e-6).abs() < 1e-12);

        let kaby = resolve(&key(Vendor::Intel, 6, 0x9E, 9, 4), "");
        assert_eq!(kaby.energy_unit.joules(Some(unit)), Some(1.0 / 16384.0));
        assert_eq!(kaby.energy_unit.joules(None), None);
        assert!(kaby.energy_unit.needs_power_unit());

        assert_eq!(EnergyUnit::Fixed(15.3e-6).joules(None), Some(15.3e-6));
    }

    #[test]
    fn test_amd_schema() {
        let zen = resolve(
            &key(Vendor::Amd, 0x17, 0x01, 1, 8),
            "AMD Ryzen 7 1800X Eight-Core Processor",
        );
        assert_eq!(zen.arch, Arch::Zen);
        assert_eq!(zen.energy_unit, EnergyUnit::Fixed(15.3e-6));
        let VendorFeatures::Amd(features) = zen.features else {
            panic!("expected AMD features");
        };
        assert_eq!(features.tctl_offset, -20.0);
        assert!(!features.ccd_temperatures);
        assert_eq!(features.svi_planes, SviPlanes::for_model(0x01));

        let threadripper = resolve(
            &key(Vendor::Amd, 0x17, 0x31, 0, 24),
            "AMD Ryzen Threadripper 3960X 24-Core Processor",
        );
        assert_eq!(threadripper.arch, Arch::Zen2);
        let VendorFeatures::Amd(features) = threadripper.features else {
            panic!("expected AMD features");
        };
        assert_eq!(features.tctl_offset, 0.0);
        assert!(features.ccd_temperatures && features.soc_plane_always);

        let tr2 = resolve(
            &key(Vendor::Amd, 0x17, 0x08, 2, 16),
            "AMD Ryzen Threadripper 2950X 16-Core Processor",
        );
        let VendorFeatures::Amd(features) = tr2.features else {
            panic!("expected AMD features");
        };
        assert_eq!(features.tctl_offset, -27.0);
    }

    #[test]
    fn test_unknown_fallback() {
        for k in [
            key(Vendor::Intel, 6, 0xFF, 0, 4),
            key(Vendor::Amd, 0x19, 0x21, 0, 8),
            key(Vendor::Other, 6, 0x5E, 0, 4),
        ] {
            let descriptor = resolve(&k, "");
            assert_eq!(descriptor.arch, Arch::Unknown);
            assert_eq!(descriptor.ceiling, Fixed(100.0));
            assert_eq!(descriptor.energy_unit, EnergyUnit::None);
            assert_eq!(descriptor.features, VendorFeatures::Unknown);
        }
    }
}
