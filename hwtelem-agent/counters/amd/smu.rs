//! Package-level readings: energy MSR plus SMN temperature and SVI2 telemetry

use std::time::Instant;

use hwtelem_raw::arch::amd::power::msr as power_msr;
use hwtelem_raw::arch::amd::smu::{
    ccd_temperature, CcdTemperature, SviTelemetry, SviTfn, ThmTconCurTmp, CCD_COUNT, SMN_DATA,
    SMN_INDEX, SVI_TFN, THM_TCON_CUR_TMP,
};
use hwtelem_raw::RegisterLayout;

use crate::access::{AffinityScope, RegisterAccess, RegisterAccessExt};
use crate::capability::AmdFeatures;
use crate::counters::LogOnError;
use crate::error::Result;
use crate::metrics::{decode, EnergyTracker};
use crate::sink::{SensorFactory, SensorHandle, SensorKind, TelemetrySink};

/// Read a system management network register through the host bridge
/// index/data pair
pub fn read_smn<A: RegisterAccess + ?Sized>(access: &A, address: u32) -> Result<u32> {
    let root = access.pci_address(0, 0, 0);
    access.write_pci_config(root, SMN_INDEX, address)?;
    access.read_pci_config(root, SMN_DATA)
}

#[derive(Debug)]
enum ControlTemperature {
    /// Tdie = Tctl + offset
    Split {
        tctl: SensorHandle,
        tdie: SensorHandle,
        offset: f64,
    },
    Combined(SensorHandle),
}

#[derive(Debug, Default)]
struct CcdSensors {
    sensors: [Option<SensorHandle>; CCD_COUNT],
    values: [Option<f64>; CCD_COUNT],
    max: Option<SensorHandle>,
    average: Option<SensorHandle>,
}

#[derive(Debug)]
pub struct PackageMonitor {
    thread: u32,
    features: AmdFeatures,
    energy_unit: f64,
    energy: EnergyTracker,
    power: SensorHandle,
    temperature: ControlTemperature,
    ccds: Option<CcdSensors>,
    core_voltage: Option<SensorHandle>,
    soc_voltage: Option<SensorHandle>,
}

impl PackageMonitor {
    pub fn new<S: TelemetrySink>(
        thread: u32,
        features: AmdFeatures,
        energy_unit: f64,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) -> Self {
        let power = factory.create_active(sink, "Package Power", SensorKind::Power);
        let temperature = if features.tctl_offset != 0.0 {
            ControlTemperature::Split {
                tctl: factory.create_active(sink, "Core (Tctl)", SensorKind::Temperature),
                tdie: factory.create_active(sink, "Core (Tdie)", SensorKind::Temperature),
                offset: features.tctl_offset,
            }
        } else {
            ControlTemperature::Combined(factory.create_active(
                sink,
                "Core (Tctl/Tdie)",
                SensorKind::Temperature,
            ))
        };

        Self {
            thread,
            features,
            energy_unit,
            energy: EnergyTracker::new(power_msr::PKG_ENERGY.width),
            power,
            temperature,
            ccds: features.ccd_temperatures.then(CcdSensors::default),
            core_voltage: None,
            soc_voltage: None,
        }
    }

    pub fn sample<A: RegisterAccess, S: TelemetrySink>(
        &mut self,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
        now: Instant,
    ) {
        let _pin = AffinityScope::enter(access, self.thread)
            .or_debug(format_args!("pinning to thread {}", self.thread));

        if let Some(raw) = access
            .read_counter(power_msr::PKG_ENERGY, self.thread)
            .or_debug("package energy")
        {
            if let Some(interval) = self.energy.advance(raw, now) {
                sink.set_value(
                    self.power,
                    Some(decode::power(interval.delta, self.energy_unit, interval.elapsed)),
                );
            }
        }

        self.sample_temperature(access, sink);
        if let Some(ccds) = &mut self.ccds {
            ccds.sample(access, sink, factory);
        }
        self.sample_voltages(access, sink, factory);
    }

    fn sample_temperature<A: RegisterAccess, S: TelemetrySink>(&self, access: &A, sink: &mut S) {
        let Some(raw) = read_smn(access, THM_TCON_CUR_TMP).or_debug("THM_TCON_CUR_TMP") else {
            return;
        };
        let reading = ThmTconCurTmp::from_msr_value(raw as u64);
        let t = decode::control_temperature(reading.current_temp, reading.range_select);

        match self.temperature {
            ControlTemperature::Split { tctl, tdie, offset } => {
                sink.set_value(tctl, Some(t));
                sink.set_value(tdie, Some(t + offset));
            }
            ControlTemperature::Combined(handle) => sink.set_value(handle, Some(t)),
        }
    }

    fn sample_voltages<A: RegisterAccess, S: TelemetrySink>(
        &mut self,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) {
        let Some(tfn) = read_smn(access, SVI_TFN).or_debug("SVI TFN") else {
            return;
        };
        let tfn = SviTfn::from_msr_value(tfn as u64);
        let planes = self.features.svi_planes;

        if !tfn.core_plane_disabled {
            sample_plane(access, sink, factory, &mut self.core_voltage, planes.core, "Core (SVI2 TFN)");
        }
        if self.features.soc_plane_always || !tfn.soc_plane_disabled {
            sample_plane(access, sink, factory, &mut self.soc_voltage, planes.soc, "SoC (SVI2 TFN)");
        }
    }
}

fn sample_plane<A: RegisterAccess, S: TelemetrySink>(
    access: &A,
    sink: &mut S,
    factory: &mut SensorFactory,
    sensor: &mut Option<SensorHandle>,
    address: u32,
    name: &'static str,
) {
    let Some(raw) = read_smn(access, address).or_debug(name) else {
        return;
    };
    let code = SviTelemetry::from_msr_value(raw as u64).vdd_code;
    let handle = *sensor.get_or_insert_with(|| factory.create_active(sink, name, SensorKind::Voltage));
    sink.set_value(handle, Some(decode::svi_voltage(code)));
}

impl CcdSensors {
    fn sample<A: RegisterAccess, S: TelemetrySink>(
        &mut self,
        access: &A,
        sink: &mut S,
        factory: &mut SensorFactory,
    ) {
        for i in 0..CCD_COUNT {
            let Some(raw) = read_smn(access, ccd_temperature(i))
                .or_debug(format_args!("CCD{} temperature", i + 1))
            else {
                continue;
            };
            let Some(celsius) = CcdTemperature::from_msr_value(raw as u64).celsius() else {
                continue;
            };
            let handle = *self.sensors[i].get_or_insert_with(|| {
                factory.create_active(sink, format!("Core CCD{} (Tdie)", i + 1), SensorKind::Temperature)
            });
            self.values[i] = Some(celsius);
            sink.set_value(handle, Some(celsius));
        }

        let active: Vec<f64> = self.values.iter().flatten().copied().collect();
        if active.len() < 2 {
            return;
        }
        let max = *self.max.get_or_insert_with(|| {
            factory.create_active(sink, "Core CCDs Max (Tdie)", SensorKind::Temperature)
        });
        let average = *self.average.get_or_insert_with(|| {
            factory.create_active(sink, "Core CCDs Average (Tdie)", SensorKind::Temperature)
        });
        sink.set_value(max, Some(active.iter().copied().fold(f64::MIN, f64::max)));
        sink.set_value(average, Some(active.iter().sum::<f64>() / active.len() as f64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::RecordingSink;
    use crate::testing::FakeAccess;
    use hwtelem_raw::arch::amd::smu::SviPlanes;

    fn features(model: u32, tctl_offset: f64) -> AmdFeatures {
        let zen2 = matches!(model, 0x31 | 0x71);
        AmdFeatures {
            svi_planes: SviPlanes::for_model(model),
            ccd_temperatures: zen2,
            soc_plane_always: zen2,
            tctl_offset,
        }
    }

    fn monitor(features: AmdFeatures, sink: &mut RecordingSink) -> PackageMonitor {
        let mut factory = SensorFactory::new("cpu/0");
        PackageMonitor::new(0, features, 15.3e-6, sink, &mut factory)
    }

    #[test]
    fn test_tctl_and_tdie_with_offset() {
        let access = FakeAccess::new();
        // 400 * 0.125 = 50 °C
        access.set_smn(THM_TCON_CUR_TMP, 400 << 21);
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut package = PackageMonitor::new(0, features(0x08, -20.0), 15.3e-6, &mut sink, &mut factory);

        package.sample(&access, &mut sink, &mut factory, Instant::now());

        assert_eq!(sink.value("Core (Tctl)", SensorKind::Temperature), Some(50.0));
        assert_eq!(sink.value("Core (Tdie)", SensorKind::Temperature), Some(30.0));
        assert!(sink.find("Core (Tctl/Tdie)", SensorKind::Temperature).is_none());
    }

    #[test]
    fn test_combined_temperature_with_range_offset() {
        let access = FakeAccess::new();
        access.set_smn(THM_TCON_CUR_TMP, (800 << 21) | (1 << 19));
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut package = PackageMonitor::new(0, features(0x71, 0.0), 15.3e-6, &mut sink, &mut factory);

        package.sample(&access, &mut sink, &mut factory, Instant::now());

        assert_eq!(sink.value("Core (Tctl/Tdie)", SensorKind::Temperature), Some(51.0));
        assert!(sink.find("Core (Tctl)", SensorKind::Temperature).is_none());
    }

    #[test]
    fn test_ccd_sensors_created_lazily() {
        let access = FakeAccess::new();
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut package = PackageMonitor::new(0, features(0x71, 0.0), 15.3e-6, &mut sink, &mut factory);

        package.sample(&access, &mut sink, &mut factory, Instant::now());
        assert!(sink.find("Core CCD1 (Tdie)", SensorKind::Temperature).is_none());

        access.set_smn(ccd_temperature(0), 2840);
        package.sample(&access, &mut sink, &mut factory, Instant::now());
        assert_eq!(sink.value("Core CCD1 (Tdie)", SensorKind::Temperature), Some(50.0));
        assert!(sink.find("Core CCDs Max (Tdie)", SensorKind::Temperature).is_none());

        // 2920 * 0.125 - 305 = 60
        access.set_smn(ccd_temperature(1), 2920);
        package.sample(&access, &mut sink, &mut factory, Instant::now());
        assert_eq!(sink.value("Core CCD2 (Tdie)", SensorKind::Temperature), Some(60.0));
        assert_eq!(sink.value("Core CCDs Max (Tdie)", SensorKind::Temperature), Some(60.0));
        assert_eq!(sink.value("Core CCDs Average (Tdie)", SensorKind::Temperature), Some(55.0));
    }

    #[test]
    fn test_svi_planes_gated_by_tfn() {
        let access = FakeAccess::new();
        let planes = SviPlanes::for_model(0x08);
        access.set_smn(SVI_TFN, 0x2);
        access.set_smn(planes.core, 0x48 << 16);
        access.set_smn(planes.soc, 0x50 << 16);

        let mut sink = RecordingSink::new();
        let mut package = monitor(features(0x08, 0.0), &mut sink);
        let mut factory = SensorFactory::new("cpu/1");
        package.sample(&access, &mut sink, &mut factory, Instant::now());

        let core = sink.value("Core (SVI2 TFN)", SensorKind::Voltage).unwrap();
        assert!((core - (1.550 - 0.00625 * 72.0)).abs() < 1e-12);
        assert!(sink.find("SoC (SVI2 TFN)", SensorKind::Voltage).is_none());
    }

    #[test]
    fn test_soc_plane_always_read_on_zen2() {
        let access = FakeAccess::new();
        access.set_smn(SVI_TFN, 0x3);
        let mut sink = RecordingSink::new();
        let mut package = monitor(features(0x71, 0.0), &mut sink);
        let mut factory = SensorFactory::new("cpu/1");
        package.sample(&access, &mut sink, &mut factory, Instant::now());

        assert!(sink.find("Core (SVI2 TFN)", SensorKind::Voltage).is_none());
        assert_eq!(sink.value("SoC (SVI2 TFN)", SensorKind::Voltage), Some(1.550));
    }

    #[test]
    fn test_failed_smn_read_keeps_previous_value() {
        let access = FakeAccess::new();
        access.set_smn(THM_TCON_CUR_TMP, 400 << 21);
        let mut sink = RecordingSink::new();
        let mut factory = SensorFactory::new("cpu/0");
        let mut package = PackageMonitor::new(0, features(0x08, 0.0), 15.3e-6, &mut sink, &mut factory);
        package.sample(&access, &mut sink, &mut factory, Instant::now());

        access.set_smn(THM_TCON_CUR_TMP, 480 << 21);
        access.fail_smn(THM_TCON_CUR_TMP);
        package.sample(&access, &mut sink, &mut factory, Instant::now());

        assert_eq!(sink.value("Core (Tctl/Tdie)", SensorKind::Temperature), Some(50.0));
    }
}
