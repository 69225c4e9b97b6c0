use prometheus::{Gauge, Opts, Registry};
use std::collections::HashMap;

use crate::config::ParameterKey;
use crate::error::Result;
use crate::sink::{SensorHandle, SensorSpec, TelemetrySink};

const METRIC_NAME: &str = "hwtelem_sensor";
const METRIC_HELP: &str = "Calibrated hardware sensor value";

struct SensorGauge {
    spec: SensorSpec,
    gauge: Option<Gauge>,
    active: bool,
    registered: bool,
}

/// Telemetry sink exporting one gauge per sensor
///
/// A gauge is registered on the first value of an active sensor and
/// unregistered again when the value becomes unavailable, so scrapes never
/// see a stale reading.
pub struct PrometheusSink {
    registry: Registry,
    sensors: Vec<SensorGauge>,
    overrides: HashMap<ParameterKey, f64>,
}

impl PrometheusSink {
    pub fn new(registry: Registry, overrides: HashMap<ParameterKey, f64>) -> Self {
        Self {
            registry,
            sensors: Vec::new(),
            overrides,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn gauge(spec: &SensorSpec) -> Result<Gauge> {
        let opts = Opts::new(METRIC_NAME, METRIC_HELP)
            .const_label("sensor", spec.name.clone())
            .const_label("kind", spec.kind.name())
            .const_label("index", spec.index.to_string())
            .const_label("owner", spec.owner.clone());
        Ok(Gauge::with_opts(opts)?)
    }

    fn register(&mut self, handle: SensorHandle) {
        let Some(sensor) = self.sensors.get_mut(handle.0) else {
            return;
        };
        let Some(gauge) = &sensor.gauge else {
            return;
        };
        if sensor.registered {
            return;
        }
        match self.registry.register(Box::new(gauge.clone())) {
            Ok(()) => sensor.registered = true,
            Err(e) => tracing::warn!("Failed to register gauge for '{}': {e}", sensor.spec.name),
        }
    }

    fn unregister(&mut self, handle: SensorHandle) {
        let Some(sensor) = self.sensors.get_mut(handle.0) else {
            return;
        };
        let (Some(gauge), true) = (&sensor.gauge, sensor.registered) else {
            return;
        };
        if let Err(e) = self.registry.unregister(Box::new(gauge.clone())) {
            tracing::debug!("Failed to unregister gauge for '{}': {e}", sensor.spec.name);
        }
        sensor.registered = false;
    }
}

impl TelemetrySink for PrometheusSink {
    fn create_sensor(&mut self, spec: SensorSpec) -> SensorHandle {
        let gauge = Self::gauge(&spec)
            .map_err(|e| tracing::warn!("Sensor '{}' will not be exported: {e}", spec.name))
            .ok();
        self.sensors.push(SensorGauge {
            spec,
            gauge,
            active: false,
            registered: false,
        });
        SensorHandle(self.sensors.len() - 1)
    }

    fn activate_sensor(&mut self, handle: SensorHandle) {
        if let Some(sensor) = self.sensors.get_mut(handle.0) {
            sensor.active = true;
        }
    }

    fn set_value(&mut self, handle: SensorHandle, value: Option<f64>) {
        let Some(sensor) = self.sensors.get(handle.0) else {
            return;
        };
        if !sensor.active {
            return;
        }
        match value {
            Some(value) => {
                if let Some(gauge) = &sensor.gauge {
                    gauge.set(value);
                }
                self.register(handle);
            }
            None => self.unregister(handle),
        }
    }

    fn parameter(&self, handle: SensorHandle, position: usize) -> Option<f64> {
        let sensor = self.sensors.get(handle.0)?;
        let default = sensor.spec.parameters.get(position)?.default;
        Some(
            self.overrides
                .get(&(sensor.spec.name.clone(), position))
                .copied()
                .unwrap_or(default),
        )
    }
}
