//! Telemetry sink contract
//!
//! The engine describes every metric it publishes as a sensor: a name, a
//! per-kind index, a kind and optional user-tunable parameters. Sinks store
//! values; the engine never reads values back, only parameters.

use std::collections::HashMap;

metric_enum! {
    pub enum SensorKind {
        Voltage => "voltage",
        Clock => "clock",
        Temperature => "temperature",
        Power => "power",
        Factor => "factor",
        Counter => "counter",
        CounterRatio => "counter_ratio",
        Level => "level",
        Throughput => "throughput",
    }
}

/// Opaque reference to a sensor created in a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorHandle(pub usize);

/// User-tunable input to a sensor's decode formula
#[derive(Debug, Clone, PartialEq)]
pub struct SensorParameter {
    pub name: &'static str,
    pub description: &'static str,
    pub default: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub name: String,
    pub index: usize,
    pub kind: SensorKind,
    pub owner: String,
    pub parameters: Vec<SensorParameter>,
}

pub trait TelemetrySink {
    fn create_sensor(&mut self, spec: SensorSpec) -> SensorHandle;

    /// Make a sensor visible to consumers
    fn activate_sensor(&mut self, handle: SensorHandle);

    /// `None` marks the value as unavailable, which is distinct from zero
    fn set_value(&mut self, handle: SensorHandle, value: Option<f64>);

    /// Current value of parameter `position`, defaults applied
    fn parameter(&self, handle: SensorHandle, position: usize) -> Option<f64>;
}

/// Hands out sensor indices, monotonically per kind and never reused
#[derive(Debug, Default)]
pub struct SensorIndexAllocator {
    next: HashMap<SensorKind, usize>,
}

impl SensorIndexAllocator {
    pub fn allocate(&mut self, kind: SensorKind) -> usize {
        let next = self.next.entry(kind).or_insert(0);
        let index = *next;
        *next += 1;
        index
    }
}

/// Creates sensors with allocated indices and a fixed owner
#[derive(Debug)]
pub struct SensorFactory {
    owner: String,
    indices: SensorIndexAllocator,
}

impl SensorFactory {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            indices: SensorIndexAllocator::default(),
        }
    }

    pub fn create<S: TelemetrySink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: impl Into<String>,
        kind: SensorKind,
    ) -> SensorHandle {
        self.create_with_parameters(sink, name, kind, Vec::new())
    }

    pub fn create_with_parameters<S: TelemetrySink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: impl Into<String>,
        kind: SensorKind,
        parameters: Vec<SensorParameter>,
    ) -> SensorHandle {
        let spec = SensorSpec {
            name: name.into(),
            index: self.indices.allocate(kind),
            kind,
            owner: self.owner.clone(),
            parameters,
        };
        tracing::debug!("Creating {} sensor '{}' #{}", kind.name(), spec.name, spec.index);
        sink.create_sensor(spec)
    }

    /// Create and immediately activate
    pub fn create_active<S: TelemetrySink + ?Sized>(
        &mut self,
        sink: &mut S,
        name: impl Into<String>,
        kind: SensorKind,
    ) -> SensorHandle {
        let handle = self.create(sink, name, kind);
        sink.activate_sensor(handle);
        handle
    }
}

/// A sensor as stored by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSensor {
    pub spec: SensorSpec,
    pub active: bool,
    pub value: Option<f64>,
    pub updates: usize,
}

/// Sink that keeps everything in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    sensors: Vec<RecordedSensor>,
    overrides: HashMap<(String, usize), f64>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<(String, usize), f64>) -> Self {
        Self {
            sensors: Vec::new(),
            overrides,
        }
    }

    pub fn sensors(&self) -> &[RecordedSensor] {
        &self.sensors
    }

    pub fn find(&self, name: &str, kind: SensorKind) -> Option<&RecordedSensor> {
        self.sensors
            .iter()
            .find(|s| s.spec.name == name && s.spec.kind == kind)
    }

    /// Value of an active sensor
    pub fn value(&self, name: &str, kind: SensorKind) -> Option<f64> {
        self.find(name, kind).filter(|s| s.active).and_then(|s| s.value)
    }
}

impl TelemetrySink for RecordingSink {
    fn create_sensor(&mut self, spec: SensorSpec) -> SensorHandle {
        self.sensors.push(RecordedSensor {
            spec,
            active: false,
            value: None,
            updates: 0,
        });
        SensorHandle(self.sensors.len() - 1)
    }

    fn activate_sensor(&mut self, handle: SensorHandle) {
        if let Some(sensor) = self.sensors.get_mut(handle.0) {
            sensor.active = true;
        }
    }

    fn set_value(&mut self, handle: SensorHandle, value: Option<f64>) {
        if let Some(sensor) = self.sensors.get_mut(handle.0) {
            sensor.value = value;
            sensor.updates += 1;
        }
    }

    fn parameter(&self, handle: SensorHandle, position: usize) -> Option<f64> {
        let sensor = self.sensors.get(handle.0)?;
        self.overrides
            .get(&(sensor.spec.name.clone(), position))
            .copied()
            .or_else(|| sensor.spec.parameters.get(position).map(|p| p.default))
    }
}
