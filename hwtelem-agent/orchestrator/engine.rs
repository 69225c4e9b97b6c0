//! Telemetry engine: topology, capabilities and one vendor backend
//!
//! Construction builds the topology, resolves the capability descriptor,
//! programs counters and takes a priming sample. After that the engine only
//! moves when the caller asks it to sample.

use std::time::Instant;

use crate::access::RegisterAccess;
use crate::capability::{resolve, CapabilityDescriptor, CapabilityKey};
use crate::config::EngineConfig;
use crate::counters::{Backend, Pass, Setup};
use crate::error::Result;
use crate::metrics::IntervalClock;
use crate::sink::{SensorFactory, TelemetrySink};
use crate::topology::{IdentificationRecord, Processor};

pub struct TelemetryEngine<A: RegisterAccess, S: TelemetrySink> {
    access: A,
    sink: S,
    processor: Processor,
    capability: CapabilityDescriptor,
    backend: Backend,
    factory: SensorFactory,
    clock: IntervalClock,
}

impl<A: RegisterAccess, S: TelemetrySink> TelemetryEngine<A, S> {
    pub fn new(access: A, sink: S, records: Vec<IdentificationRecord>, config: &EngineConfig) -> Result<Self> {
        Self::new_at(access, sink, records, config, Instant::now())
    }

    /// Build the engine as if constructed at `now`
    pub fn new_at(
        access: A,
        mut sink: S,
        records: Vec<IdentificationRecord>,
        config: &EngineConfig,
        now: Instant,
    ) -> Result<Self> {
        let processor = Processor::build(records)?;
        let capability = resolve(&CapabilityKey::of(&processor), &processor.identity().brand);
        let mut factory = SensorFactory::new(config.owner.clone());

        let backend = {
            let mut setup = Setup {
                processor: &processor,
                config,
                access: &access,
                sink: &mut sink,
                factory: &mut factory,
                now,
            };
            Backend::initialize(&capability, &mut setup)
        };

        tracing::info!(
            "Telemetry engine ready: {} {}, {} cores, {} threads",
            capability.arch.name(),
            processor.identity().brand,
            processor.core_count(),
            processor.thread_count()
        );

        let mut engine = Self {
            access,
            sink,
            processor,
            capability,
            backend,
            factory,
            clock: IntervalClock::default(),
        };
        engine.sample_at(now);
        Ok(engine)
    }

    pub fn sample(&mut self) {
        self.sample_at(Instant::now());
    }

    /// One sampling pass at `now`; failures stay local to the sensors they
    /// affect
    pub fn sample_at(&mut self, now: Instant) {
        let tick = self.clock.tick(now);
        let mut pass = Pass {
            processor: &self.processor,
            access: &self.access,
            sink: &mut self.sink,
            factory: &mut self.factory,
            tick,
            now,
        };
        self.backend.sample(&mut pass);
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn capability(&self) -> &CapabilityDescriptor {
        &self.capability
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn access(&self) -> &A {
        &self.access
    }
}
