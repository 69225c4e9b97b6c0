//! Node → Core → Thread hierarchy built from per-thread identification
//!
//! Raw core ids are often sparse (Intel APIC ids skip odd values, AMD ids
//! skip disabled cores), so cores receive sequential ids starting at 1 in
//! ascending raw-id order.

use crate::error::{HwtelemError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Intel,
    Amd,
    Other,
}

impl Vendor {
    pub fn from_signature(signature: &str) -> Self {
        match signature {
            "GenuineIntel" => Vendor::Intel,
            "AuthenticAMD" => Vendor::Amd,
            _ => Vendor::Other,
        }
    }
}

/// Capability bits reported by the identification leaves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentificationFlags {
    pub thermal_sensor: bool,
    pub package_thermal_sensor: bool,
    pub time_stamp_counter: bool,
}

/// Already-parsed identification data of one logical thread
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationRecord {
    /// Thread-affinity identifier
    pub thread: u32,
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub brand: String,
    pub node_id: u32,
    pub core_id: u32,
    pub flags: IdentificationFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    pub id: u32,
    pub raw_node_id: u32,
    pub raw_core_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Core {
    /// Sequential id, starting at 1
    pub id: u32,
    pub threads: Vec<Thread>,
}

impl Core {
    /// Thread used to target core-scoped registers
    pub fn first_thread(&self) -> &Thread {
        &self.threads[0]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u32,
    pub cores: Vec<Core>,
}

/// Identity shared by every thread of the package
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorIdentity {
    pub vendor: Vendor,
    pub family: u32,
    pub model: u32,
    pub stepping: u32,
    pub brand: String,
    pub flags: IdentificationFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Processor {
    identity: ProcessorIdentity,
    nodes: Vec<Node>,
}

impl Processor {
    /// Group identification records into nodes and sequentially numbered cores
    pub fn build(mut records: Vec<IdentificationRecord>) -> Result<Self> {
        let first = records
            .first()
            .ok_or_else(|| HwtelemError::TopologyError("no identification records".to_string()))?;
        let identity = ProcessorIdentity {
            vendor: first.vendor,
            family: first.family,
            model: first.model,
            stepping: first.stepping,
            brand: first.brand.clone(),
            flags: first.flags,
        };

        // sort_by_key is stable, siblings keep their input order
        records.sort_by_key(|r| r.core_id);

        let mut nodes: Vec<Node> = Vec::new();
        let mut last_raw_core: Option<u32> = None;
        let mut sequential = 0u32;

        for record in records {
            if last_raw_core != Some(record.core_id) {
                sequential += 1;
                last_raw_core = Some(record.core_id);
            }

            let thread = Thread {
                id: record.thread,
                raw_node_id: record.node_id,
                raw_core_id: record.core_id,
            };

            let node = match nodes.iter().position(|n| n.id == record.node_id) {
                Some(i) => &mut nodes[i],
                None => {
                    nodes.push(Node {
                        id: record.node_id,
                        cores: Vec::new(),
                    });
                    let last = nodes.len() - 1;
                    &mut nodes[last]
                }
            };

            match node.cores.iter_mut().find(|c| c.id == sequential) {
                Some(core) => core.threads.push(thread),
                None => node.cores.push(Core {
                    id: sequential,
                    threads: vec![thread],
                }),
            }
        }

        tracing::debug!(
            "Built topology: {} nodes, {} cores",
            nodes.len(),
            nodes.iter().map(|n| n.cores.len()).sum::<usize>()
        );

        Ok(Self { identity, nodes })
    }

    pub fn identity(&self) -> &ProcessorIdentity {
        &self.identity
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn cores(&self) -> impl Iterator<Item = &Core> {
        self.nodes.iter().flat_map(|n| n.cores.iter())
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.cores().flat_map(|c| c.threads.iter())
    }

    pub fn core_count(&self) -> usize {
        self.nodes.iter().map(|n| n.cores.len()).sum()
    }

    pub fn thread_count(&self) -> usize {
        self.cores().map(|c| c.threads.len()).sum()
    }

    /// Thread used to target package-scoped registers
    pub fn first_thread(&self) -> Option<&Thread> {
        self.threads().next()
    }

    pub fn has_thread(&self, id: u32) -> bool {
        self.threads().any(|t| t.id == id)
    }
}
