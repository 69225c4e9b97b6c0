use std::time::{Duration, Instant};

use crate::access::ThreadMask;
use crate::common::affinity::swap_affinity;
use crate::config::AgentConfig;
use crate::error::{HwtelemError, Result};
use crate::topology::{IdentificationFlags, IdentificationRecord, Vendor};

#[cfg(target_arch = "x86_64")]
pub fn cpuid(eax: u32, ecx: u32) -> (u32, u32, u32, u32) {
    let mut ebx: u32;
    let mut edx: u32;
    let mut eax_out = eax;
    let mut ecx_out = ecx;

    unsafe {
        std::arch::asm!(
            "mov {0:r}, rbx",
            "cpuid",
            "xchg {0:r}, rbx",
            out(reg) ebx,
            inout("eax") eax_out,
            inout("ecx") ecx_out,
            out("edx") edx,
            options(nostack, preserves_flags)
        );
    }

    (eax_out, ebx, ecx_out, edx)
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cpuid(_eax: u32, _ecx: u32) -> (u32, u32, u32, u32) {
    (0, 0, 0, 0)
}

fn register_bytes(registers: &[u32]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_le_bytes()).collect()
}

/// Vendor signature from leaf 0, in EBX EDX ECX order
pub fn vendor_signature(ebx: u32, edx: u32, ecx: u32) -> String {
    String::from_utf8_lossy(&register_bytes(&[ebx, edx, ecx])).into_owned()
}

/// (family, model, stepping) with the extended fields applied
pub fn decode_signature(eax: u32) -> (u32, u32, u32) {
    let stepping = eax & 0x0F;
    let base_family = (eax >> 8) & 0x0F;
    let base_model = (eax >> 4) & 0x0F;
    let extended_model = (eax >> 16) & 0x0F;
    let extended_family = (eax >> 20) & 0xFF;

    let family = if base_family == 0x0F {
        base_family + extended_family
    } else {
        base_family
    };
    let model = if base_family == 0x06 || base_family == 0x0F {
        base_model | (extended_model << 4)
    } else {
        base_model
    };
    (family, model, stepping)
}

fn brand_string() -> String {
    let (max_extended, _, _, _) = cpuid(0x8000_0000, 0);
    if max_extended < 0x8000_0004 {
        return String::new();
    }

    let registers: Vec<u32> = (0..3)
        .flat_map(|i| {
            let (a, b, c, d) = cpuid(0x8000_0002 + i, 0);
            [a, b, c, d]
        })
        .collect();
    String::from_utf8_lossy(&register_bytes(&registers))
        .trim_matches(char::from(0))
        .trim()
        .to_string()
}

/// Raw (node id, core id) of the calling thread
fn raw_location(vendor: Vendor, max_leaf: u32, apic_id: u32) -> (u32, u32) {
    match vendor {
        Vendor::Amd => {
            let (_, ebx, ecx, _) = cpuid(0x8000_001E, 0);
            (ecx & 0xFF, ebx & 0xFF)
        }
        _ if max_leaf >= 0x0B => {
            let (eax, _, _, edx) = cpuid(0x0B, 0);
            (0, edx >> (eax & 0x1F))
        }
        _ => (0, apic_id),
    }
}

/// Identification record of the logical thread the caller runs on
pub fn identify_current(thread: u32) -> IdentificationRecord {
    let (max_leaf, ebx, ecx, edx) = cpuid(0, 0);
    let vendor = Vendor::from_signature(&vendor_signature(ebx, edx, ecx));

    let (signature, ebx1, _, edx1) = cpuid(1, 0);
    let (family, model, stepping) = decode_signature(signature);
    let (thermal, _, _, _) = if max_leaf >= 6 { cpuid(6, 0) } else { (0, 0, 0, 0) };
    let (node_id, core_id) = raw_location(vendor, max_leaf, ebx1 >> 24);

    IdentificationRecord {
        thread,
        vendor,
        family,
        model,
        stepping,
        brand: brand_string(),
        node_id,
        core_id,
        flags: IdentificationFlags {
            thermal_sensor: thermal & 0x01 != 0,
            package_thermal_sensor: thermal & 0x40 != 0,
            time_stamp_counter: edx1 & 0x10 != 0,
        },
    }
}

/// Run the identification leaves on every online logical thread
pub fn identify_online_threads() -> Result<Vec<IdentificationRecord>> {
    let mut records = Vec::new();
    for thread in AgentConfig::detect_online_cpus() {
        let previous = match swap_affinity(&ThreadMask::for_thread(thread)) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Skipping thread {thread}: {e}");
                continue;
            }
        };
        records.push(identify_current(thread));
        swap_affinity(&previous)?;
    }

    if records.is_empty() {
        return Err(HwtelemError::TopologyError(
            "no online thread could be identified".to_string(),
        ));
    }
    tracing::info!("Identified {} logical threads", records.len());
    Ok(records)
}

#[cfg(target_arch = "x86_64")]
fn read_tsc() -> u64 {
    // SAFETY: RDTSC is available on every x86_64 processor
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_tsc() -> u64 {
    0
}

/// Time stamp counter frequency in MHz, measured over `window`
pub fn estimate_tsc_mhz(window: Duration) -> Option<f64> {
    let start = Instant::now();
    let begin = read_tsc();
    std::thread::sleep(window);
    let ticks = read_tsc().wrapping_sub(begin);
    let elapsed = start.elapsed().as_secs_f64();

    let mhz = ticks as f64 / elapsed / 1e6;
    (mhz.is_finite() && mhz > 0.0).then_some(mhz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_signature() {
        // "GenuineIntel" as returned in EBX, EDX, ECX
        assert_eq!(
            vendor_signature(0x756E_6547, 0x4965_6E69, 0x6C65_746E),
            "GenuineIntel"
        );
    }

    #[test]
    fn test_decode_signature() {
        // Skylake client, stepping 3
        assert_eq!(decode_signature(0x0005_06E3), (0x06, 0x5E, 3));
        // Zen 2 (Matisse): family 0xF + 0x8
        assert_eq!(decode_signature(0x0087_0F10), (0x17, 0x71, 0));
        // NetBurst keeps the base family plus zero extension
        assert_eq!(decode_signature(0x0000_0F41), (0x0F, 0x04, 1));
    }
}
