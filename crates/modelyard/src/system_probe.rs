//! Host hardware probing for the GPU-offload heuristic.
//!
//! VRAM is detected through NVML when the driver is present; on machines
//! without it the probe reports 0 MiB and backends run CPU-only.

use nvml_wrapper::Nvml;
use serde::Serialize;
use sysinfo::System;
use tracing::{info, warn};

/// Snapshot of the host the supervisor runs on.
#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub total_ram_gb: f64,
    pub cpu_cores: u32,
    pub vram_mb: u64,
    pub tier: &'static str,
    pub os: String,
}

/// Detected VRAM of the first GPU in MiB, or 0 when no GPU/driver is found.
pub fn detect_vram_mb() -> u64 {
    match Nvml::init() {
        Ok(nvml) => match nvml.device_by_index(0).and_then(|d| d.memory_info()) {
            Ok(memory) => {
                let vram_mb = memory.total / 1024 / 1024;
                info!("Detected GPU with {} MiB VRAM", vram_mb);
                vram_mb
            }
            Err(e) => {
                warn!("GPU present but VRAM query failed: {}. Running CPU-only.", e);
                0
            }
        },
        Err(_) => 0,
    }
}

/// GPU layers to offload for a given amount of VRAM. Advisory; consumed only
/// by the gguf backend.
pub fn gpu_layers_for_vram(vram_mb: u64) -> u32 {
    if vram_mb >= 6144 {
        40
    } else if vram_mb >= 4096 {
        28
    } else if vram_mb >= 2048 {
        16
    } else {
        0
    }
}

/// Performance tier from installed RAM, used by operator-facing reports.
fn tier_for_ram(ram_gb: f64) -> &'static str {
    if ram_gb < 6.0 {
        "entry_level"
    } else if ram_gb < 12.0 {
        "mid_range"
    } else if ram_gb < 24.0 {
        "good"
    } else if ram_gb < 48.0 {
        "high_end"
    } else {
        "enthusiast"
    }
}

pub fn detect_system_info() -> SystemInfo {
    let mut system = System::new_all();
    system.refresh_memory();

    let total_ram_gb = system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0;

    SystemInfo {
        total_ram_gb: (total_ram_gb * 100.0).round() / 100.0,
        cpu_cores: num_cpus::get() as u32,
        vram_mb: detect_vram_mb(),
        tier: tier_for_ram(total_ram_gb),
        os: format!(
            "{} {}",
            System::name().unwrap_or_else(|| "Unknown".into()),
            System::os_version().unwrap_or_default()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== GPU Layer Heuristic Tests =====

    #[test]
    fn test_gpu_layers_tiers() {
        assert_eq!(gpu_layers_for_vram(0), 0);
        assert_eq!(gpu_layers_for_vram(1024), 0);
        assert_eq!(gpu_layers_for_vram(2048), 16);
        assert_eq!(gpu_layers_for_vram(4095), 16);
        assert_eq!(gpu_layers_for_vram(4096), 28);
        assert_eq!(gpu_layers_for_vram(6143), 28);
        assert_eq!(gpu_layers_for_vram(6144), 40);
        assert_eq!(gpu_layers_for_vram(24576), 40);
    }

    // ===== RAM Tier Tests =====

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_for_ram(4.0), "entry_level");
        assert_eq!(tier_for_ram(8.0), "mid_range");
        assert_eq!(tier_for_ram(16.0), "good");
        assert_eq!(tier_for_ram(32.0), "high_end");
        assert_eq!(tier_for_ram(64.0), "enthusiast");
    }

    #[test]
    fn test_detect_system_info_is_populated() {
        let info = detect_system_info();
        assert!(info.total_ram_gb > 0.0);
        assert!(info.cpu_cores > 0);
        // vram_mb may legitimately be 0 on CPU-only hosts
        assert!(!info.tier.is_empty());
    }
}
