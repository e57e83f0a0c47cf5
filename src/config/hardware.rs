use crate::config::settings::{HardwareInfo, PerformanceProfile, StreamingSettings};
use sysinfo::System;

/// Detect memory and CPU capabilities
pub fn detect_hardware() -> anyhow::Result<HardwareInfo> {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let total_memory_gb = (system.total_memory() / (1024 * 1024 * 1024)) as u32;
    let cpu_cores = system.cpus().len() as u32;
    if cpu_cores == 0 {
        anyhow::bail!("Failed to read CPU information");
    }

    Ok(HardwareInfo {
        total_memory_gb,
        graphics_memory_mb: estimate_graphics_memory(total_memory_gb),
        cpu_cores,
        is_integrated_gpu: false,
    })
}

/// Without a GPU adapter to ask, scale the texture budget with system memory
fn estimate_graphics_memory(total_memory_gb: u32) -> u32 {
    match total_memory_gb {
        0..=3 => 512,
        4..=7 => 1024,
        8..=15 => 2048,
        _ => 4096,
    }
}

/// Recommend performance profile based on hardware capabilities
pub fn recommend_profile(hardware: &HardwareInfo) -> PerformanceProfile {
    // Low-end hardware detection
    if hardware.total_memory_gb < 4
        || hardware.is_integrated_gpu
        || hardware.cpu_cores < 4
        || hardware.graphics_memory_mb < 512
    {
        return PerformanceProfile::Low;
    }

    // High-end hardware detection
    if hardware.total_memory_gb >= 16
        && !hardware.is_integrated_gpu
        && hardware.cpu_cores >= 8
        && hardware.graphics_memory_mb >= 4096
    {
        return PerformanceProfile::High;
    }

    PerformanceProfile::Balanced
}

/// Load saved streaming settings, or detect hardware and save a recommendation
pub fn initialize_streaming_settings() -> anyhow::Result<StreamingSettings> {
    if let Some(settings) = crate::config::settings::load_streaming_settings() {
        tracing::info!("Loaded existing streaming settings: {:?}", settings.profile);
        return Ok(settings);
    }

    tracing::info!("No existing streaming settings found, detecting hardware...");
    let hardware = detect_hardware()?;

    tracing::info!("Hardware detected:");
    tracing::info!("  Estimated texture memory: {}MB", hardware.graphics_memory_mb);
    tracing::info!("  System Memory: {}GB", hardware.total_memory_gb);
    tracing::info!("  CPU Cores: {}", hardware.cpu_cores);

    let recommended_profile = recommend_profile(&hardware);
    tracing::info!("Recommended performance profile: {:?}", recommended_profile);

    let settings = StreamingSettings::for_profile(recommended_profile, &hardware);

    if let Err(e) = crate::config::settings::save_streaming_settings(&settings) {
        tracing::warn!("Failed to save streaming settings: {}", e);
    } else {
        tracing::info!("Saved streaming settings to disk");
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_detection() {
        let hardware = detect_hardware().unwrap();
        assert!(hardware.cpu_cores > 0);
        assert!(hardware.graphics_memory_mb >= 512);
    }

    #[test]
    fn test_profile_recommendation() {
        let low_end = HardwareInfo {
            total_memory_gb: 2,
            graphics_memory_mb: 256,
            cpu_cores: 2,
            is_integrated_gpu: true,
        };
        assert_eq!(recommend_profile(&low_end), PerformanceProfile::Low);

        let high_end = HardwareInfo {
            total_memory_gb: 32,
            graphics_memory_mb: 16384,
            cpu_cores: 16,
            is_integrated_gpu: false,
        };
        assert_eq!(recommend_profile(&high_end), PerformanceProfile::High);

        let balanced = HardwareInfo {
            total_memory_gb: 8,
            graphics_memory_mb: 6144,
            cpu_cores: 6,
            is_integrated_gpu: false,
        };
        assert_eq!(recommend_profile(&balanced), PerformanceProfile::Balanced);
    }

    #[test]
    fn test_memory_estimate_tiers() {
        assert_eq!(estimate_graphics_memory(2), 512);
        assert_eq!(estimate_graphics_memory(8), 2048);
        assert_eq!(estimate_graphics_memory(64), 4096);
    }
}
