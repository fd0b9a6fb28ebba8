//! Resource estimation for stream profiles
//!
//! Turns a [`StreamProfile`] into the [`ResourceVector`] it will consume.
//! The formulas are fixed so that admission is deterministic: the same
//! profile always yields the same vector.

use crate::models::{Feature, ResourceVector, StreamProfile};

/// Raw YUV 4:2:0 sampling
pub const BITS_PER_PIXEL: f64 = 12.0;

/// Bytes per pixel of a YUV 4:2:0 frame
pub const BYTES_PER_PIXEL: f64 = BITS_PER_PIXEL / 8.0;

/// Frames held in each stream's buffer pool
pub const POOL_DEPTH: u64 = 6;

/// Extra memory reserved for still-photo capture (48 MiB)
pub const PHOTO_OVERHEAD_BYTES: u64 = 48 * 1024 * 1024;

pub const CPU_BASE_PERCENT: f64 = 2.0;
pub const CPU_PER_MEGAPIXEL_FRAME: f64 = 0.05;
pub const CPU_STABILIZATION_PERCENT: f64 = 5.0;

pub const GPU_BASE_VIDEO_PERCENT: f64 = 5.0;
pub const GPU_HDR_PERCENT: f64 = 10.0;

pub const POWER_BASE_MW: f64 = 150.0;
pub const POWER_HDR_MW: f64 = 120.0;
pub const POWER_LOW_LIGHT_MW: f64 = 80.0;
pub const POWER_STABILIZATION_MW: f64 = 60.0;

/// Compute the resources a stream needs while running.
pub fn estimate(profile: &StreamProfile) -> ResourceVector {
    let pixels = profile.resolution.pixels();
    let fps = profile.frame_rate as f64;
    let features = &profile.features;

    let pixels_per_second = pixels as f64 * fps;
    let bandwidth_mbps =
        pixels_per_second * BITS_PER_PIXEL / 1_000_000.0 + profile.encoded_bitrate_bps as f64 / 1_000_000.0;

    let frame_bytes = (pixels as f64 * BYTES_PER_PIXEL) as u64;
    let mut memory_bytes = frame_bytes * POOL_DEPTH;
    if profile.photo_capture {
        memory_bytes += PHOTO_OVERHEAD_BYTES;
    }

    let mut cpu_percent =
        CPU_BASE_PERCENT + profile.resolution.megapixels() * fps * CPU_PER_MEGAPIXEL_FRAME;
    if features.contains(Feature::Stabilization) {
        cpu_percent += CPU_STABILIZATION_PERCENT;
    }

    let mut gpu_percent = GPU_BASE_VIDEO_PERCENT;
    if features.contains(Feature::Hdr) {
        gpu_percent += GPU_HDR_PERCENT;
    }

    let power_mw = POWER_BASE_MW
        + features
            .enabled()
            .iter()
            .map(|f| match f {
                Feature::Hdr => POWER_HDR_MW,
                Feature::LowLightBoost => POWER_LOW_LIGHT_MW,
                Feature::Stabilization => POWER_STABILIZATION_MW,
            })
            .sum::<f64>();

    ResourceVector {
        bandwidth_mbps,
        memory_bytes,
        cpu_percent,
        gpu_percent,
        power_mw,
    }
}

/// Aggregate bandwidth of a set of profiles in Mbps
pub fn aggregate_bandwidth<'a, I>(profiles: I) -> f64
where
    I: IntoIterator<Item = &'a StreamProfile>,
{
    profiles.into_iter().map(|p| estimate(p).bandwidth_mbps).sum()
}
