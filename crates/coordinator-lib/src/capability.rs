//! Device capability model
//!
//! Pure data describing what the capture hardware can do. The coordinator
//! only queries it; probing real devices is the platform layer's job.

use crate::models::{Feature, ResolutionClass, ResourceVector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Static or queried limits of the capture device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    /// Maximum number of streams that can run at once
    pub max_simultaneous_streams: usize,
    pub supported_resolutions: BTreeSet<ResolutionClass>,
    pub supported_frame_rates: BTreeSet<u32>,
    /// Highest frame rate each resolution can sustain. Resolutions missing
    /// from the map are limited only by `supported_frame_rates`.
    pub max_frame_rate_by_resolution: BTreeMap<ResolutionClass, u32>,
    /// Hard aggregate bandwidth ceiling in Mbps
    pub bandwidth_ceiling_mbps: f64,
    /// Bandwidth the device can hold without heating up, in Mbps
    pub sustained_bandwidth_ceiling_mbps: f64,
    pub supported_features: BTreeSet<Feature>,
    /// Nominal resource budget shared by all streams
    pub hardware_budget: ResourceVector,
}

impl DeviceCapabilities {
    pub fn supports_resolution(&self, resolution: ResolutionClass) -> bool {
        self.supported_resolutions.contains(&resolution)
    }

    pub fn supports_feature(&self, feature: Feature) -> bool {
        self.supported_features.contains(&feature)
    }

    /// Frame-rate ceiling for a resolution
    pub fn max_frame_rate_for(&self, resolution: ResolutionClass) -> u32 {
        self.max_frame_rate_by_resolution
            .get(&resolution)
            .copied()
            .unwrap_or(u32::MAX)
    }

    /// True if the resolution and frame rate are each supported and the
    /// pair stays within the per-resolution ceiling.
    pub fn supports_combination(&self, resolution: ResolutionClass, frame_rate: u32) -> bool {
        self.supports_resolution(resolution)
            && self.supported_frame_rates.contains(&frame_rate)
            && frame_rate <= self.max_frame_rate_for(resolution)
    }

    /// Highest supported resolution not above `requested`
    pub fn clamp_resolution(&self, requested: ResolutionClass) -> Option<ResolutionClass> {
        self.supported_resolutions
            .range(..=requested)
            .next_back()
            .copied()
            .or_else(|| self.supported_resolutions.iter().next().copied())
    }

    /// Highest supported frame rate not above `requested` that the
    /// resolution can sustain
    pub fn clamp_frame_rate(&self, resolution: ResolutionClass, requested: u32) -> Option<u32> {
        let ceiling = requested.min(self.max_frame_rate_for(resolution));
        self.supported_frame_rates
            .range(..=ceiling)
            .next_back()
            .copied()
    }
}

impl Default for DeviceCapabilities {
    /// A dual-sensor mobile device
    fn default() -> Self {
        Self {
            max_simultaneous_streams: 4,
            supported_resolutions: ResolutionClass::ALL.into_iter().collect(),
            supported_frame_rates: [10, 15, 24, 30, 60].into_iter().collect(),
            max_frame_rate_by_resolution: [(ResolutionClass::Uhd2160, 30)].into_iter().collect(),
            bandwidth_ceiling_mbps: 4000.0,
            sustained_bandwidth_ceiling_mbps: 2500.0,
            supported_features: Feature::ALL.into_iter().collect(),
            hardware_budget: ResourceVector {
                bandwidth_mbps: 4000.0,
                memory_bytes: 1024 * 1024 * 1024,
                cpu_percent: 100.0,
                gpu_percent: 100.0,
                power_mw: 2000.0,
            },
        }
    }
}

/// Source of device capabilities
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;
}

/// Provider that always returns the same capability set
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities(pub DeviceCapabilities);

impl CapabilityProvider for StaticCapabilities {
    fn capabilities(&self) -> DeviceCapabilities {
        self.0.clone()
    }
}
