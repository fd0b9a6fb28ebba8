//! Core data models for the capture coordinator

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Ordinal importance of a stream, used for eviction and throttling order.
///
/// Ordering is `Low < Medium < High < Essential`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Essential,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Essential => write!(f, "essential"),
        }
    }
}

/// Capture resolution classes, ordered from smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResolutionClass {
    #[serde(rename = "480p")]
    Vga480,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl ResolutionClass {
    pub const ALL: [ResolutionClass; 4] = [
        ResolutionClass::Vga480,
        ResolutionClass::Hd720,
        ResolutionClass::FullHd1080,
        ResolutionClass::Uhd2160,
    ];

    /// Pixel dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ResolutionClass::Vga480 => (640, 480),
            ResolutionClass::Hd720 => (1280, 720),
            ResolutionClass::FullHd1080 => (1920, 1080),
            ResolutionClass::Uhd2160 => (3840, 2160),
        }
    }

    pub fn pixels(&self) -> u64 {
        let (w, h) = self.dimensions();
        w as u64 * h as u64
    }

    pub fn megapixels(&self) -> f64 {
        self.pixels() as f64 / 1_000_000.0
    }

    /// Largest class whose height fits within `height * factor`.
    ///
    /// Never goes below the smallest class.
    pub fn scaled_down(&self, factor: f64) -> ResolutionClass {
        let target = self.dimensions().1 as f64 * factor;
        Self::ALL
            .iter()
            .rev()
            .copied()
            .find(|class| class.dimensions().1 as f64 <= target)
            .unwrap_or(ResolutionClass::Vga480)
    }
}

impl fmt::Display for ResolutionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}p", self.dimensions().1)
    }
}

/// Optional per-stream capture features
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Hdr,
    LowLightBoost,
    Stabilization,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Hdr, Feature::LowLightBoost, Feature::Stabilization];
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Hdr => write!(f, "hdr"),
            Feature::LowLightBoost => write!(f, "low_light_boost"),
            Feature::Stabilization => write!(f, "stabilization"),
        }
    }
}

/// Feature toggles carried on a stream profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default)]
    pub hdr: bool,
    #[serde(default)]
    pub low_light_boost: bool,
    #[serde(default)]
    pub stabilization: bool,
}

impl FeatureFlags {
    pub fn contains(&self, feature: Feature) -> bool {
        match feature {
            Feature::Hdr => self.hdr,
            Feature::LowLightBoost => self.low_light_boost,
            Feature::Stabilization => self.stabilization,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        match feature {
            Feature::Hdr => self.hdr = enabled,
            Feature::LowLightBoost => self.low_light_boost = enabled,
            Feature::Stabilization => self.stabilization = enabled,
        }
    }

    /// Enabled features in a stable order
    pub fn enabled(&self) -> Vec<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| self.contains(*f))
            .collect()
    }
}

/// A requested capture stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub stream_id: String,
    pub priority: Priority,
    pub resolution: ResolutionClass,
    pub frame_rate: u32,
    #[serde(default)]
    pub features: FeatureFlags,
    /// Estimated encoded bitrate in bits per second
    #[serde(default)]
    pub encoded_bitrate_bps: u64,
    /// Whether the stream also feeds still-photo capture
    #[serde(default)]
    pub photo_capture: bool,
}

impl StreamProfile {
    pub fn new(
        stream_id: impl Into<String>,
        priority: Priority,
        resolution: ResolutionClass,
        frame_rate: u32,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            priority,
            resolution,
            frame_rate,
            features: FeatureFlags::default(),
            encoded_bitrate_bps: 0,
            photo_capture: false,
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.set(feature, true);
        self
    }

    pub fn with_bitrate(mut self, bps: u64) -> Self {
        self.encoded_bitrate_bps = bps;
        self
    }

    pub fn with_photo_capture(mut self) -> Self {
        self.photo_capture = true;
        self
    }
}

/// A multi-stream capture configuration proposed by a caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfiguration {
    pub streams: Vec<StreamProfile>,
}

impl CaptureConfiguration {
    pub fn new(streams: Vec<StreamProfile>) -> Self {
        Self { streams }
    }
}

/// One axis of the shared resource budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceDimension {
    Bandwidth,
    Memory,
    Cpu,
    Gpu,
    Power,
}

impl ResourceDimension {
    pub const ALL: [ResourceDimension; 5] = [
        ResourceDimension::Bandwidth,
        ResourceDimension::Memory,
        ResourceDimension::Cpu,
        ResourceDimension::Gpu,
        ResourceDimension::Power,
    ];
}

impl fmt::Display for ResourceDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceDimension::Bandwidth => write!(f, "bandwidth"),
            ResourceDimension::Memory => write!(f, "memory"),
            ResourceDimension::Cpu => write!(f, "cpu"),
            ResourceDimension::Gpu => write!(f, "gpu"),
            ResourceDimension::Power => write!(f, "power"),
        }
    }
}

/// Resource demand or budget across every dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub bandwidth_mbps: f64,
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub gpu_percent: f64,
    pub power_mw: f64,
}

/// Slack for float accumulation when comparing against a budget
const BUDGET_EPSILON: f64 = 1e-9;

impl ResourceVector {
    pub fn get(&self, dimension: ResourceDimension) -> f64 {
        match dimension {
            ResourceDimension::Bandwidth => self.bandwidth_mbps,
            ResourceDimension::Memory => self.memory_bytes as f64,
            ResourceDimension::Cpu => self.cpu_percent,
            ResourceDimension::Gpu => self.gpu_percent,
            ResourceDimension::Power => self.power_mw,
        }
    }

    /// Multiply every dimension by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            bandwidth_mbps: self.bandwidth_mbps * factor,
            memory_bytes: (self.memory_bytes as f64 * factor) as u64,
            cpu_percent: self.cpu_percent * factor,
            gpu_percent: self.gpu_percent * factor,
            power_mw: self.power_mw * factor,
        }
    }

    /// First dimension in which `self` exceeds `limit`, if any
    pub fn first_exceeding(&self, limit: &ResourceVector) -> Option<ResourceDimension> {
        ResourceDimension::ALL
            .iter()
            .copied()
            .find(|d| self.get(*d) > limit.get(*d) + BUDGET_EPSILON)
    }

    pub fn fits_within(&self, limit: &ResourceVector) -> bool {
        self.first_exceeding(limit).is_none()
    }

    /// True if no dimension is larger than in `other`
    pub fn is_reduction_of(&self, other: &ResourceVector) -> bool {
        self.fits_within(other)
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;

    fn add(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector {
            bandwidth_mbps: self.bandwidth_mbps + rhs.bandwidth_mbps,
            memory_bytes: self.memory_bytes.saturating_add(rhs.memory_bytes),
            cpu_percent: self.cpu_percent + rhs.cpu_percent,
            gpu_percent: self.gpu_percent + rhs.gpu_percent,
            power_mw: self.power_mw + rhs.power_mw,
        }
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceVector {
    type Output = ResourceVector;

    /// Saturates at zero in every dimension
    fn sub(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector {
            bandwidth_mbps: (self.bandwidth_mbps - rhs.bandwidth_mbps).max(0.0),
            memory_bytes: self.memory_bytes.saturating_sub(rhs.memory_bytes),
            cpu_percent: (self.cpu_percent - rhs.cpu_percent).max(0.0),
            gpu_percent: (self.gpu_percent - rhs.gpu_percent).max(0.0),
            power_mw: (self.power_mw - rhs.power_mw).max(0.0),
        }
    }
}

impl std::iter::Sum for ResourceVector {
    fn sum<I: Iterator<Item = ResourceVector>>(iter: I) -> Self {
        iter.fold(ResourceVector::default(), |acc, v| acc + v)
    }
}

/// Identifier of a live allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(pub u64);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stream admitted into the shared budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub profile: StreamProfile,
    pub resources: ResourceVector,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds
    pub updated_at: i64,
}
