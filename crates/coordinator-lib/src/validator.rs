//! Configuration validation and fallback generation
//!
//! `validate` reports every way a proposed configuration does not fit the
//! device. `fallback_configuration` rewrites a configuration into one that
//! does, keeping the most important streams. For any configuration and any
//! capability set the fallback validates without errors.

use crate::capability::DeviceCapabilities;
use crate::error::{CoordinatorError, Result};
use crate::estimate::aggregate_bandwidth;
use crate::models::{CaptureConfiguration, Feature, ResolutionClass, StreamProfile};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// A single finding about a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("{requested} streams requested, device supports {max}")]
    TooManyStreams { requested: usize, max: usize },

    #[error("stream '{stream_id}' is listed more than once")]
    DuplicateStream { stream_id: String },

    #[error("stream '{stream_id}': resolution {resolution} is not supported")]
    UnsupportedResolution {
        stream_id: String,
        resolution: ResolutionClass,
    },

    #[error("stream '{stream_id}': {frame_rate} fps at {resolution} is not supported")]
    UnsupportedFrameRate {
        stream_id: String,
        resolution: ResolutionClass,
        frame_rate: u32,
    },

    #[error("stream '{stream_id}': feature {feature} is not supported")]
    UnsupportedFeature { stream_id: String, feature: Feature },

    #[error("aggregate bandwidth {required_mbps:.1} Mbps exceeds the {ceiling_mbps:.1} Mbps ceiling")]
    BandwidthExceeded { required_mbps: f64, ceiling_mbps: f64 },

    #[error(
        "aggregate bandwidth {required_mbps:.1} Mbps exceeds the sustained {sustained_mbps:.1} Mbps; expect thermal throttling"
    )]
    SustainedBandwidthExceeded {
        required_mbps: f64,
        sustained_mbps: f64,
    },
}

/// Hard errors and soft warnings for one configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// True when there are no hard errors; warnings are allowed
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_result(self) -> Result<ValidationReport> {
        if self.is_valid() {
            return Ok(self);
        }
        let message = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(CoordinatorError::HardwareNotSupported(message))
    }
}

/// Check a configuration against the device capabilities
pub fn validate(config: &CaptureConfiguration, caps: &DeviceCapabilities) -> ValidationReport {
    let mut report = ValidationReport::default();

    if config.streams.len() > caps.max_simultaneous_streams {
        report.errors.push(ValidationIssue::TooManyStreams {
            requested: config.streams.len(),
            max: caps.max_simultaneous_streams,
        });
    }

    let mut seen = HashSet::new();
    for stream in &config.streams {
        if !seen.insert(stream.stream_id.as_str()) {
            report.errors.push(ValidationIssue::DuplicateStream {
                stream_id: stream.stream_id.clone(),
            });
        }

        if !caps.supports_resolution(stream.resolution) {
            report.errors.push(ValidationIssue::UnsupportedResolution {
                stream_id: stream.stream_id.clone(),
                resolution: stream.resolution,
            });
        } else if !caps.supports_combination(stream.resolution, stream.frame_rate) {
            report.errors.push(ValidationIssue::UnsupportedFrameRate {
                stream_id: stream.stream_id.clone(),
                resolution: stream.resolution,
                frame_rate: stream.frame_rate,
            });
        }

        for feature in stream.features.enabled() {
            if !caps.supports_feature(feature) {
                report.errors.push(ValidationIssue::UnsupportedFeature {
                    stream_id: stream.stream_id.clone(),
                    feature,
                });
            }
        }
    }

    // An empty configuration is always valid
    if !config.streams.is_empty() {
        let required = aggregate_bandwidth(&config.streams);
        if required > caps.bandwidth_ceiling_mbps {
            report.errors.push(ValidationIssue::BandwidthExceeded {
                required_mbps: required,
                ceiling_mbps: caps.bandwidth_ceiling_mbps,
            });
        } else if required > caps.sustained_bandwidth_ceiling_mbps {
            report.warnings.push(ValidationIssue::SustainedBandwidthExceeded {
                required_mbps: required,
                sustained_mbps: caps.sustained_bandwidth_ceiling_mbps,
            });
        }
    }

    report
}

/// Produce a configuration that validates against `caps`.
///
/// Streams are ranked by priority (stable for equal priorities) and kept
/// up to the device's stream limit. Each kept stream is clamped to the
/// highest supported resolution and frame rate not above its request, and
/// loses unsupported features. While aggregate bandwidth is over the hard
/// ceiling the lowest-priority stream steps down a resolution class, and
/// is dropped once it cannot go lower.
pub fn fallback_configuration(
    config: &CaptureConfiguration,
    caps: &DeviceCapabilities,
) -> CaptureConfiguration {
    let mut ranked: Vec<&StreamProfile> = config.streams.iter().collect();
    ranked.sort_by(|a, b| b.priority.cmp(&a.priority));

    let mut seen = HashSet::new();
    let mut streams: Vec<StreamProfile> = Vec::new();
    for requested in ranked {
        if streams.len() >= caps.max_simultaneous_streams {
            break;
        }
        if !seen.insert(requested.stream_id.as_str()) {
            continue;
        }
        match clamp_stream(requested, caps) {
            Some(profile) => streams.push(profile),
            None => debug!(
                stream_id = %requested.stream_id,
                "No supported mode for stream, dropping from fallback"
            ),
        }
    }

    while !streams.is_empty() && aggregate_bandwidth(&streams) > caps.bandwidth_ceiling_mbps {
        let last = streams.len() - 1;
        match step_down(&streams[last], caps) {
            Some(smaller) => streams[last] = smaller,
            None => {
                let dropped = streams.remove(last);
                debug!(
                    stream_id = %dropped.stream_id,
                    "Dropping stream to fit the bandwidth ceiling"
                );
            }
        }
    }

    CaptureConfiguration { streams }
}

/// Fit one stream to the capabilities, or `None` if no mode exists
fn clamp_stream(requested: &StreamProfile, caps: &DeviceCapabilities) -> Option<StreamProfile> {
    let mut profile = requested.clone();
    for feature in Feature::ALL {
        if !caps.supports_feature(feature) {
            profile.features.set(feature, false);
        }
    }

    let resolution = caps.clamp_resolution(requested.resolution)?;
    if let Some((resolution, frame_rate)) = supported_mode(caps, resolution, requested.frame_rate) {
        profile.resolution = resolution;
        profile.frame_rate = frame_rate;
        return Some(profile);
    }

    // Nothing at or below the requested rate: take the slowest rate the
    // largest workable resolution allows
    caps.supported_resolutions
        .range(..=resolution)
        .rev()
        .find_map(|res| {
            caps.supported_frame_rates
                .iter()
                .copied()
                .find(|fps| caps.supports_combination(*res, *fps))
                .map(|fps| (*res, fps))
        })
        .map(|(resolution, frame_rate)| {
            profile.resolution = resolution;
            profile.frame_rate = frame_rate;
            profile
        })
}

/// Highest supported (resolution, frame rate) at or below the given ones
fn supported_mode(
    caps: &DeviceCapabilities,
    resolution: ResolutionClass,
    frame_rate: u32,
) -> Option<(ResolutionClass, u32)> {
    caps.supported_resolutions
        .range(..=resolution)
        .rev()
        .find_map(|res| caps.clamp_frame_rate(*res, frame_rate).map(|fps| (*res, fps)))
}

/// The same stream one supported resolution class lower
fn step_down(profile: &StreamProfile, caps: &DeviceCapabilities) -> Option<StreamProfile> {
    let lower = caps
        .supported_resolutions
        .range(..profile.resolution)
        .next_back()
        .copied()?;
    let (resolution, frame_rate) = supported_mode(caps, lower, profile.frame_rate)?;
    Some(StreamProfile {
        resolution,
        frame_rate,
        ..profile.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, ResourceVector};
    use std::collections::{BTreeMap, BTreeSet};

    fn stream(id: &str, priority: Priority, res: ResolutionClass, fps: u32) -> StreamProfile {
        StreamProfile::new(id, priority, res, fps)
    }

    #[test]
    fn test_valid_configuration() {
        let config = CaptureConfiguration::new(vec![
            stream("back", Priority::High, ResolutionClass::FullHd1080, 30),
            stream("front", Priority::Medium, ResolutionClass::Hd720, 30),
        ]);
        let report = validate(&config, &DeviceCapabilities::default());
        assert!(report.is_valid());
        assert!(report.warnings.is_empty());
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_too_many_streams() {
        let caps = DeviceCapabilities {
            max_simultaneous_streams: 1,
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![
            stream("a", Priority::High, ResolutionClass::Hd720, 30),
            stream("b", Priority::Low, ResolutionClass::Hd720, 30),
        ]);
        let report = validate(&config, &caps);
        assert!(report.errors.contains(&ValidationIssue::TooManyStreams {
            requested: 2,
            max: 1
        }));
    }

    #[test]
    fn test_unsupported_combination() {
        let config = CaptureConfiguration::new(vec![stream(
            "back",
            Priority::High,
            ResolutionClass::Uhd2160,
            60,
        )]);
        let report = validate(&config, &DeviceCapabilities::default());
        assert!(report.errors.contains(&ValidationIssue::UnsupportedFrameRate {
            stream_id: "back".to_string(),
            resolution: ResolutionClass::Uhd2160,
            frame_rate: 60
        }));

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, CoordinatorError::HardwareNotSupported(_)));
        assert!(err.to_string().contains("60 fps at 2160p"));
    }

    #[test]
    fn test_unsupported_feature_and_duplicate() {
        let caps = DeviceCapabilities {
            supported_features: BTreeSet::new(),
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![
            stream("a", Priority::High, ResolutionClass::Hd720, 30).with_feature(Feature::Hdr),
            stream("a", Priority::Low, ResolutionClass::Hd720, 30),
        ]);
        let report = validate(&config, &caps);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_bandwidth_error_and_warning() {
        let caps = DeviceCapabilities {
            bandwidth_ceiling_mbps: 1000.0,
            sustained_bandwidth_ceiling_mbps: 500.0,
            ..DeviceCapabilities::default()
        };

        // ~766 Mbps: over sustained, under hard
        let warm = CaptureConfiguration::new(vec![stream(
            "a",
            Priority::High,
            ResolutionClass::FullHd1080,
            30,
        )
        .with_bitrate(20_000_000)]);
        let report = validate(&warm, &caps);
        assert!(report.is_valid());
        assert!(matches!(
            report.warnings.as_slice(),
            [ValidationIssue::SustainedBandwidthExceeded { .. }]
        ));

        let hot = CaptureConfiguration::new(vec![
            stream("a", Priority::High, ResolutionClass::FullHd1080, 30),
            stream("b", Priority::High, ResolutionClass::FullHd1080, 30),
        ]);
        let report = validate(&hot, &caps);
        assert!(matches!(
            report.errors.as_slice(),
            [ValidationIssue::BandwidthExceeded { .. }]
        ));
    }

    #[test]
    fn test_fallback_keeps_highest_priority() {
        let caps = DeviceCapabilities {
            max_simultaneous_streams: 2,
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![
            stream("low", Priority::Low, ResolutionClass::Hd720, 30),
            stream("essential", Priority::Essential, ResolutionClass::Hd720, 30),
            stream("high-1", Priority::High, ResolutionClass::Hd720, 30),
            stream("high-2", Priority::High, ResolutionClass::Hd720, 30),
        ]);

        let fallback = fallback_configuration(&config, &caps);
        let ids: Vec<_> = fallback.streams.iter().map(|s| s.stream_id.as_str()).collect();
        assert_eq!(ids, vec!["essential", "high-1"]);
    }

    #[test]
    fn test_fallback_clamps_modes_and_features() {
        let caps = DeviceCapabilities {
            supported_resolutions: [ResolutionClass::Vga480, ResolutionClass::Hd720]
                .into_iter()
                .collect(),
            supported_frame_rates: [15, 24].into_iter().collect(),
            supported_features: [Feature::Stabilization].into_iter().collect(),
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![stream(
            "back",
            Priority::High,
            ResolutionClass::Uhd2160,
            30,
        )
        .with_feature(Feature::Hdr)
        .with_feature(Feature::Stabilization)]);

        let fallback = fallback_configuration(&config, &caps);
        let back = &fallback.streams[0];
        assert_eq!(back.resolution, ResolutionClass::Hd720);
        assert_eq!(back.frame_rate, 24);
        assert!(!back.features.hdr);
        assert!(back.features.stabilization);
    }

    #[test]
    fn test_fallback_respects_per_resolution_ceiling() {
        let caps = DeviceCapabilities {
            supported_resolutions: [ResolutionClass::FullHd1080].into_iter().collect(),
            supported_frame_rates: [30, 60].into_iter().collect(),
            max_frame_rate_by_resolution: [(ResolutionClass::FullHd1080, 30)]
                .into_iter()
                .collect(),
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![stream(
            "a",
            Priority::High,
            ResolutionClass::FullHd1080,
            60,
        )]);
        let fallback = fallback_configuration(&config, &caps);
        assert_eq!(fallback.streams[0].frame_rate, 30);
    }

    #[test]
    fn test_fallback_raises_rate_when_nothing_lower_exists() {
        let caps = DeviceCapabilities {
            supported_frame_rates: [24, 30].into_iter().collect(),
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![stream(
            "slow",
            Priority::Low,
            ResolutionClass::Hd720,
            5,
        )]);
        let fallback = fallback_configuration(&config, &caps);
        assert_eq!(fallback.streams[0].frame_rate, 24);
    }

    #[test]
    fn test_fallback_sheds_bandwidth_from_lowest_priority() {
        let caps = DeviceCapabilities {
            bandwidth_ceiling_mbps: 1200.0,
            ..DeviceCapabilities::default()
        };
        let config = CaptureConfiguration::new(vec![
            stream("main", Priority::Essential, ResolutionClass::FullHd1080, 30),
            stream("aux", Priority::Low, ResolutionClass::FullHd1080, 30),
        ]);

        let fallback = fallback_configuration(&config, &caps);
        assert_eq!(fallback.streams[0].resolution, ResolutionClass::FullHd1080);
        assert!(fallback.streams.len() == 1 || fallback.streams[1].resolution < ResolutionClass::FullHd1080);
        assert!(validate(&fallback, &caps).is_valid());
    }

    /// Deterministic generator for the postcondition sweep
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }

        fn subset<T: Copy + Ord>(&mut self, items: &[T]) -> BTreeSet<T> {
            items.iter().copied().filter(|_| self.below(2) == 1).collect()
        }
    }

    fn random_caps(rng: &mut Lcg) -> DeviceCapabilities {
        let rates = [1, 5, 10, 15, 24, 25, 30, 48, 60, 120];
        let resolutions = rng.subset(&ResolutionClass::ALL);
        let mut ceilings = BTreeMap::new();
        for res in &resolutions {
            if rng.below(3) == 0 {
                ceilings.insert(*res, rates[rng.below(rates.len() as u64) as usize]);
            }
        }
        DeviceCapabilities {
            max_simultaneous_streams: rng.below(5) as usize,
            supported_resolutions: resolutions,
            supported_frame_rates: rng.subset(&rates),
            max_frame_rate_by_resolution: ceilings,
            bandwidth_ceiling_mbps: rng.below(6000) as f64,
            sustained_bandwidth_ceiling_mbps: rng.below(6000) as f64,
            supported_features: rng.subset(&Feature::ALL),
            hardware_budget: ResourceVector::default(),
        }
    }

    fn random_config(rng: &mut Lcg) -> CaptureConfiguration {
        let priorities = [Priority::Low, Priority::Medium, Priority::High, Priority::Essential];
        let count = rng.below(7);
        let streams = (0..count)
            .map(|_| {
                let mut profile = StreamProfile::new(
                    format!("s{}", rng.below(count + 1)),
                    priorities[rng.below(4) as usize],
                    ResolutionClass::ALL[rng.below(4) as usize],
                    rng.below(130) as u32,
                )
                .with_bitrate(rng.below(50) * 1_000_000);
                for feature in Feature::ALL {
                    profile.features.set(feature, rng.below(2) == 1);
                }
                profile
            })
            .collect();
        CaptureConfiguration::new(streams)
    }

    #[test]
    fn test_fallback_always_validates() {
        let mut rng = Lcg(0x5eed);
        for _ in 0..2000 {
            let caps = random_caps(&mut rng);
            let config = random_config(&mut rng);
            let fallback = fallback_configuration(&config, &caps);
            let report = validate(&fallback, &caps);
            assert!(
                report.errors.is_empty(),
                "fallback {:?} for {:?} under {:?} has errors {:?}",
                fallback,
                config,
                caps,
                report.errors
            );
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let mut rng = Lcg(42);
        let caps = random_caps(&mut rng);
        let config = random_config(&mut rng);
        assert_eq!(
            fallback_configuration(&config, &caps),
            fallback_configuration(&config, &caps)
        );
    }

    #[test]
    fn test_fallback_of_valid_config_is_identity() {
        let config = CaptureConfiguration::new(vec![
            stream("back", Priority::High, ResolutionClass::FullHd1080, 30),
            stream("front", Priority::Medium, ResolutionClass::Hd720, 24),
        ]);
        assert_eq!(
            fallback_configuration(&config, &DeviceCapabilities::default()),
            config
        );
    }
}
