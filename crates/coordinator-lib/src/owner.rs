//! Stream owner callback surface
//!
//! The coordinator never touches capture hardware. Mitigations are carried
//! out by calling the platform layer through [`StreamOwner`].

use crate::models::{Feature, ResolutionClass};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Commands the core issues to whoever owns the capture streams.
///
/// Calls arrive after the adapter's state lock is released, so reading
/// coordinator state from a callback is fine. A callback must not feed a
/// new thermal signal: transitions are serialized and it would deadlock.
pub trait StreamOwner: Send + Sync {
    fn set_frame_rate(&self, stream_id: &str, fps: u32) -> Result<()>;

    fn set_resolution(&self, stream_id: &str, resolution: ResolutionClass) -> Result<()>;

    fn disable_stream(&self, stream_id: &str) -> Result<()>;

    fn set_feature_enabled(&self, stream_id: &str, feature: Feature, enabled: bool) -> Result<()>;

    fn set_power_saving_mode(&self, enabled: bool) -> Result<()>;
}

/// One call on a [`StreamOwner`], queued during a transition and
/// delivered once the adapter lock is released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OwnerCommand {
    SetFrameRate { stream_id: String, fps: u32 },
    SetResolution { stream_id: String, resolution: ResolutionClass },
    DisableStream { stream_id: String },
    SetFeatureEnabled { stream_id: String, feature: Feature, enabled: bool },
    SetPowerSavingMode { enabled: bool },
}

impl OwnerCommand {
    /// Target stream; `None` for device-wide commands
    pub fn stream_id(&self) -> Option<&str> {
        match self {
            OwnerCommand::SetFrameRate { stream_id, .. }
            | OwnerCommand::SetResolution { stream_id, .. }
            | OwnerCommand::DisableStream { stream_id }
            | OwnerCommand::SetFeatureEnabled { stream_id, .. } => Some(stream_id),
            OwnerCommand::SetPowerSavingMode { .. } => None,
        }
    }

    pub fn send_to(&self, owner: &dyn StreamOwner) -> Result<()> {
        match self {
            OwnerCommand::SetFrameRate { stream_id, fps } => owner.set_frame_rate(stream_id, *fps),
            OwnerCommand::SetResolution {
                stream_id,
                resolution,
            } => owner.set_resolution(stream_id, *resolution),
            OwnerCommand::DisableStream { stream_id } => owner.disable_stream(stream_id),
            OwnerCommand::SetFeatureEnabled {
                stream_id,
                feature,
                enabled,
            } => owner.set_feature_enabled(stream_id, *feature, *enabled),
            OwnerCommand::SetPowerSavingMode { enabled } => owner.set_power_saving_mode(*enabled),
        }
    }
}

/// Owner that only logs what it is asked to do
#[derive(Debug, Default, Clone)]
pub struct LoggingStreamOwner;

impl StreamOwner for LoggingStreamOwner {
    fn set_frame_rate(&self, stream_id: &str, fps: u32) -> Result<()> {
        info!(stream_id = %stream_id, fps, "Stream owner: set frame rate");
        Ok(())
    }

    fn set_resolution(&self, stream_id: &str, resolution: ResolutionClass) -> Result<()> {
        info!(stream_id = %stream_id, resolution = %resolution, "Stream owner: set resolution");
        Ok(())
    }

    fn disable_stream(&self, stream_id: &str) -> Result<()> {
        info!(stream_id = %stream_id, "Stream owner: disable stream");
        Ok(())
    }

    fn set_feature_enabled(&self, stream_id: &str, feature: Feature, enabled: bool) -> Result<()> {
        info!(stream_id = %stream_id, feature = %feature, enabled, "Stream owner: toggle feature");
        Ok(())
    }

    fn set_power_saving_mode(&self, enabled: bool) -> Result<()> {
        info!(enabled, "Stream owner: power saving");
        Ok(())
    }
}

/// Owner that records every command, optionally refusing some streams
#[derive(Debug, Default)]
pub struct RecordingStreamOwner {
    commands: Mutex<Vec<OwnerCommand>>,
    refused: Mutex<Vec<String>>,
}

impl RecordingStreamOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command targeting `stream_id` fail
    pub fn refuse(&self, stream_id: impl Into<String>) {
        self.refused
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stream_id.into());
    }

    pub fn commands(&self) -> Vec<OwnerCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn record(&self, stream_id: Option<&str>, command: OwnerCommand) -> Result<()> {
        if let Some(id) = stream_id {
            let refused = self.refused.lock().unwrap_or_else(|e| e.into_inner());
            if refused.iter().any(|r| r == id) {
                anyhow::bail!("stream '{}' refused command", id);
            }
        }
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        Ok(())
    }
}

impl StreamOwner for RecordingStreamOwner {
    fn set_frame_rate(&self, stream_id: &str, fps: u32) -> Result<()> {
        self.record(
            Some(stream_id),
            OwnerCommand::SetFrameRate {
                stream_id: stream_id.to_string(),
                fps,
            },
        )
    }

    fn set_resolution(&self, stream_id: &str, resolution: ResolutionClass) -> Result<()> {
        self.record(
            Some(stream_id),
            OwnerCommand::SetResolution {
                stream_id: stream_id.to_string(),
                resolution,
            },
        )
    }

    fn disable_stream(&self, stream_id: &str) -> Result<()> {
        self.record(
            Some(stream_id),
            OwnerCommand::DisableStream {
                stream_id: stream_id.to_string(),
            },
        )
    }

    fn set_feature_enabled(&self, stream_id: &str, feature: Feature, enabled: bool) -> Result<()> {
        self.record(
            Some(stream_id),
            OwnerCommand::SetFeatureEnabled {
                stream_id: stream_id.to_string(),
                feature,
                enabled,
            },
        )
    }

    fn set_power_saving_mode(&self, enabled: bool) -> Result<()> {
        self.record(None, OwnerCommand::SetPowerSavingMode { enabled })
    }
}
