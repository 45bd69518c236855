use std::path::Path;

use bevy::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    cascade::CascadeThresholds,
    error::{
        ShadowVarianceError,
        ShadowVarianceResult,
    },
};


pub const DEFAULT_KEYWORD_PREFIX: &str = "SHADOWS_CASCADE_LOW_DETAIL";


// read every tick, edits take effect on the next frame
#[derive(
    Component,
    Clone,
    Debug,
    PartialEq,
    Reflect,
    Serialize,
    Deserialize,
)]
#[reflect(Component)]
#[serde(default)]
pub struct ShadowVarianceSettings {
    pub frames_per_dispatch: u32,
    pub sample_count: u32,
    pub low_to_mid: f32,
    pub mid_to_high: f32,
    pub debug_mode: bool,
    pub keyword_prefix: String,
}

impl Default for ShadowVarianceSettings {
    fn default() -> Self {
        let thresholds = CascadeThresholds::default();

        Self {
            frames_per_dispatch: 3,
            sample_count: 16,
            low_to_mid: thresholds.low_to_mid,
            mid_to_high: thresholds.mid_to_high,
            debug_mode: true,
            keyword_prefix: DEFAULT_KEYWORD_PREFIX.to_string(),
        }
    }
}

impl ShadowVarianceSettings {
    pub fn thresholds(&self) -> CascadeThresholds {
        CascadeThresholds {
            low_to_mid: self.low_to_mid,
            mid_to_high: self.mid_to_high,
        }
    }

    /// Checked at activation. `low_to_mid >= mid_to_high` is accepted but logged by the caller.
    pub fn validate(&self) -> ShadowVarianceResult<()> {
        if self.frames_per_dispatch == 0 {
            return Err(ShadowVarianceError::InvalidSettings(
                "frames_per_dispatch must be at least 1".to_string(),
            ));
        }

        if self.sample_count == 0 {
            return Err(ShadowVarianceError::InvalidSettings(
                "sample_count must be at least 1".to_string(),
            ));
        }

        for (name, value) in [("low_to_mid", self.low_to_mid), ("mid_to_high", self.mid_to_high)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ShadowVarianceError::InvalidSettings(
                    format!("{name} must lie in [0, 1], got {value}"),
                ));
            }
        }

        if self.keyword_prefix.is_empty() {
            return Err(ShadowVarianceError::InvalidSettings(
                "keyword_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn thresholds_ordered(&self) -> bool {
        self.low_to_mid < self.mid_to_high
    }

    pub fn from_json(json: &str) -> ShadowVarianceResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> ShadowVarianceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ShadowVarianceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|source| ShadowVarianceError::SettingsIo {
                path: path.to_path_buf(),
                source,
            })?;

        Self::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ShadowVarianceResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .map_err(|source| ShadowVarianceError::SettingsIo {
                path: path.to_path_buf(),
                source,
            })
    }
}
