//! Motion blur parameters supplied by the host configuration layer
//!
//! Values are passed through to the shaders untouched; range validation belongs
//! to whatever UI or config file produced them.

use crate::Result;
use serde::{Deserialize, Serialize};

/// Blur shader variant, in increasing sample count and cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionBlurQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl MotionBlurQuality {
    pub const ALL: [MotionBlurQuality; 3] = [
        MotionBlurQuality::Low,
        MotionBlurQuality::Medium,
        MotionBlurQuality::High,
    ];

    /// Sub-pass of the blur program implementing this quality
    pub fn pass_index(self) -> u32 {
        match self {
            MotionBlurQuality::Low => 0,
            MotionBlurQuality::Medium => 1,
            MotionBlurQuality::High => 2,
        }
    }

    pub fn from_pass_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Taps along the velocity vector per pixel
    pub fn sample_count(self) -> u32 {
        match self {
            MotionBlurQuality::Low => 8,
            MotionBlurQuality::Medium => 16,
            MotionBlurQuality::High => 32,
        }
    }
}

/// Per-frame motion blur parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionBlurSettings {
    /// Blur strength applied to the velocity (default: 1.0)
    pub intensity: f32,
    pub quality: MotionBlurQuality,
    /// Weight of per-object motion (default: 1.0)
    pub per_object_intensity: f32,
    /// Weight of camera motion (default: 1.0)
    pub camera_intensity: f32,
}

impl MotionBlurSettings {
    pub fn new() -> Self {
        Self {
            intensity: 1.0,
            quality: MotionBlurQuality::Medium,
            per_object_intensity: 1.0,
            camera_intensity: 1.0,
        }
    }

    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_quality(mut self, quality: MotionBlurQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_per_object_intensity(mut self, intensity: f32) -> Self {
        self.per_object_intensity = intensity;
        self
    }

    pub fn with_camera_intensity(mut self, intensity: f32) -> Self {
        self.camera_intensity = intensity;
        self
    }
}

impl Default for MotionBlurSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_indices_are_dense_and_distinct() {
        for (i, quality) in MotionBlurQuality::ALL.iter().enumerate() {
            assert_eq!(quality.pass_index(), i as u32);
            assert_eq!(MotionBlurQuality::from_pass_index(i as u32), Some(*quality));
        }
        assert_eq!(MotionBlurQuality::from_pass_index(3), None);
    }

    #[test]
    fn higher_quality_takes_more_samples() {
        assert!(MotionBlurQuality::Low.sample_count() < MotionBlurQuality::Medium.sample_count());
        assert!(MotionBlurQuality::Medium.sample_count() < MotionBlurQuality::High.sample_count());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let settings = MotionBlurSettings::from_json(r#"{ "intensity": 0.25, "quality": "high" }"#)
            .unwrap();
        assert_eq!(settings.intensity, 0.25);
        assert_eq!(settings.quality, MotionBlurQuality::High);
        assert_eq!(settings.camera_intensity, 1.0);
        assert_eq!(settings.per_object_intensity, 1.0);
    }

    #[test]
    fn out_of_range_values_are_not_clamped() {
        let settings = MotionBlurSettings::new().with_intensity(7.5).with_camera_intensity(-2.0);
        assert_eq!(settings.intensity, 7.5);
        assert_eq!(settings.camera_intensity, -2.0);
    }

    #[test]
    fn unknown_quality_is_a_config_error() {
        let err = MotionBlurSettings::from_json(r#"{ "quality": "ultra" }"#).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
