use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("zoom bounds must satisfy 0 < min <= 1 <= max (got min={min}, max={max})")]
    ZoomBounds { min: f32, max: f32 },
    #[error("zoom step must be a finite number greater than 1 (got {0})")]
    ZoomStep(f32),
    #[error("{field} must be a finite, non-negative number (got {value})")]
    Negative { field: &'static str, value: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min: 0.2,
            max: 5.0,
            step: 1.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Gap between pages when the render payload does not carry one.
    pub page_gap: f32,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "visible_ms")]
    pub visible: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "fade_ms")]
    pub fade: Duration,
    pub match_tolerance: f32,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            visible: Duration::from_millis(2000),
            fade: Duration::from_millis(300),
            match_tolerance: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    pub width: f32,
    pub height: f32,
    /// Minimum distance kept from the viewport edges.
    pub margin: f32,
    /// Distance between the anchor point and the popup corner.
    pub offset: f32,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            width: 320.0,
            height: 240.0,
            margin: 8.0,
            offset: 12.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub zoom: ZoomConfig,
    pub layout: LayoutConfig,
    pub highlight: HighlightConfig,
    pub popup: PopupConfig,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(raw).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let zoom = self.zoom;
        let bounds_ok = zoom.min.is_finite()
            && zoom.max.is_finite()
            && zoom.min > 0.0
            && zoom.min <= 1.0
            && zoom.max >= 1.0;
        if !bounds_ok {
            return Err(ConfigError::ZoomBounds {
                min: zoom.min,
                max: zoom.max,
            });
        }
        if !(zoom.step.is_finite() && zoom.step > 1.0) {
            return Err(ConfigError::ZoomStep(zoom.step));
        }

        let non_negative = [
            ("layout.page_gap", self.layout.page_gap),
            ("highlight.match_tolerance", self.highlight.match_tolerance),
            ("popup.width", self.popup.width),
            ("popup.height", self.popup.height),
            ("popup.margin", self.popup.margin),
            ("popup.offset", self.popup.offset),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Negative { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.zoom.step, 1.1);
        assert_eq!(config.highlight.visible, Duration::from_secs(2));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [zoom]
            max = 8.0

            [highlight]
            visible_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.zoom.max, 8.0);
        assert_eq!(config.zoom.min, 0.2);
        assert_eq!(config.highlight.visible, Duration::from_millis(500));
        assert_eq!(config.highlight.fade, Duration::from_millis(300));
    }

    #[test]
    fn inverted_zoom_bounds_are_rejected() {
        let err = EngineConfig::from_toml_str("[zoom]\nmin = 3.0\nmax = 2.0\n").unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(config_err, ConfigError::ZoomBounds { .. }));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
