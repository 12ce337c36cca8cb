// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::SourceConfig;
use crate::constants::correction::DEFAULT_FOCAL_LENGTH;
use crate::errors::{ReaderError, ReaderResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Which correction kernel implementation to use
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum KernelBackend {
    /// Try the GPU kernel, fall back to the CPU kernel
    #[default]
    Auto,
    /// Always use the CPU kernel
    Cpu,
    /// Require the GPU kernel
    Gpu,
}

/// Fisheye correction settings
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Kernel implementation preference
    pub backend: KernelBackend,
    /// Focal length in pixels of the equidistant lens model
    pub focal_length: f32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            backend: KernelBackend::default(),
            focal_length: DEFAULT_FOCAL_LENGTH,
        }
    }
}

/// Region decoding settings
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Downscale regions whose longer side exceeds this before decoding.
    /// `None` decodes at full resolution.
    pub max_decode_dimension: Option<u32>,
}

/// Top-level reader configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Frame source configuration applied when the capture session opens
    pub capture: SourceConfig,
    /// Correction kernel settings
    pub correction: CorrectionConfig,
    /// Region decoder settings
    pub scan: ScanConfig,
}

impl ReaderConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> ReaderResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> ReaderResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading reader configuration");
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> ReaderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check that every section holds usable values
    pub fn validate(&self) -> ReaderResult<()> {
        self.capture.validate().map_err(ReaderError::Construction)?;

        if !(self.correction.focal_length.is_finite() && self.correction.focal_length > 0.0) {
            return Err(ReaderError::Config(format!(
                "focal length must be positive, got {}",
                self.correction.focal_length
            )));
        }

        if self.scan.max_decode_dimension == Some(0) {
            return Err(ReaderError::Config(
                "max decode dimension must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
