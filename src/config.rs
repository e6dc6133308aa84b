//! Session configuration, loadable from TOML.
//!
//! ```toml
//! engine_id = "myRenderingEngine"
//! tool_group_id = "STACK_TOOL_GROUP_ID"
//! volume_id = "dicom:/data/abdomen"
//! label_volume_id = "dicom:/data/abdomen-labels"
//!
//! [window_level]
//! center = 40
//! width = 400
//!
//! [[viewports]]
//! id = "CT_AXIAL"
//! orientation = "AXIAL"
//! mount = "CT_AXIAL"
//! ```

use crate::tools::{LayoutError, ToolGroupLayout};
use crate::viewport::{ViewportDescriptor, find_duplicate_id};
use crate::volume::{VolumeId, VolumeIdError};
use crate::window_level::WindowLevel;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const DEFAULT_ENGINE_ID: &str = "myRenderingEngine";
pub const DEFAULT_TOOL_GROUP_ID: &str = "STACK_TOOL_GROUP_ID";
pub const DEFAULT_SEGMENTATION_ID: &str = "LABELMAP_SEGMENTATION";
pub const DEFAULT_VIEWPORT_PREFIX: &str = "CT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no volume id configured")]
    MissingVolume,

    #[error("no viewports configured")]
    NoViewports,

    #[error("viewport id `{0}` is used more than once")]
    DuplicateViewport(String),

    #[error("window width must be a positive number, got {0}")]
    InvalidWindow(f64),

    #[error(transparent)]
    VolumeId(#[from] VolumeIdError),

    #[error("invalid tool layout: {0}")]
    Layout(#[from] LayoutError),
}

/// Everything that varies between viewer setups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub engine_id: String,
    pub tool_group_id: String,
    pub viewports: Vec<ViewportDescriptor>,
    pub volume_id: String,
    pub label_volume_id: Option<String>,
    pub segmentation_id: String,
    pub window_level: WindowLevel,
    pub tools: ToolGroupLayout,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            engine_id: DEFAULT_ENGINE_ID.to_owned(),
            tool_group_id: DEFAULT_TOOL_GROUP_ID.to_owned(),
            viewports: ViewportDescriptor::orthogonal(DEFAULT_VIEWPORT_PREFIX),
            volume_id: String::new(),
            label_volume_id: None,
            segmentation_id: DEFAULT_SEGMENTATION_ID.to_owned(),
            window_level: WindowLevel::default(),
            tools: ToolGroupLayout::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(volume_id: impl Into<String>) -> Self {
        Self {
            volume_id: volume_id.into(),
            ..Self::default()
        }
    }

    pub fn with_label_volume(mut self, label_volume_id: impl Into<String>) -> Self {
        self.label_volume_id = Some(label_volume_id.into());
        self
    }

    pub fn with_window_level(mut self, window_level: WindowLevel) -> Self {
        self.window_level = window_level;
        self
    }

    pub fn with_viewports(mut self, viewports: Vec<ViewportDescriptor>) -> Self {
        self.viewports = viewports;
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        info!("loaded session config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.volume_id.is_empty() {
            return Err(ConfigError::MissingVolume);
        }
        VolumeId::parse(self.volume_id.as_str())?;
        if let Some(label) = &self.label_volume_id {
            VolumeId::parse(label.as_str())?;
        }
        if self.viewports.is_empty() {
            return Err(ConfigError::NoViewports);
        }
        if let Some(id) = find_duplicate_id(&self.viewports) {
            return Err(ConfigError::DuplicateViewport(id.to_owned()));
        }
        if !self.window_level.is_valid() {
            return Err(ConfigError::InvalidWindow(self.window_level.width));
        }
        self.tools.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::Orientation;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SessionConfig::from_toml_str(r#"volume_id = "nifti:abd.nii.gz""#).unwrap();
        assert_eq!(config.volume_id, "nifti:abd.nii.gz");
        assert_eq!(config.engine_id, DEFAULT_ENGINE_ID);
        assert_eq!(config.tool_group_id, DEFAULT_TOOL_GROUP_ID);
        assert_eq!(config.window_level, WindowLevel::new(40.0, 400.0));
        assert_eq!(config.viewports.len(), 3);
        assert_eq!(config.tools, ToolGroupLayout::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn full_toml_round_trips_fields() {
        let config = SessionConfig::from_toml_str(
            r#"
engine_id = "engine"
tool_group_id = "group"
volume_id = "dicom:/data/ct"
label_volume_id = "dicom:/data/labels"
segmentation_id = "liver"

[window_level]
center = 1000
width = 2000

[[viewports]]
id = "only"
orientation = "CORONAL"
mount = "panel-1"
"#,
        )
        .unwrap();
        assert_eq!(config.engine_id, "engine");
        assert_eq!(config.label_volume_id.as_deref(), Some("dicom:/data/labels"));
        assert_eq!(config.segmentation_id, "liver");
        assert_eq!(config.window_level.range().lower, 0.0);
        assert_eq!(
            config.viewports,
            vec![ViewportDescriptor::new("only", Orientation::Coronal, "panel-1")]
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let config = SessionConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::MissingVolume)));

        let config = SessionConfig::new("abd.nii.gz");
        assert!(matches!(config.validate(), Err(ConfigError::VolumeId(_))));

        let config = SessionConfig::new("nifti:abd.nii.gz")
            .with_window_level(WindowLevel::new(40.0, 0.0));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidWindow(_))));

        let config = SessionConfig::new("nifti:abd.nii.gz").with_viewports(vec![
            ViewportDescriptor::new("a", Orientation::Axial, "a"),
            ViewportDescriptor::new("a", Orientation::Coronal, "b"),
        ]);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateViewport(id)) if id == "a"));

        let config = SessionConfig::new("nifti:abd.nii.gz").with_viewports(Vec::new());
        assert!(matches!(config.validate(), Err(ConfigError::NoViewports)));
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "volume_id = \"dicom:/data/ct\"\n").unwrap();

        let config = SessionConfig::load_from_path(&path).unwrap();
        assert_eq!(config.volume_id, "dicom:/data/ct");
    }

    #[test]
    fn load_from_path_reports_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            SessionConfig::load_from_path(&missing),
            Err(ConfigError::FileNotFound(_))
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "this is not valid toml {{{").unwrap();
        assert!(matches!(
            SessionConfig::load_from_path(&broken),
            Err(ConfigError::Parse(_))
        ));
    }
}
