use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use render_protocol::{
    ImageFormat, PART_RENDER_DIR, Resolution, SubdivisionLevel, TilingMethod,
};
use sequencer::SequencerConfig;
use serde::{Deserialize, Serialize};
use tiles::TileJob;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings '{}'", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Job options, stored as JSON next to the scene.
///
/// Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperResSettings {
    pub tiling_method: TilingMethod,
    pub subdivisions: SubdivisionLevel,
    /// 1-based index of the first tile to render.
    pub start_tile: u32,
    pub poll_interval_ms: u64,
    pub tile_format: ImageFormat,
    /// Tile directory, relative to the project directory.
    pub part_render_dir: PathBuf,
}

impl Default for SuperResSettings {
    fn default() -> Self {
        Self {
            tiling_method: TilingMethod::default(),
            subdivisions: SubdivisionLevel::default(),
            start_tile: 1,
            poll_interval_ms: 500,
            tile_format: ImageFormat::OpenExr,
            part_render_dir: PathBuf::from(PART_RENDER_DIR),
        }
    }
}

impl SuperResSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn tile_job(&self, resolution: Resolution, project_dir: &Path) -> TileJob {
        TileJob {
            resolution,
            level: self.subdivisions,
            method: self.tiling_method,
            tile_format: self.tile_format.clone(),
            output_dir: project_dir.join(&self.part_render_dir),
        }
    }

    pub fn sequencer_config(&self) -> SequencerConfig {
        SequencerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            start_tile: self.start_tile,
        }
    }
}
