//! JSON scene file for the headless host.

use std::fs;
use std::path::{Path, PathBuf};

use render_protocol::{
    CameraRig, CameraRigError, CameraState, RenderConfig, RenderStatus, SceneSettings,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("failed to read scene '{}'", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scene '{}'", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write scene '{}'", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize scene")]
    Serialize(#[source] serde_json::Error),
}

/// Procedural content the software renderer draws on the plane in front of
/// the camera. Coordinates are in sensor millimetres over focal length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pattern {
    Waves { frequency: f64 },
    Checker { cell_size: f64 },
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern::Waves { frequency: 9.0 }
    }
}

impl Pattern {
    pub fn sample(&self, x: f64, y: f64) -> [f32; 4] {
        match *self {
            Pattern::Waves { frequency } => [
                (0.5 + 0.5 * (x * frequency).sin()) as f32,
                (0.5 + 0.5 * (y * frequency).cos()) as f32,
                (0.5 + 0.5 * ((x + y) * frequency * 0.5).sin()) as f32,
                1.0,
            ],
            Pattern::Checker { cell_size } => {
                let cell = (x / cell_size).floor() + (y / cell_size).floor();
                let value = if cell.rem_euclid(2.0) < 1.0 { 0.9 } else { 0.1 };
                [value, value, value, 1.0]
            }
        }
    }
}

/// Cameras created from one camera by a split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraGroup {
    pub name: String,
    /// Camera the group was placed at.
    pub origin_camera: Option<String>,
    #[serde(default)]
    pub cameras: Vec<CameraState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub active_camera: Option<CameraState>,
    pub render: RenderConfig,
    #[serde(default)]
    pub pattern: Pattern,
    #[serde(default)]
    pub status: RenderStatus,
    #[serde(default)]
    pub camera_groups: Vec<CameraGroup>,
}

impl SceneDescription {
    pub fn new(active_camera: Option<CameraState>, render: RenderConfig) -> Self {
        Self {
            active_camera,
            render,
            pattern: Pattern::default(),
            status: RenderStatus::default(),
            camera_groups: Vec::new(),
        }
    }

    /// Loads a scene, clearing any render status an interrupted job left behind.
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let text = fs::read_to_string(path).map_err(|source| SceneError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut scene: SceneDescription =
            serde_json::from_str(&text).map_err(|source| SceneError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        scene.status.reset_after_reload();
        Ok(scene)
    }

    pub fn save(&self, path: &Path) -> Result<(), SceneError> {
        let text = serde_json::to_string_pretty(self).map_err(SceneError::Serialize)?;
        fs::write(path, text).map_err(|source| SceneError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn camera_group(&self, name: &str) -> Option<&CameraGroup> {
        self.camera_groups.iter().find(|group| group.name == name)
    }

    fn camera_name_taken(&self, name: &str) -> bool {
        let active = self
            .active_camera
            .as_ref()
            .is_some_and(|camera| camera.name == name);
        active
            || self
                .camera_groups
                .iter()
                .flat_map(|group| &group.cameras)
                .any(|camera| camera.name == name)
    }
}

impl SceneSettings for SceneDescription {
    fn active_camera(&self) -> Option<CameraState> {
        self.active_camera.clone()
    }

    fn set_active_camera(&mut self, camera: &CameraState) {
        self.active_camera = Some(camera.clone());
    }

    fn render_config(&self) -> RenderConfig {
        self.render.clone()
    }

    fn set_render_config(&mut self, config: &RenderConfig) {
        self.render = config.clone();
    }
}

impl CameraRig for SceneDescription {
    fn create_camera_group(&mut self, name: &str) -> Result<(), CameraRigError> {
        if self.camera_group(name).is_some() {
            return Err(CameraRigError::GroupExists {
                name: name.to_owned(),
            });
        }
        self.camera_groups.push(CameraGroup {
            name: name.to_owned(),
            origin_camera: self.active_camera.as_ref().map(|camera| camera.name.clone()),
            cameras: Vec::new(),
        });
        Ok(())
    }

    fn add_camera_to_group(
        &mut self,
        group: &str,
        camera: CameraState,
    ) -> Result<(), CameraRigError> {
        if self.camera_name_taken(&camera.name) {
            return Err(CameraRigError::CameraExists { name: camera.name });
        }
        let Some(target) = self
            .camera_groups
            .iter_mut()
            .find(|candidate| candidate.name == group)
        else {
            return Err(CameraRigError::UnknownGroup {
                name: group.to_owned(),
            });
        };
        target.cameras.push(camera);
        Ok(())
    }
}
