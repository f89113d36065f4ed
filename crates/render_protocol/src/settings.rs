use crate::{CameraState, ConfigurationError, RenderConfig, SceneSettings};

/// Camera and render configuration as they were before a job touched them.
///
/// `restore` consumes the snapshot, so a job can restore it at most once.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedSettings {
    camera: CameraState,
    render: RenderConfig,
}

impl SavedSettings {
    pub fn new(camera: CameraState, render: RenderConfig) -> Self {
        Self { camera, render }
    }

    pub fn capture<S: SceneSettings + ?Sized>(scene: &S) -> Result<Self, ConfigurationError> {
        let camera = scene
            .active_camera()
            .ok_or(ConfigurationError::NoActiveCamera)?;
        Ok(Self {
            camera,
            render: scene.render_config(),
        })
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.render
    }

    pub fn restore<S: SceneSettings + ?Sized>(self, scene: &mut S) {
        log::debug!(
            "restoring camera '{}' and render output '{}'",
            self.camera.name,
            self.render.output_file_path.display()
        );
        scene.set_render_config(&self.render);
        scene.set_active_camera(&self.camera);
    }
}
