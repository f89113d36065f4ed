//! Headless super resolution rendering.
//!
//! A [`Project`] is a scene file plus job settings. Rendering drives the
//! tile sequencer against the software renderer, merging reassembles the
//! tiles written under the project directory.

mod camera_split;
mod config;
mod image_store;
mod notifier;
mod scene;
mod software_renderer;

use std::path::{Path, PathBuf};
use std::thread;

use compositor::{CompositeError, MergeOutput, TileCompositor};
use crossbeam_channel::{Receiver, Sender};
use render_protocol::{
    ConfigurationError, Notifier, RenderStatus, RenderTileDescriptor, SavedSettings,
    SequencerEvent, Severity, output_file_name,
};
use sequencer::{JobOutcome, RenderSequencer, SequencerError};
use tiles::{TileJob, plan_render_tiles};

pub use camera_split::{SplitCameraError, split_active_camera};
pub use config::{SettingsError, SuperResSettings};
pub use image_store::{FileImageStore, read_image, write_image};
pub use notifier::LogNotifier;
pub use scene::{CameraGroup, Pattern, SceneDescription, SceneError};
pub use software_renderer::{SENSOR_SIZE_MM, SoftwareRenderer, render_view};

const RENDER_TITLE: &str = "Super Resolution Render";
const MERGE_TITLE: &str = "Super Resolution Merge";

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error(transparent)]
    SplitCamera(#[from] SplitCameraError),
}

/// Stops a running render from another thread.
///
/// Both requests take effect on the next poll; a tile already rendering is
/// finished first.
#[derive(Debug, Clone)]
pub struct RenderControl {
    events: Sender<SequencerEvent>,
    progress: Receiver<RenderStatus>,
}

impl RenderControl {
    /// Ends the job after the current tile. Returns false once the job is over.
    pub fn stop(&self) -> bool {
        self.events.send(SequencerEvent::StopRequested).is_ok()
    }

    pub fn cancel(&self) -> bool {
        self.events.send(SequencerEvent::CancelRequested).is_ok()
    }

    /// Status snapshots, ending when the job does.
    pub fn progress(&self) -> &Receiver<RenderStatus> {
        &self.progress
    }
}

/// A scene file and the settings of the jobs run on it.
///
/// Tiles and the merged image live next to the scene file.
#[derive(Debug, Clone)]
pub struct Project {
    scene_path: PathBuf,
    project_dir: PathBuf,
    pub scene: SceneDescription,
    pub settings: SuperResSettings,
}

impl Project {
    pub fn new(scene_path: &Path, scene: SceneDescription, settings: SuperResSettings) -> Self {
        let project_dir = scene_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            scene_path: scene_path.to_path_buf(),
            project_dir,
            scene,
            settings,
        }
    }

    /// Loads the scene and, if given, the settings file. Missing settings
    /// fall back to defaults.
    pub fn open(scene_path: &Path, settings_path: Option<&Path>) -> Result<Self, ProjectError> {
        let scene = SceneDescription::load(scene_path)?;
        let settings = match settings_path {
            Some(path) => SuperResSettings::load(path)?,
            None => SuperResSettings::default(),
        };
        Ok(Self::new(scene_path, scene, settings))
    }

    pub fn scene_path(&self) -> &Path {
        &self.scene_path
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn save_scene(&self) -> Result<(), ProjectError> {
        self.scene.save(&self.scene_path)?;
        Ok(())
    }

    pub fn tile_job(&self) -> Result<TileJob, ProjectError> {
        let resolution = self.scene.render.resolution()?;
        Ok(self.settings.tile_job(resolution, &self.project_dir))
    }

    pub fn merge_output(&self) -> MergeOutput {
        let format = self.scene.render.image_format.clone();
        MergeOutput {
            path: self.project_dir.join(output_file_name(&format)),
            format,
        }
    }

    /// Render descriptors for the current scene, without touching it.
    pub fn plan(&self) -> Result<Vec<RenderTileDescriptor>, ProjectError> {
        let saved = SavedSettings::capture(&self.scene)?;
        Ok(plan_render_tiles(&self.tile_job()?, &saved)?)
    }

    /// Renders every tile of the job and writes the restored scene back.
    ///
    /// While the job runs the scene file carries the running status, so an
    /// interrupted job is detected the next time the scene is loaded.
    pub fn render<N: Notifier + ?Sized>(
        &mut self,
        notifier: &N,
    ) -> Result<JobOutcome, ProjectError> {
        self.render_with_control(notifier, |_| {})
    }

    /// Like [`Self::render`], handing `on_start` a [`RenderControl`] once
    /// the job has started.
    pub fn render_with_control<N, F>(
        &mut self,
        notifier: &N,
        on_start: F,
    ) -> Result<JobOutcome, ProjectError>
    where
        N: Notifier + ?Sized,
        F: FnOnce(RenderControl),
    {
        let job = self.tile_job()?;
        let mut renderer = SoftwareRenderer::new(self.scene.clone());
        let mut sequencer = RenderSequencer::new(self.settings.sequencer_config());

        let progress = sequencer.subscribe();
        let reporter = thread::Builder::new()
            .name("superres-progress".to_owned())
            .spawn(move || {
                for status in progress {
                    if status.is_rendering {
                        log::info!(
                            "progress: {:.1}% ({}/{})",
                            status.percent_complete(),
                            status.tiles_done,
                            status.tiles_total
                        );
                    }
                }
            })
            .map_err(|error| log::warn!("progress reporting disabled: {error}"))
            .ok();

        if let Err(error) = sequencer.start(&mut renderer, &job) {
            notifier.notify(&error.to_string(), RENDER_TITLE, Severity::Error);
            return Err(error.into());
        }
        self.persist_status(sequencer.status())?;
        on_start(RenderControl {
            events: sequencer.event_sender(),
            progress: sequencer.subscribe(),
        });

        let result = sequencer.run(&mut renderer, notifier);
        drop(sequencer);
        if let Some(reporter) = reporter {
            if reporter.join().is_err() {
                log::warn!("progress reporter panicked");
            }
        }

        self.scene = renderer.into_scene();
        self.scene.status = RenderStatus::default();
        self.save_scene()?;
        Ok(result?)
    }

    fn persist_status(&self, status: RenderStatus) -> Result<(), ProjectError> {
        let mut running = self.scene.clone();
        running.status = status;
        running.save(&self.scene_path)?;
        Ok(())
    }

    /// Combines the rendered tiles into the final image and returns its path.
    pub fn merge<N: Notifier + ?Sized>(&self, notifier: &N) -> Result<PathBuf, ProjectError> {
        let job = self.tile_job()?;
        let output = self.merge_output();
        let mut store = FileImageStore::new();

        match TileCompositor::new(&mut store).merge_job(&job, &output) {
            Ok(_) => {
                notifier.notify(
                    &format!(
                        "Merged {} tiles into {}",
                        job.level.total_tiles(),
                        output.path.display()
                    ),
                    MERGE_TITLE,
                    Severity::Info,
                );
                Ok(output.path)
            }
            Err(error) => {
                notifier.notify(&format!("Merge failed: {error}"), MERGE_TITLE, Severity::Error);
                Err(error.into())
            }
        }
    }

    /// Adds one camera per tile to the scene and saves it.
    pub fn split_camera<N: Notifier + ?Sized>(
        &mut self,
        notifier: &N,
    ) -> Result<Vec<String>, ProjectError> {
        let names = split_active_camera(&mut self.scene, notifier, self.settings.subdivisions)?;
        self.save_scene()?;
        Ok(names)
    }
}
