//! Capabilities the tiling core consumes from the host application.
//!
//! The host owns the camera, the render configuration, the render engine and
//! image memory. The core only reaches them through these traits, so tests
//! drive it with fakes that complete renders whenever they choose.

use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;

use crate::{CameraState, ImageFormat, RenderConfig};

slotmap::new_key_type! {
    pub struct ImageHandle;
}

/// Read and write access to the scene state a render job rewrites per tile.
pub trait SceneSettings {
    fn active_camera(&self) -> Option<CameraState>;
    fn set_active_camera(&mut self, camera: &CameraState);
    fn render_config(&self) -> RenderConfig;
    fn set_render_config(&mut self, config: &RenderConfig);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderDispatchError {
    #[error("render service is busy with another render")]
    Busy,
    #[error("render service rejected the request: {message}")]
    Rejected { message: String },
}

/// The host render service.
///
/// `render_active_view` must not block on the render: completion is reported
/// later through the [`RenderEventSink`] handed to `register_observers`.
pub trait Renderer: SceneSettings {
    fn register_observers(&mut self, sink: RenderEventSink);
    fn unregister_observers(&mut self);
    fn render_active_view(&mut self) -> Result<(), RenderDispatchError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CameraRigError {
    #[error("camera group '{name}' already exists")]
    GroupExists { name: String },
    #[error("camera group '{name}' does not exist")]
    UnknownGroup { name: String },
    #[error("camera '{name}' already exists")]
    CameraExists { name: String },
}

/// Host support for persisting extra camera objects.
pub trait CameraRig: SceneSettings {
    /// Creates an empty group placed and parented like the active camera.
    fn create_camera_group(&mut self, name: &str) -> Result<(), CameraRigError>;
    fn add_camera_to_group(
        &mut self,
        group: &str,
        camera: CameraState,
    ) -> Result<(), CameraRigError>;
}

/// Decoded image pixels as float samples, rows stored bottom-to-top.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageStoreError {
    #[error("failed to load image '{}': {message}", .path.display())]
    Load { path: PathBuf, message: String },
    #[error("failed to save image '{}': {message}", .path.display())]
    Save { path: PathBuf, message: String },
    #[error("image format {format} is not supported by this image store")]
    UnsupportedFormat { format: ImageFormat },
    #[error("image handle does not belong to this image store")]
    UnknownHandle,
    #[error("image data has {actual} samples, expected {expected}")]
    PixelDataLength { expected: usize, actual: usize },
}

/// Host image memory. Every handle returned must eventually be released.
pub trait ImageStore {
    fn load_image(&mut self, path: &Path) -> Result<ImageHandle, ImageStoreError>;
    fn image(&self, handle: ImageHandle) -> Option<&ImageData>;
    fn release_image(&mut self, handle: ImageHandle);
    fn find_image(&self, name: &str) -> Option<ImageHandle>;
    fn create_image(&mut self, name: &str, data: ImageData)
    -> Result<ImageHandle, ImageStoreError>;
    fn save_image(
        &mut self,
        handle: ImageHandle,
        path: &Path,
        format: &ImageFormat,
    ) -> Result<(), ImageStoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

pub trait Notifier {
    fn notify(&self, message: &str, title: &str, severity: Severity);
}

/// Everything the render sequencer reacts to, processed one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerEvent {
    /// Periodic poll.
    Tick,
    RenderStarted,
    RenderFinished,
    /// The host aborted the current render, e.g. its own stop control.
    RenderCancelled,
    /// The current render could not produce its output.
    RenderFailed { message: String },
    /// Escape-style cancel from the user.
    CancelRequested,
    /// Stop button from the job's own controls.
    StopRequested,
}

/// Observer handle the host uses to report render progress.
#[derive(Debug, Clone)]
pub struct RenderEventSink {
    sender: Sender<SequencerEvent>,
}

impl RenderEventSink {
    pub fn new(sender: Sender<SequencerEvent>) -> Self {
        Self { sender }
    }

    pub fn render_started(&self) {
        self.send(SequencerEvent::RenderStarted);
    }

    pub fn render_finished(&self) {
        self.send(SequencerEvent::RenderFinished);
    }

    pub fn render_cancelled(&self) {
        self.send(SequencerEvent::RenderCancelled);
    }

    pub fn render_failed(&self, message: impl Into<String>) {
        self.send(SequencerEvent::RenderFailed {
            message: message.into(),
        });
    }

    fn send(&self, event: SequencerEvent) {
        // A closed queue means the job already ended; late host signals are moot.
        if let Err(error) = self.sender.send(event) {
            log::debug!("dropping {:?}: sequencer event queue closed", error.0);
        }
    }
}
