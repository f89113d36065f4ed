use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use render_protocol::{
    CameraState, ImageData, RGBA_CHANNELS, RenderConfig, RenderDispatchError, RenderEventSink,
    Renderer, SceneSettings,
};

use crate::image_store::{self, write_image};
use crate::scene::{Pattern, SceneDescription};

/// Sensor width in millimetres, fitted to the wider image axis.
pub const SENSOR_SIZE_MM: f64 = 36.0;

fn rejected(message: impl Into<String>) -> RenderDispatchError {
    RenderDispatchError::Rejected {
        message: message.into(),
    }
}

/// Pixel window and projection of one render.
#[derive(Debug, Clone, Copy)]
struct ViewFrame {
    width: u32,
    height: u32,
    /// Rendered pixels `[x0, x1) x [y0, y1)`, rows counted from the bottom.
    x0: u32,
    x1: u32,
    y0: u32,
    y1: u32,
    crop: bool,
    fit: f64,
    film_scale: f64,
    shift_x: f64,
    shift_y: f64,
}

impl ViewFrame {
    fn new(camera: &CameraState, config: &RenderConfig) -> Result<Self, RenderDispatchError> {
        let width = scaled(config.resolution_x, config.resolution_scale_percent);
        let height = scaled(config.resolution_y, config.resolution_scale_percent);
        if width == 0 || height == 0 {
            return Err(rejected(format!(
                "render size {width}x{height} is empty"
            )));
        }
        if camera.focal_length <= 0.0 {
            return Err(rejected(format!(
                "focal length {} must be positive",
                camera.focal_length
            )));
        }

        let (x0, x1, y0, y1) = if config.use_border {
            let border = &config.border;
            (
                border_edge(border.min_x, width),
                border_edge(border.max_x, width),
                border_edge(border.min_y, height),
                border_edge(border.max_y, height),
            )
        } else {
            (0, width, 0, height)
        };
        if x0 >= x1 || y0 >= y1 {
            return Err(rejected("render border is empty"));
        }

        Ok(Self {
            width,
            height,
            x0,
            x1,
            y0,
            y1,
            crop: config.use_border && config.use_crop_to_border,
            fit: f64::from(width.max(height)),
            film_scale: SENSOR_SIZE_MM / camera.focal_length,
            shift_x: camera.shift_x,
            shift_y: camera.shift_y,
        })
    }

    fn render(&self, pattern: &Pattern) -> ImageData {
        let (left, bottom, out_width, out_height) = if self.crop {
            (self.x0, self.y0, self.x1 - self.x0, self.y1 - self.y0)
        } else {
            (0, 0, self.width, self.height)
        };

        let mut pixels =
            Vec::with_capacity(out_width as usize * out_height as usize * RGBA_CHANNELS as usize);
        for y in bottom..bottom + out_height {
            for x in left..left + out_width {
                let inside = (self.x0..self.x1).contains(&x) && (self.y0..self.y1).contains(&y);
                if inside {
                    let (world_x, world_y) = self.project(x, y);
                    pixels.extend_from_slice(&pattern.sample(world_x, world_y));
                } else {
                    pixels.extend_from_slice(&[0.0; 4]);
                }
            }
        }

        ImageData {
            width: out_width,
            height: out_height,
            channels: RGBA_CHANNELS,
            pixels,
        }
    }

    /// Point on the unit-distance plane seen through the center of pixel `(x, y)`.
    fn project(&self, x: u32, y: u32) -> (f64, f64) {
        let film_x = (f64::from(x) + 0.5 - f64::from(self.width) / 2.0) / self.fit + self.shift_x;
        let film_y = (f64::from(y) + 0.5 - f64::from(self.height) / 2.0) / self.fit + self.shift_y;
        (film_x * self.film_scale, film_y * self.film_scale)
    }
}

fn scaled(resolution: u32, percent: u32) -> u32 {
    (u64::from(resolution) * u64::from(percent) / 100) as u32
}

fn border_edge(fraction: f64, length: u32) -> u32 {
    (fraction.clamp(0.0, 1.0) * f64::from(length)).round() as u32
}

/// Renders what `camera` sees of `pattern` under `config`.
pub fn render_view(
    camera: &CameraState,
    config: &RenderConfig,
    pattern: &Pattern,
) -> Result<ImageData, RenderDispatchError> {
    Ok(ViewFrame::new(camera, config)?.render(pattern))
}

/// Headless stand-in for the host renderer.
///
/// Each render runs on a worker thread, writes the configured output file
/// and reports through the registered [`RenderEventSink`].
#[derive(Debug)]
pub struct SoftwareRenderer {
    scene: SceneDescription,
    sink: Option<RenderEventSink>,
    worker: Option<JoinHandle<()>>,
    /// Cleared by the worker before it reports the end of a render.
    busy: Arc<AtomicBool>,
}

impl SoftwareRenderer {
    pub fn new(scene: SceneDescription) -> Self {
        Self {
            scene,
            sink: None,
            worker: None,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn scene(&self) -> &SceneDescription {
        &self.scene
    }

    /// Blocks until the render in progress, if any, has ended.
    pub fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("render worker panicked");
            }
        }
    }

    pub fn into_scene(mut self) -> SceneDescription {
        self.wait();
        self.scene
    }
}

impl SceneSettings for SoftwareRenderer {
    fn active_camera(&self) -> Option<CameraState> {
        self.scene.active_camera()
    }

    fn set_active_camera(&mut self, camera: &CameraState) {
        self.scene.set_active_camera(camera);
    }

    fn render_config(&self) -> RenderConfig {
        self.scene.render_config()
    }

    fn set_render_config(&mut self, config: &RenderConfig) {
        self.scene.set_render_config(config);
    }
}

impl Renderer for SoftwareRenderer {
    fn register_observers(&mut self, sink: RenderEventSink) {
        self.sink = Some(sink);
    }

    fn unregister_observers(&mut self) {
        self.sink = None;
    }

    fn render_active_view(&mut self) -> Result<(), RenderDispatchError> {
        if self.busy.load(Ordering::Acquire) {
            return Err(RenderDispatchError::Busy);
        }
        self.wait();

        let camera = self
            .scene
            .active_camera
            .clone()
            .ok_or_else(|| rejected("no active camera"))?;
        let config = self.scene.render.clone();
        image_store::codec(&config.image_format).map_err(|error| rejected(error.to_string()))?;
        let frame = ViewFrame::new(&camera, &config)?;
        let pattern = self.scene.pattern;
        let sink = self.sink.clone();
        let busy = Arc::clone(&self.busy);
        busy.store(true, Ordering::Release);

        let worker = thread::Builder::new()
            .name("superres-render".to_owned())
            .spawn(move || {
                if let Some(sink) = &sink {
                    sink.render_started();
                }
                let image = frame.render(&pattern);
                let path = &config.output_file_path;
                let written = write_image(&image, path, &config.image_format);
                busy.store(false, Ordering::Release);
                match written {
                    Ok(()) => {
                        log::debug!("wrote {}", path.display());
                        if let Some(sink) = &sink {
                            sink.render_finished();
                        }
                    }
                    Err(error) => {
                        log::error!("{error}");
                        if let Some(sink) = &sink {
                            sink.render_failed(error.to_string());
                        }
                    }
                }
            })
            .map_err(|error| {
                self.busy.store(false, Ordering::Release);
                rejected(format!("cannot start render worker: {error}"))
            })?;
        self.worker = Some(worker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crossbeam_channel::unbounded;
    use render_protocol::{BorderRect, ImageFormat, LensUnit, SequencerEvent};

    use super::*;

    fn camera() -> CameraState {
        CameraState {
            name: "Camera".to_owned(),
            focal_length: 50.0,
            aperture_fstop: 2.8,
            shift_x: 0.0,
            shift_y: 0.0,
            lens_unit: LensUnit::Millimeters,
        }
    }

    fn config(width: u32, height: u32) -> RenderConfig {
        RenderConfig {
            output_file_path: PathBuf::from("render.exr"),
            image_format: ImageFormat::OpenExr,
            resolution_scale_percent: 100,
            resolution_x: width,
            resolution_y: height,
            use_border: false,
            use_crop_to_border: false,
            border: BorderRect::FULL,
        }
    }

    fn pixel(image: &ImageData, x: u32, y: u32) -> &[f32] {
        let start = ((y * image.width + x) * RGBA_CHANNELS) as usize;
        &image.pixels[start..start + RGBA_CHANNELS as usize]
    }

    #[test]
    fn resolution_percentage_scales_output() {
        let mut config = config(200, 100);
        config.resolution_scale_percent = 50;
        let image = render_view(&camera(), &config, &Pattern::default()).expect("render");
        assert_eq!((image.width, image.height), (100, 50));
        assert_eq!(image.pixels.len(), 100 * 50 * 4);
    }

    #[test]
    fn cropped_border_matches_the_full_frame_region() {
        let full = render_view(&camera(), &config(80, 60), &Pattern::default()).expect("full");

        let mut cropped_config = config(80, 60);
        cropped_config.use_border = true;
        cropped_config.use_crop_to_border = true;
        cropped_config.border = BorderRect {
            min_x: 0.25,
            min_y: 0.5,
            max_x: 0.75,
            max_y: 1.0,
        };
        let cropped =
            render_view(&camera(), &cropped_config, &Pattern::default()).expect("cropped");
        assert_eq!((cropped.width, cropped.height), (40, 30));
        for y in 0..30 {
            for x in 0..40 {
                assert_eq!(pixel(&cropped, x, y), pixel(&full, x + 20, y + 30));
            }
        }
    }

    #[test]
    fn uncropped_border_blanks_the_outside() {
        let mut config = config(40, 40);
        config.use_border = true;
        config.border = BorderRect {
            min_x: 0.5,
            min_y: 0.0,
            max_x: 1.0,
            max_y: 0.5,
        };
        let image = render_view(&camera(), &config, &Pattern::default()).expect("render");
        assert_eq!((image.width, image.height), (40, 40));
        assert_eq!(pixel(&image, 0, 39), &[0.0; 4]);
        assert_eq!(pixel(&image, 30, 10)[3], 1.0);
    }

    #[test]
    fn shifted_zoomed_camera_sees_one_quadrant() {
        let full = render_view(&camera(), &config(64, 64), &Pattern::default()).expect("full");
        // Top-left quadrant: double focal length, shift half a frame left and up.
        let mut quadrant_camera = camera();
        quadrant_camera.focal_length = 100.0;
        quadrant_camera.shift_x = -0.5;
        quadrant_camera.shift_y = 0.5;
        let quadrant = render_view(&quadrant_camera, &config(32, 32), &Pattern::default())
            .expect("quadrant");
        for y in 0..32 {
            for x in 0..32 {
                let expected = pixel(&full, x, y + 32);
                let actual = pixel(&quadrant, x, y);
                for (a, b) in actual.iter().zip(expected) {
                    assert!((a - b).abs() < 1e-5, "({x}, {y}): {actual:?} vs {expected:?}");
                }
            }
        }
    }

    #[test]
    fn empty_border_is_rejected() {
        let mut config = config(40, 40);
        config.use_border = true;
        config.border = BorderRect {
            min_x: 0.5,
            min_y: 0.0,
            max_x: 0.5,
            max_y: 1.0,
        };
        assert!(matches!(
            render_view(&camera(), &config, &Pattern::default()),
            Err(RenderDispatchError::Rejected { .. })
        ));
    }

    #[test]
    fn worker_writes_the_file_and_reports_completion() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut config = config(16, 8);
        config.output_file_path = dir.path().join("PartRenders/Part_R01_C01.exr");
        let mut renderer = SoftwareRenderer::new(SceneDescription::new(Some(camera()), config));
        let (sender, receiver) = unbounded();
        renderer.register_observers(RenderEventSink::new(sender));

        renderer.render_active_view().expect("dispatch");
        renderer.wait();

        let events: Vec<SequencerEvent> = receiver.try_iter().collect();
        assert_eq!(
            events,
            vec![SequencerEvent::RenderStarted, SequencerEvent::RenderFinished]
        );
        let written = image_store::read_image(&dir.path().join("PartRenders/Part_R01_C01.exr"))
            .expect("tile written");
        assert_eq!((written.width, written.height), (16, 8));
    }

    #[test]
    fn worker_reports_write_errors_as_failures() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::write(dir.path().join("PartRenders"), b"not a directory").expect("blocker");
        let mut config = config(16, 8);
        config.output_file_path = dir.path().join("PartRenders/Part_R01_C01.exr");
        let mut renderer = SoftwareRenderer::new(SceneDescription::new(Some(camera()), config));
        let (sender, receiver) = unbounded();
        renderer.register_observers(RenderEventSink::new(sender));

        renderer.render_active_view().expect("dispatch");
        renderer.wait();

        let events: Vec<SequencerEvent> = receiver.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SequencerEvent::RenderStarted);
        assert!(matches!(events[1], SequencerEvent::RenderFailed { .. }));
    }

    #[test]
    fn dispatch_without_camera_is_rejected() {
        let mut renderer = SoftwareRenderer::new(SceneDescription::new(None, config(8, 8)));
        assert!(matches!(
            renderer.render_active_view(),
            Err(RenderDispatchError::Rejected { .. })
        ));
    }
}
