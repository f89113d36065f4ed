use std::collections::HashMap;
use std::path::{Path, PathBuf};

use render_protocol::{
    BorderRect, CameraState, ImageFormat, LensUnit, RenderConfig, RenderTileDescriptor,
    SavedSettings, SubdivisionLevel, TileRenderSettings, TilingMethod,
};
use slotmap::SlotMap;
use tiles::{TileJob, plan_render_tiles};

use super::*;

/// Image store over an in-memory "disk".
#[derive(Default)]
struct MemoryImageStore {
    disk: HashMap<PathBuf, ImageData>,
    images: SlotMap<ImageHandle, (String, ImageData)>,
    saved: Vec<(PathBuf, ImageFormat, ImageData)>,
    loads: usize,
}

impl ImageStore for MemoryImageStore {
    fn load_image(&mut self, path: &Path) -> Result<ImageHandle, ImageStoreError> {
        let data = self
            .disk
            .get(path)
            .cloned()
            .ok_or_else(|| ImageStoreError::Load {
                path: path.to_path_buf(),
                message: "no such file".to_owned(),
            })?;
        self.loads += 1;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self.images.insert((name, data)))
    }

    fn image(&self, handle: ImageHandle) -> Option<&ImageData> {
        self.images.get(handle).map(|(_, data)| data)
    }

    fn release_image(&mut self, handle: ImageHandle) {
        self.images.remove(handle);
    }

    fn find_image(&self, name: &str) -> Option<ImageHandle> {
        self.images
            .iter()
            .find(|(_, (image_name, _))| image_name == name)
            .map(|(handle, _)| handle)
    }

    fn create_image(
        &mut self,
        name: &str,
        data: ImageData,
    ) -> Result<ImageHandle, ImageStoreError> {
        Ok(self.images.insert((name.to_owned(), data)))
    }

    fn save_image(
        &mut self,
        handle: ImageHandle,
        path: &Path,
        format: &ImageFormat,
    ) -> Result<(), ImageStoreError> {
        let (_, data) = self
            .images
            .get(handle)
            .ok_or(ImageStoreError::UnknownHandle)?;
        self.saved
            .push((path.to_path_buf(), format.clone(), data.clone()));
        Ok(())
    }
}

fn output() -> MergeOutput {
    MergeOutput {
        path: PathBuf::from("/project/super_res_render_output.png"),
        format: ImageFormat::Png,
    }
}

fn job(width: u32, height: u32, level: SubdivisionLevel, method: TilingMethod) -> TileJob {
    TileJob {
        resolution: Resolution::new(width, height).expect("resolution"),
        level,
        method,
        tile_format: ImageFormat::OpenExr,
        output_dir: PathBuf::from("/project/PartRenders"),
    }
}

fn saved_settings(width: u32, height: u32) -> SavedSettings {
    SavedSettings::new(
        CameraState {
            name: "Camera".to_owned(),
            focal_length: 50.0,
            aperture_fstop: 2.8,
            shift_x: 0.0,
            shift_y: 0.0,
            lens_unit: LensUnit::Millimeters,
        },
        RenderConfig {
            output_file_path: PathBuf::from("/tmp/out"),
            image_format: ImageFormat::Png,
            resolution_scale_percent: 100,
            resolution_x: width,
            resolution_y: height,
            use_border: false,
            use_crop_to_border: false,
            border: BorderRect::FULL,
        },
    )
}

/// RGBA image whose samples encode their own position, rows bottom-to-top.
fn gradient(width: u32, height: u32) -> ImageData {
    let mut pixels = Vec::with_capacity((width * height * RGBA_CHANNELS) as usize);
    for y in 0..height {
        for x in 0..width {
            pixels.extend_from_slice(&[x as f32, y as f32, (x + y) as f32 / 7.0, 1.0]);
        }
    }
    ImageData {
        width,
        height,
        channels: RGBA_CHANNELS,
        pixels,
    }
}

fn solid(width: u32, height: u32, channels: u32) -> ImageData {
    ImageData {
        width,
        height,
        channels,
        pixels: vec![0.5; (width * height * channels) as usize],
    }
}

/// Bottom-left pixel of the region a tile renders, in bottom-to-top rows.
fn rendered_region(tile: &RenderTileDescriptor, width: u32, height: u32) -> (u32, u32) {
    let (width, height) = (f64::from(width), f64::from(height));
    let (tile_x, tile_y) = (f64::from(tile.tile_x), f64::from(tile.tile_y));
    let (left, bottom) = match &tile.settings {
        TileRenderSettings::CameraShift { camera } => {
            let widest = tile_x.max(tile_y);
            let center_x = camera.shift_x * widest + width / 2.0;
            let center_y = camera.shift_y * widest + height / 2.0;
            (center_x - tile_x / 2.0, center_y - tile_y / 2.0)
        }
        TileRenderSettings::RenderBorder { border } => (border.min_x * width, border.min_y * height),
        TileRenderSettings::CameraSplit { .. } => panic!("split cameras are not rendered"),
    };
    (left.round() as u32, bottom.round() as u32)
}

/// Renders each tile by cutting its region out of `source`.
fn render_tiles(store: &mut MemoryImageStore, source: &ImageData, tiles: &[RenderTileDescriptor]) {
    let channels = RGBA_CHANNELS as usize;
    for tile in tiles {
        let (left, bottom) = rendered_region(tile, source.width, source.height);
        assert!(left + tile.tile_x <= source.width, "{tile:?}");
        assert!(bottom + tile.tile_y <= source.height, "{tile:?}");

        let mut pixels = Vec::new();
        for y in bottom..bottom + tile.tile_y {
            let start = (y as usize * source.width as usize + left as usize) * channels;
            let end = start + tile.tile_x as usize * channels;
            pixels.extend_from_slice(&source.pixels[start..end]);
        }
        store.disk.insert(
            tile.output_path.clone(),
            ImageData {
                width: tile.tile_x,
                height: tile.tile_y,
                channels: RGBA_CHANNELS,
                pixels,
            },
        );
    }
}

#[test]
fn merging_rendered_tiles_reproduces_the_source_exactly() {
    for (width, height) in [(250, 160), (97, 33)] {
        for level in SubdivisionLevel::all() {
            if width == 97 && level.level() > 2 {
                continue;
            }
            for method in [TilingMethod::CameraShift, TilingMethod::RenderBorder] {
                let job = job(width, height, level, method);
                let source = gradient(width, height);
                let tiles = plan_render_tiles(&job, &saved_settings(width, height))
                    .expect("render plan");

                let mut store = MemoryImageStore::default();
                render_tiles(&mut store, &source, &tiles);
                let handle = TileCompositor::new(&mut store)
                    .merge_job(&job, &output())
                    .expect("merge should succeed");

                let (path, format, saved) = store.saved.last().expect("output saved");
                assert_eq!(path, &output().path);
                assert_eq!(format, &ImageFormat::Png);
                assert_eq!(saved, &source, "{width}x{height} {level:?} {method:?}");
                assert_eq!(store.image(handle), Some(&source));
                assert_eq!(store.loads, tiles.len());
                assert_eq!(store.images.len(), 1, "only the output stays loaded");
            }
        }
    }
}

#[test]
fn wrong_tile_dimensions_abort_without_writing() {
    let job = job(100, 100, SubdivisionLevel::default(), TilingMethod::RenderBorder);
    let tiles = plan_merge_tiles(&job).expect("merge plan");
    let mut store = MemoryImageStore::default();
    for tile in &tiles {
        store
            .disk
            .insert(tile.source_path.clone(), solid(50, 50, RGBA_CHANNELS));
    }
    store
        .disk
        .insert(tiles[2].source_path.clone(), solid(50, 49, RGBA_CHANNELS));

    let error = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect_err("tile 3 has the wrong height");

    assert_eq!(
        error,
        CompositeError::DimensionMismatch {
            path: tiles[2].source_path.clone(),
            expected: (50, 50),
            actual: (50, 49),
        }
    );
    assert!(store.saved.is_empty());
    assert!(store.images.is_empty(), "failed tile must be released");
    assert_eq!(store.loads, 3);
}

#[test]
fn three_channel_tile_is_rejected() {
    let job = job(100, 100, SubdivisionLevel::default(), TilingMethod::CameraShift);
    let tiles = plan_merge_tiles(&job).expect("merge plan");
    let mut store = MemoryImageStore::default();
    for tile in &tiles {
        store.disk.insert(tile.source_path.clone(), solid(50, 50, 3));
    }

    let error = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect_err("RGB tiles cannot be merged");
    assert_eq!(
        error,
        CompositeError::ChannelCount {
            path: tiles[0].source_path.clone(),
            expected: 4,
            actual: 3,
        }
    );
    assert!(store.saved.is_empty());
    assert!(store.images.is_empty());
}

#[test]
fn missing_tile_file_is_reported() {
    let job = job(100, 100, SubdivisionLevel::default(), TilingMethod::CameraShift);
    let mut store = MemoryImageStore::default();
    let error = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect_err("no tiles were rendered");
    assert!(matches!(
        error,
        CompositeError::ImageStore(ImageStoreError::Load { .. })
    ));
    assert!(store.saved.is_empty());
}

#[test]
fn incomplete_plan_is_a_size_mismatch() {
    let job = job(100, 100, SubdivisionLevel::default(), TilingMethod::CameraShift);
    let tiles = plan_merge_tiles(&job).expect("merge plan");
    let mut store = MemoryImageStore::default();
    for tile in &tiles {
        store
            .disk
            .insert(tile.source_path.clone(), solid(50, 50, RGBA_CHANNELS));
    }

    let error = TileCompositor::new(&mut store)
        .merge(&tiles[..3], job.resolution, &output())
        .expect_err("one tile missing from the plan");
    assert_eq!(
        error,
        CompositeError::SizeMismatch {
            expected: 40_000,
            actual: 30_000,
        }
    );
    assert!(store.saved.is_empty());
}

#[test]
fn tile_outside_the_output_is_rejected_before_loading() {
    let job = job(100, 100, SubdivisionLevel::default(), TilingMethod::CameraShift);
    let mut tiles = plan_merge_tiles(&job).expect("merge plan");
    tiles[1].dest_offset_x = 60;
    let mut store = MemoryImageStore::default();
    for tile in &tiles {
        store
            .disk
            .insert(tile.source_path.clone(), solid(50, 50, RGBA_CHANNELS));
    }

    let error = TileCompositor::new(&mut store)
        .merge(&tiles, job.resolution, &output())
        .expect_err("tile overhangs the right edge");
    assert!(matches!(
        error,
        CompositeError::TileOutOfBounds { row: 0, col: 1, .. }
    ));
    assert_eq!(store.loads, 1);
}

#[test]
fn previous_output_image_is_replaced() {
    let job = job(64, 32, SubdivisionLevel::default(), TilingMethod::RenderBorder);
    let tiles = plan_merge_tiles(&job).expect("merge plan");
    let mut store = MemoryImageStore::default();
    for tile in &tiles {
        store
            .disk
            .insert(tile.source_path.clone(), solid(32, 16, RGBA_CHANNELS));
    }

    let first = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect("first merge");
    let second = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect("second merge");

    assert_ne!(first, second);
    assert!(store.image(first).is_none(), "old output released");
    assert_eq!(store.find_image(OUTPUT_IMAGE_NAME), Some(second));
    assert_eq!(store.saved.len(), 2);
}

#[test]
fn planner_errors_surface_before_allocation() {
    let job = job(3, 3, SubdivisionLevel::new(2).expect("level"), TilingMethod::CameraShift);
    let mut store = MemoryImageStore::default();
    let error = TileCompositor::new(&mut store)
        .merge_job(&job, &output())
        .expect_err("3 pixels cannot be split four ways");
    assert!(matches!(
        error,
        CompositeError::Configuration(ConfigurationError::ResolutionTooSmall { .. })
    ));
}
