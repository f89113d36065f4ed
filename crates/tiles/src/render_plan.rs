use render_protocol::{
    BorderRect, CameraState, CameraTileSettings, ConfigurationError, RenderTileDescriptor,
    SavedSettings, TileRenderSettings, TilingMethod, tile_suffix,
};

use crate::{TileGrid, TileJob};

/// Derives one render descriptor per grid cell, row-major from the top-left.
///
/// The result depends only on `job` and the saved camera; nothing is mutated.
pub fn plan_render_tiles(
    job: &TileJob,
    saved: &SavedSettings,
) -> Result<Vec<RenderTileDescriptor>, ConfigurationError> {
    let grid = job.grid()?;
    let camera = saved.camera();
    let frame = CameraFrame::new(&grid, camera);

    log::debug!(
        "planning {} tiles ({}x{}) over {} by {}: tile {:?}, last tile {:?}",
        grid.total_tiles(),
        grid.tiles_per_side(),
        grid.tiles_per_side(),
        job.resolution,
        job.method,
        grid.max_tile(),
        grid.last_tile()
    );

    let tiles = grid
        .cells()
        .map(|(row, col)| {
            let (tile_x, tile_y) = grid.tile_size(row, col);
            let settings = match job.method {
                TilingMethod::CameraShift => TileRenderSettings::CameraShift {
                    camera: frame.tile_camera(
                        &grid,
                        row,
                        col,
                        f64::from(tile_x),
                        f64::from(tile_y),
                    ),
                },
                TilingMethod::RenderBorder => TileRenderSettings::RenderBorder {
                    border: tile_border(&grid, row, col),
                },
                TilingMethod::CameraSplit => {
                    let (ideal_x, ideal_y) = grid.ideal_tile();
                    TileRenderSettings::CameraSplit {
                        camera_name: format!("{}{}", camera.name, tile_suffix(row, col)),
                        camera: frame.tile_camera(&grid, row, col, ideal_x, ideal_y),
                    }
                }
            };
            RenderTileDescriptor {
                row,
                col,
                tile_x,
                tile_y,
                settings,
                output_path: job.tile_path(row, col),
                image_format: job.tile_format.clone(),
            }
        })
        .collect();

    Ok(tiles)
}

/// The original camera expressed in source-image pixel space.
struct CameraFrame {
    width: f64,
    height: f64,
    focal_length: f64,
    aperture_fstop: f64,
    /// Pre-existing lens shift converted to pixels; image Y runs opposite to shift Y.
    shift_offset_x: f64,
    shift_offset_y: f64,
}

impl CameraFrame {
    fn new(grid: &TileGrid, camera: &CameraState) -> Self {
        let resolution = grid.resolution();
        let widest = f64::from(resolution.widest_axis());
        Self {
            width: f64::from(resolution.width()),
            height: f64::from(resolution.height()),
            focal_length: camera.focal_length,
            aperture_fstop: camera.aperture_fstop,
            shift_offset_x: camera.shift_x * widest,
            shift_offset_y: camera.shift_y * -widest,
        }
    }

    fn tile_camera(
        &self,
        grid: &TileGrid,
        row: u32,
        col: u32,
        tile_x: f64,
        tile_y: f64,
    ) -> CameraTileSettings {
        // The last tile is centered from the far edge so rounding never accumulates.
        let center_x = if grid.is_last_col(col) {
            self.width - tile_x / 2.0
        } else {
            (f64::from(col) + 0.5) * tile_x
        };
        let center_y = if grid.is_last_row(row) {
            self.height - tile_y / 2.0
        } else {
            (f64::from(row) + 0.5) * tile_y
        };
        let offset_x = center_x + self.shift_offset_x;
        let offset_y = center_y + self.shift_offset_y;

        let zoom = if tile_x >= tile_y {
            self.width / tile_x
        } else {
            self.height / tile_y
        };
        let focal_length = self.focal_length * zoom;
        let widest = tile_x.max(tile_y);

        CameraTileSettings {
            focal_length,
            // Equivalent to fstop * (new focal / old focal), without dividing by the old focal.
            aperture_fstop: self.aperture_fstop * zoom,
            shift_x: (-self.width / 2.0 + offset_x) / widest,
            shift_y: (self.height / 2.0 - offset_y) / widest,
        }
    }
}

fn tile_border(grid: &TileGrid, row: u32, col: u32) -> BorderRect {
    let resolution = grid.resolution();
    let (width, height) = (resolution.width(), resolution.height());
    let (tile_x, tile_y) = grid.tile_size(row, col);
    let (left, top) = grid.tile_origin(row, col);

    // Border space has its origin at the bottom-left.
    let (min_x, max_x) = (left, left + tile_x);
    let (min_y, max_y) = (height - top - tile_y, height - top);

    BorderRect {
        min_x: f64::from(min_x) / f64::from(width),
        min_y: f64::from(min_y) / f64::from(height),
        max_x: f64::from(max_x) / f64::from(width),
        max_y: f64::from(max_y) / f64::from(height),
    }
}
