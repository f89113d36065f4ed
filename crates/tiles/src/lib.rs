use std::path::{Path, PathBuf};

use render_protocol::{
    ConfigurationError, ImageFormat, Resolution, SubdivisionLevel, TilingMethod, tile_file_name,
};

mod merge_plan;
mod render_plan;

pub use merge_plan::plan_merge_tiles;
pub use render_plan::plan_render_tiles;

/// Pixel layout of a square tile grid over one output image.
///
/// Interior tiles share one size; the last column and the last row absorb
/// whatever remains, so the grid always sums exactly to the resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    resolution: Resolution,
    tiles_per_side: u32,
    max_tile_x: u32,
    max_tile_y: u32,
    last_tile_x: u32,
    last_tile_y: u32,
}

impl TileGrid {
    pub fn new(resolution: Resolution, level: SubdivisionLevel) -> Result<Self, ConfigurationError> {
        let tiles_per_side = level.tiles_per_side();
        let too_small = ConfigurationError::ResolutionTooSmall {
            width: resolution.width(),
            height: resolution.height(),
            tiles_per_side,
        };
        let (max_tile_x, last_tile_x) =
            split_axis(resolution.width(), tiles_per_side).ok_or(too_small.clone())?;
        let (max_tile_y, last_tile_y) =
            split_axis(resolution.height(), tiles_per_side).ok_or(too_small)?;

        Ok(Self {
            resolution,
            tiles_per_side,
            max_tile_x,
            max_tile_y,
            last_tile_x,
            last_tile_y,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn tiles_per_side(&self) -> u32 {
        self.tiles_per_side
    }

    pub fn total_tiles(&self) -> u32 {
        self.tiles_per_side * self.tiles_per_side
    }

    pub fn max_tile(&self) -> (u32, u32) {
        (self.max_tile_x, self.max_tile_y)
    }

    pub fn last_tile(&self) -> (u32, u32) {
        (self.last_tile_x, self.last_tile_y)
    }

    /// Unrounded tile size, for tiles that need no pixel alignment.
    pub fn ideal_tile(&self) -> (f64, f64) {
        let side = f64::from(self.tiles_per_side);
        (
            f64::from(self.resolution.width()) / side,
            f64::from(self.resolution.height()) / side,
        )
    }

    pub fn is_last_col(&self, col: u32) -> bool {
        col + 1 == self.tiles_per_side
    }

    pub fn is_last_row(&self, row: u32) -> bool {
        row + 1 == self.tiles_per_side
    }

    pub fn tile_size(&self, row: u32, col: u32) -> (u32, u32) {
        let tile_x = if self.is_last_col(col) {
            self.last_tile_x
        } else {
            self.max_tile_x
        };
        let tile_y = if self.is_last_row(row) {
            self.last_tile_y
        } else {
            self.max_tile_y
        };
        (tile_x, tile_y)
    }

    /// Top-left pixel of a cell, rows counted from the top of the image.
    pub fn tile_origin(&self, row: u32, col: u32) -> (u32, u32) {
        (col * self.max_tile_x, row * self.max_tile_y)
    }

    /// Row-major `(row, col)` pairs.
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32)> {
        let side = self.tiles_per_side;
        (0..side).flat_map(move |row| (0..side).map(move |col| (row, col)))
    }
}

fn split_axis(length: u32, tiles_per_side: u32) -> Option<(u32, u32)> {
    let max_tile = length.div_ceil(tiles_per_side);
    let last_tile = length.checked_sub(max_tile.checked_mul(tiles_per_side - 1)?)?;
    if last_tile == 0 {
        return None;
    }
    Some((max_tile, last_tile))
}

/// Inputs shared by the render and merge planners of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct TileJob {
    pub resolution: Resolution,
    pub level: SubdivisionLevel,
    pub method: TilingMethod,
    pub tile_format: ImageFormat,
    pub output_dir: PathBuf,
}

impl TileJob {
    pub fn grid(&self) -> Result<TileGrid, ConfigurationError> {
        TileGrid::new(self.resolution, self.level)
    }

    pub fn tile_path(&self, row: u32, col: u32) -> PathBuf {
        tile_path(&self.output_dir, row, col, &self.tile_format)
    }
}

pub fn tile_path(output_dir: &Path, row: u32, col: u32, format: &ImageFormat) -> PathBuf {
    output_dir.join(tile_file_name(row, col, format))
}
