use render_protocol::{ConfigurationError, MergeTileDescriptor};

use crate::TileJob;

/// Lays out the rendered tiles of `job` in a bottom-to-top destination image.
///
/// Tiles keep the render plan's row-major order, so row 0 (the top of the
/// picture) lands at the highest destination rows.
pub fn plan_merge_tiles(job: &TileJob) -> Result<Vec<MergeTileDescriptor>, ConfigurationError> {
    let grid = job.grid()?;
    let height = job.resolution.height();

    let tiles = grid
        .cells()
        .map(|(row, col)| {
            let (tile_x, tile_y) = grid.tile_size(row, col);
            let (left, top) = grid.tile_origin(row, col);
            MergeTileDescriptor {
                row,
                col,
                tile_x,
                tile_y,
                dest_offset_x: left,
                dest_offset_y: height - top - tile_y,
                source_path: job.tile_path(row, col),
            }
        })
        .collect();

    Ok(tiles)
}
