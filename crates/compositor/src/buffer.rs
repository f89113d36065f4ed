use render_protocol::{ImageData, MergeTileDescriptor, RGBA_CHANNELS, Resolution};

use crate::CompositeError;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Zero-initialized RGBA float image the tiles are copied into.
///
/// Rows are stored bottom-to-top, matching the image store.
#[derive(Debug)]
pub struct CompositeBuffer {
    width: u32,
    height: u32,
    samples: Vec<f32>,
    copied: usize,
}

impl CompositeBuffer {
    pub fn new(resolution: Resolution) -> Result<Self, CompositeError> {
        let sample_count = sample_count(resolution.width(), resolution.height())
            .ok_or(CompositeError::Allocation {
                resolution,
                samples: None,
            })?;
        let bytes = sample_count as f64 * std::mem::size_of::<f32>() as f64;
        log::info!(
            "allocating {resolution} composite buffer: {sample_count} samples ({:.1} MiB)",
            bytes / BYTES_PER_MIB
        );

        let mut samples = Vec::new();
        samples
            .try_reserve_exact(sample_count)
            .map_err(|_| CompositeError::Allocation {
                resolution,
                samples: Some(sample_count),
            })?;
        samples.resize(sample_count, 0.0);

        Ok(Self {
            width: resolution.width(),
            height: resolution.height(),
            samples,
            copied: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Samples written by `blit` so far.
    pub fn copied_samples(&self) -> usize {
        self.copied
    }

    pub fn check_bounds(&self, tile: &MergeTileDescriptor) -> Result<(), CompositeError> {
        let fits_x = tile
            .dest_offset_x
            .checked_add(tile.tile_x)
            .is_some_and(|right| right <= self.width);
        let fits_y = tile
            .dest_offset_y
            .checked_add(tile.tile_y)
            .is_some_and(|top| top <= self.height);
        if fits_x && fits_y {
            return Ok(());
        }
        Err(CompositeError::TileOutOfBounds {
            row: tile.row,
            col: tile.col,
            dest_offset: (tile.dest_offset_x, tile.dest_offset_y),
            size: (tile.tile_x, tile.tile_y),
            bounds: (self.width, self.height),
        })
    }

    /// Copies a validated tile image row by row to its destination offset.
    pub fn blit(
        &mut self,
        tile: &MergeTileDescriptor,
        image: &ImageData,
    ) -> Result<(), CompositeError> {
        self.check_bounds(tile)?;
        let channels = RGBA_CHANNELS as usize;
        let row_samples = tile.tile_x as usize * channels;
        let expected = row_samples * tile.tile_y as usize;
        if image.pixels.len() != expected {
            return Err(CompositeError::PixelDataLength {
                row: tile.row,
                col: tile.col,
                expected,
                actual: image.pixels.len(),
            });
        }

        let width = self.width as usize;
        let dest_x = tile.dest_offset_x as usize;
        for (y, source_row) in image.pixels.chunks_exact(row_samples).enumerate() {
            let dest_row = tile.dest_offset_y as usize + y;
            let start = (dest_row * width + dest_x) * channels;
            self.samples[start..start + row_samples].copy_from_slice(source_row);
        }
        self.copied += expected;
        Ok(())
    }

    pub fn into_image_data(self) -> ImageData {
        ImageData {
            width: self.width,
            height: self.height,
            channels: RGBA_CHANNELS,
            pixels: self.samples,
        }
    }
}

fn sample_count(width: u32, height: u32) -> Option<usize> {
    let width: usize = width.try_into().ok()?;
    let height: usize = height.try_into().ok()?;
    width
        .checked_mul(height)?
        .checked_mul(RGBA_CHANNELS as usize)
}
