use std::path::{Path, PathBuf};

use render_protocol::{
    ConfigurationError, ImageData, ImageFormat, ImageHandle, ImageStore, ImageStoreError,
    MergeTileDescriptor, OUTPUT_IMAGE_NAME, RGBA_CHANNELS, Resolution,
};
use tiles::{TileJob, plan_merge_tiles};

mod buffer;

pub use buffer::CompositeBuffer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositeError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(
        "tile '{}' is {}x{}, expected {}x{}",
        .path.display(), .actual.0, .actual.1, .expected.0, .expected.1
    )]
    DimensionMismatch {
        path: PathBuf,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("tile '{}' has {actual} channels, expected {expected}", .path.display())]
    ChannelCount {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },
    #[error("tile R{:02} C{:02} holds {actual} samples, expected {expected}", .row + 1, .col + 1)]
    PixelDataLength {
        row: u32,
        col: u32,
        expected: usize,
        actual: usize,
    },
    #[error(
        "tile R{:02} C{:02} of size {size:?} at {dest_offset:?} exceeds the {bounds:?} output",
        .row + 1, .col + 1
    )]
    TileOutOfBounds {
        row: u32,
        col: u32,
        dest_offset: (u32, u32),
        size: (u32, u32),
        bounds: (u32, u32),
    },
    #[error("merged tiles wrote {actual} samples, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("cannot allocate a {resolution} composite buffer ({samples:?} samples)")]
    Allocation {
        resolution: Resolution,
        samples: Option<usize>,
    },
    #[error(transparent)]
    ImageStore(#[from] ImageStoreError),
}

/// Where and how the merged image is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutput {
    pub path: PathBuf,
    pub format: ImageFormat,
}

/// A loaded tile image, released when dropped.
struct TileImageGuard<'a, S: ImageStore + ?Sized> {
    store: &'a mut S,
    handle: ImageHandle,
}

impl<'a, S: ImageStore + ?Sized> TileImageGuard<'a, S> {
    fn load(store: &'a mut S, path: &Path) -> Result<Self, ImageStoreError> {
        let handle = store.load_image(path)?;
        Ok(Self { store, handle })
    }

    fn image(&self) -> Result<&ImageData, ImageStoreError> {
        self.store
            .image(self.handle)
            .ok_or(ImageStoreError::UnknownHandle)
    }
}

impl<S: ImageStore + ?Sized> Drop for TileImageGuard<'_, S> {
    fn drop(&mut self) {
        self.store.release_image(self.handle);
    }
}

/// Reassembles rendered tiles into the full-resolution output image.
///
/// Peak memory is the destination buffer plus one loaded tile. Any
/// inconsistency aborts the merge before anything is saved.
pub struct TileCompositor<'a, S: ImageStore + ?Sized> {
    store: &'a mut S,
}

impl<'a, S: ImageStore + ?Sized> TileCompositor<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Plans the merge for `job` and runs it.
    pub fn merge_job(
        &mut self,
        job: &TileJob,
        output: &MergeOutput,
    ) -> Result<ImageHandle, CompositeError> {
        let tiles = plan_merge_tiles(job)?;
        self.merge(&tiles, job.resolution, output)
    }

    pub fn merge(
        &mut self,
        tiles: &[MergeTileDescriptor],
        resolution: Resolution,
        output: &MergeOutput,
    ) -> Result<ImageHandle, CompositeError> {
        log::info!("merging {} tiles into {resolution}", tiles.len());
        let mut buffer = CompositeBuffer::new(resolution)?;

        for tile in tiles {
            buffer.check_bounds(tile)?;
            let guard = TileImageGuard::load(&mut *self.store, &tile.source_path)?;
            let image = guard.image()?;
            validate_tile(tile, image)?;
            buffer.blit(tile, image)?;
            log::debug!(
                "merged {} at ({}, {})",
                tile.source_path.display(),
                tile.dest_offset_x,
                tile.dest_offset_y
            );
        }

        let expected = buffer.samples().len();
        if buffer.copied_samples() != expected {
            return Err(CompositeError::SizeMismatch {
                expected,
                actual: buffer.copied_samples(),
            });
        }

        self.write_output(buffer.into_image_data(), output)
    }

    fn write_output(
        &mut self,
        image: ImageData,
        output: &MergeOutput,
    ) -> Result<ImageHandle, CompositeError> {
        if let Some(previous) = self.store.find_image(OUTPUT_IMAGE_NAME) {
            log::debug!("replacing previous {OUTPUT_IMAGE_NAME} image");
            self.store.release_image(previous);
        }
        let handle = self.store.create_image(OUTPUT_IMAGE_NAME, image)?;
        self.store
            .save_image(handle, &output.path, &output.format)?;
        log::info!("saved merged image to {}", output.path.display());
        Ok(handle)
    }
}

fn validate_tile(tile: &MergeTileDescriptor, image: &ImageData) -> Result<(), CompositeError> {
    if (image.width, image.height) != (tile.tile_x, tile.tile_y) {
        return Err(CompositeError::DimensionMismatch {
            path: tile.source_path.clone(),
            expected: (tile.tile_x, tile.tile_y),
            actual: (image.width, image.height),
        });
    }
    if image.channels != RGBA_CHANNELS {
        return Err(CompositeError::ChannelCount {
            path: tile.source_path.clone(),
            expected: RGBA_CHANNELS,
            actual: image.channels,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests;
