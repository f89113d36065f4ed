use std::fs;
use std::path::Path;

use image::{DynamicImage, ImageReader, Rgba32FImage};
use render_protocol::{
    ImageData, ImageFormat, ImageHandle, ImageStore, ImageStoreError, RGBA_CHANNELS,
};
use slotmap::SlotMap;

#[derive(Debug)]
struct StoredImage {
    name: String,
    data: ImageData,
}

/// Image store backed by files on disk.
///
/// Decoded images are kept as RGBA float samples with rows bottom-to-top;
/// files are always written top-to-bottom.
#[derive(Debug, Default)]
pub struct FileImageStore {
    images: SlotMap<ImageHandle, StoredImage>,
}

impl FileImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageStore for FileImageStore {
    fn load_image(&mut self, path: &Path) -> Result<ImageHandle, ImageStoreError> {
        let data = read_image(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::debug!(
            "loaded {} ({}x{})",
            path.display(),
            data.width,
            data.height
        );
        Ok(self.images.insert(StoredImage { name, data }))
    }

    fn image(&self, handle: ImageHandle) -> Option<&ImageData> {
        self.images.get(handle).map(|stored| &stored.data)
    }

    fn release_image(&mut self, handle: ImageHandle) {
        if self.images.remove(handle).is_none() {
            log::warn!("released an image that was not loaded");
        }
    }

    fn find_image(&self, name: &str) -> Option<ImageHandle> {
        self.images
            .iter()
            .find(|(_, stored)| stored.name == name)
            .map(|(handle, _)| handle)
    }

    fn create_image(
        &mut self,
        name: &str,
        data: ImageData,
    ) -> Result<ImageHandle, ImageStoreError> {
        let expected = data.width as usize * data.height as usize * data.channels as usize;
        if data.pixels.len() != expected {
            return Err(ImageStoreError::PixelDataLength {
                expected,
                actual: data.pixels.len(),
            });
        }
        Ok(self.images.insert(StoredImage {
            name: name.to_owned(),
            data,
        }))
    }

    fn save_image(
        &mut self,
        handle: ImageHandle,
        path: &Path,
        format: &ImageFormat,
    ) -> Result<(), ImageStoreError> {
        let stored = self
            .images
            .get(handle)
            .ok_or(ImageStoreError::UnknownHandle)?;
        write_image(&stored.data, path, format)
    }
}

pub(crate) fn codec(format: &ImageFormat) -> Result<image::ImageFormat, ImageStoreError> {
    let codec = match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Targa | ImageFormat::TargaRaw => image::ImageFormat::Tga,
        ImageFormat::OpenExr | ImageFormat::OpenExrMultilayer => image::ImageFormat::OpenExr,
        ImageFormat::Hdr => image::ImageFormat::Hdr,
        ImageFormat::Tiff => image::ImageFormat::Tiff,
        ImageFormat::Iris
        | ImageFormat::Jpeg2000
        | ImageFormat::Cineon
        | ImageFormat::Dpx
        | ImageFormat::Other(_) => {
            return Err(ImageStoreError::UnsupportedFormat {
                format: format.clone(),
            });
        }
    };
    Ok(codec)
}

/// Decodes any supported file into bottom-to-top RGBA float rows.
pub fn read_image(path: &Path) -> Result<ImageData, ImageStoreError> {
    let load_error = |message: String| ImageStoreError::Load {
        path: path.to_path_buf(),
        message,
    };
    let decoded = ImageReader::open(path)
        .map_err(|error| load_error(error.to_string()))?
        .with_guessed_format()
        .map_err(|error| load_error(error.to_string()))?
        .decode()
        .map_err(|error| load_error(error.to_string()))?
        .to_rgba32f();

    let (width, height) = decoded.dimensions();
    Ok(ImageData {
        width,
        height,
        channels: RGBA_CHANNELS,
        pixels: flip_rows(decoded.into_raw(), width),
    })
}

/// Encodes bottom-to-top RGBA float rows, creating the parent directory.
pub fn write_image(
    data: &ImageData,
    path: &Path,
    format: &ImageFormat,
) -> Result<(), ImageStoreError> {
    let codec = codec(format)?;
    let save_error = |message: String| ImageStoreError::Save {
        path: path.to_path_buf(),
        message,
    };
    if data.channels != RGBA_CHANNELS {
        return Err(save_error(format!(
            "expected {RGBA_CHANNELS} channels, got {}",
            data.channels
        )));
    }

    let rows = flip_rows(data.pixels.clone(), data.width);
    let buffer = Rgba32FImage::from_raw(data.width, data.height, rows).ok_or_else(|| {
        save_error(format!(
            "{} samples do not fill {}x{}",
            data.pixels.len(),
            data.width,
            data.height
        ))
    })?;
    let rgba = DynamicImage::ImageRgba32F(buffer);
    let encoded = match codec {
        image::ImageFormat::OpenExr => rgba,
        image::ImageFormat::Hdr => DynamicImage::ImageRgb32F(rgba.to_rgb32f()),
        image::ImageFormat::Jpeg => DynamicImage::ImageRgb8(rgba.to_rgb8()),
        _ => DynamicImage::ImageRgba8(rgba.to_rgba8()),
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|error| save_error(error.to_string()))?;
    }
    encoded
        .save_with_format(path, codec)
        .map_err(|error| save_error(error.to_string()))
}

/// Reverses row order; the same operation converts either way.
fn flip_rows(samples: Vec<f32>, width: u32) -> Vec<f32> {
    let row_samples = width as usize * RGBA_CHANNELS as usize;
    if row_samples == 0 {
        return samples;
    }
    samples
        .chunks_exact(row_samples)
        .rev()
        .flatten()
        .copied()
        .collect()
}
