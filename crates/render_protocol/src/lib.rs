use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod host;
mod settings;

pub use host::{
    CameraRig, CameraRigError, ImageData, ImageHandle, ImageStore, ImageStoreError, Notifier,
    RenderDispatchError, RenderEventSink, Renderer, SceneSettings, SequencerEvent, Severity,
};
pub use settings::SavedSettings;

pub const PART_RENDER_DIR: &str = "PartRenders";
pub const OUTPUT_IMAGE_NAME: &str = "super_res_render_output";
pub const RGBA_CHANNELS: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no active camera is selected")]
    NoActiveCamera,
    #[error("subdivision level {level} is not supported (expected 1 to 4)")]
    InvalidSubdivision { level: u8 },
    #[error("resolution must be non-zero, got {width}x{height}")]
    ZeroResolution { width: u32, height: u32 },
    #[error(
        "resolution {width}x{height} is too small for a {tiles_per_side}x{tiles_per_side} tile grid"
    )]
    ResolutionTooSmall {
        width: u32,
        height: u32,
        tiles_per_side: u32,
    },
    #[error("tiling method {method} cannot be rendered tile by tile")]
    MethodNotRenderable { method: TilingMethod },
}

/// Full target output size of a job, both axes non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Result<Self, ConfigurationError> {
        if width == 0 || height == 0 {
            return Err(ConfigurationError::ZeroResolution { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(self) -> u32 {
        self.width
    }

    pub fn height(self) -> u32 {
        self.height
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn widest_axis(self) -> u32 {
        self.width.max(self.height)
    }
}

impl TryFrom<(u32, u32)> for Resolution {
    type Error = ConfigurationError;

    fn try_from((width, height): (u32, u32)) -> Result<Self, Self::Error> {
        Self::new(width, height)
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}x{}", self.width, self.height)
    }
}

/// Grid density: level `n` splits each axis into `2^n` tiles.
///
/// | level | grid    | tiles |
/// |-------|---------|-------|
/// | 1     | 2 x 2   | 4     |
/// | 2     | 4 x 4   | 16    |
/// | 3     | 8 x 8   | 64    |
/// | 4     | 16 x 16 | 256   |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SubdivisionLevel(u8);

impl SubdivisionLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    pub fn new(level: u8) -> Result<Self, ConfigurationError> {
        if !(Self::MIN..=Self::MAX).contains(&level) {
            return Err(ConfigurationError::InvalidSubdivision { level });
        }
        Ok(Self(level))
    }

    pub fn all() -> impl Iterator<Item = SubdivisionLevel> {
        (Self::MIN..=Self::MAX).map(SubdivisionLevel)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn tiles_per_side(self) -> u32 {
        1 << self.0
    }

    pub fn total_tiles(self) -> u32 {
        self.tiles_per_side() * self.tiles_per_side()
    }
}

impl Default for SubdivisionLevel {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<u8> for SubdivisionLevel {
    type Error = ConfigurationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SubdivisionLevel> for u8 {
    fn from(value: SubdivisionLevel) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilingMethod {
    /// Zoom and shift one camera per tile.
    #[default]
    #[serde(alias = "camshift")]
    CameraShift,
    /// Crop the unchanged camera view with the render border.
    #[serde(alias = "border")]
    RenderBorder,
    /// Like `CameraShift`, but each tile keeps its own camera object.
    #[serde(alias = "camsplit")]
    CameraSplit,
}

impl fmt::Display for TilingMethod {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TilingMethod::CameraShift => "camera shift",
            TilingMethod::RenderBorder => "render border",
            TilingMethod::CameraSplit => "camera split",
        };
        formatter.write_str(name)
    }
}

/// Host image file format, named by the host's format identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ImageFormat {
    Bmp,
    Iris,
    #[default]
    Png,
    Jpeg,
    Jpeg2000,
    Targa,
    TargaRaw,
    Cineon,
    Dpx,
    OpenExr,
    OpenExrMultilayer,
    Hdr,
    Tiff,
    Other(CustomFormat),
}

/// Identifier of a format outside the known table.
///
/// Only built by parsing an identifier, so it never holds a known one and
/// each format has exactly one representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomFormat(String);

impl CustomFormat {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ImageFormat {
    pub fn identifier(&self) -> &str {
        match self {
            ImageFormat::Bmp => "BMP",
            ImageFormat::Iris => "IRIS",
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Jpeg2000 => "JPEG2000",
            ImageFormat::Targa => "TARGA",
            ImageFormat::TargaRaw => "TARGA_RAW",
            ImageFormat::Cineon => "CINEON",
            ImageFormat::Dpx => "DPX",
            ImageFormat::OpenExr => "OPEN_EXR",
            ImageFormat::OpenExrMultilayer => "OPEN_EXR_MULTILAYER",
            ImageFormat::Hdr => "HDR",
            ImageFormat::Tiff => "TIFF",
            ImageFormat::Other(custom) => custom.as_str(),
        }
    }

    /// File extension including the leading dot.
    ///
    /// Formats outside the known table use their lower-cased identifier.
    pub fn file_extension(&self) -> String {
        let extension = match self {
            ImageFormat::Bmp => ".bmp",
            ImageFormat::Iris => ".iris",
            ImageFormat::Png => ".png",
            ImageFormat::Jpeg => ".jpg",
            ImageFormat::Jpeg2000 => ".jp2",
            ImageFormat::Targa | ImageFormat::TargaRaw => ".tga",
            ImageFormat::Cineon => ".cin",
            ImageFormat::Dpx => ".dpx",
            ImageFormat::OpenExr | ImageFormat::OpenExrMultilayer => ".exr",
            ImageFormat::Hdr => ".hdr",
            ImageFormat::Tiff => ".tif",
            ImageFormat::Other(custom) => {
                return format!(".{}", custom.as_str().to_lowercase());
            }
        };
        extension.to_owned()
    }
}

impl From<&str> for ImageFormat {
    fn from(value: &str) -> Self {
        match value {
            "BMP" => ImageFormat::Bmp,
            "IRIS" => ImageFormat::Iris,
            "PNG" => ImageFormat::Png,
            "JPEG" => ImageFormat::Jpeg,
            "JPEG2000" => ImageFormat::Jpeg2000,
            "TARGA" => ImageFormat::Targa,
            "TARGA_RAW" => ImageFormat::TargaRaw,
            "CINEON" => ImageFormat::Cineon,
            "DPX" => ImageFormat::Dpx,
            "OPEN_EXR" => ImageFormat::OpenExr,
            "OPEN_EXR_MULTILAYER" => ImageFormat::OpenExrMultilayer,
            "HDR" => ImageFormat::Hdr,
            "TIFF" => ImageFormat::Tiff,
            other => ImageFormat::Other(CustomFormat(other.to_owned())),
        }
    }
}

impl From<String> for ImageFormat {
    fn from(value: String) -> Self {
        ImageFormat::from(value.as_str())
    }
}

impl From<ImageFormat> for String {
    fn from(value: ImageFormat) -> Self {
        value.identifier().to_owned()
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.identifier())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LensUnit {
    #[default]
    Millimeters,
    FieldOfView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraState {
    pub name: String,
    pub focal_length: f64,
    pub aperture_fstop: f64,
    #[serde(default)]
    pub shift_x: f64,
    #[serde(default)]
    pub shift_y: f64,
    #[serde(default)]
    pub lens_unit: LensUnit,
}

/// Normalized crop region, origin bottom-left, Y up, every edge in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BorderRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BorderRect {
    pub const FULL: Self = Self {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };
}

impl Default for BorderRect {
    fn default() -> Self {
        Self::FULL
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    pub output_file_path: PathBuf,
    pub image_format: ImageFormat,
    #[serde(default = "default_resolution_scale_percent")]
    pub resolution_scale_percent: u32,
    pub resolution_x: u32,
    pub resolution_y: u32,
    #[serde(default)]
    pub use_border: bool,
    #[serde(default)]
    pub use_crop_to_border: bool,
    #[serde(default)]
    pub border: BorderRect,
}

fn default_resolution_scale_percent() -> u32 {
    100
}

impl RenderConfig {
    pub fn resolution(&self) -> Result<Resolution, ConfigurationError> {
        Resolution::new(self.resolution_x, self.resolution_y)
    }
}

/// Camera parameters derived for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraTileSettings {
    pub focal_length: f64,
    pub aperture_fstop: f64,
    pub shift_x: f64,
    pub shift_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TileRenderSettings {
    CameraShift {
        camera: CameraTileSettings,
    },
    RenderBorder {
        border: BorderRect,
    },
    CameraSplit {
        camera_name: String,
        camera: CameraTileSettings,
    },
}

impl TileRenderSettings {
    pub fn method(&self) -> TilingMethod {
        match self {
            TileRenderSettings::CameraShift { .. } => TilingMethod::CameraShift,
            TileRenderSettings::RenderBorder { .. } => TilingMethod::RenderBorder,
            TileRenderSettings::CameraSplit { .. } => TilingMethod::CameraSplit,
        }
    }
}

/// One tile of a render job. Rows count from the top of the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTileDescriptor {
    pub row: u32,
    pub col: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub settings: TileRenderSettings,
    pub output_path: PathBuf,
    pub image_format: ImageFormat,
}

/// One tile of a merge: its size and where its bottom-left pixel lands in
/// the bottom-to-top destination buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTileDescriptor {
    pub row: u32,
    pub col: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub dest_offset_x: u32,
    pub dest_offset_y: u32,
    pub source_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderStatus {
    pub is_rendering: bool,
    pub should_stop: bool,
    pub tiles_total: u32,
    pub tiles_done: u32,
}

impl RenderStatus {
    pub fn percent_complete(&self) -> f64 {
        if self.tiles_total == 0 {
            return 0.0;
        }
        100.0 * f64::from(self.tiles_done) / f64::from(self.tiles_total)
    }

    /// Clears a status persisted by a job that never reached its end.
    /// Returns true when anything had to be reset.
    pub fn reset_after_reload(&mut self) -> bool {
        if *self == RenderStatus::default() {
            return false;
        }
        log::warn!(
            "resetting render status left over from an interrupted job: rendering={} stop={} done={}/{}",
            self.is_rendering,
            self.should_stop,
            self.tiles_done,
            self.tiles_total
        );
        *self = RenderStatus::default();
        true
    }
}

/// `_R{row:02}_C{col:02}`, rows and columns counted from 1.
pub fn tile_suffix(row: u32, col: u32) -> String {
    format!("_R{:02}_C{:02}", row + 1, col + 1)
}

pub fn tile_file_name(row: u32, col: u32, format: &ImageFormat) -> String {
    format!("Part{}{}", tile_suffix(row, col), format.file_extension())
}

pub fn output_file_name(format: &ImageFormat) -> String {
    format!("{OUTPUT_IMAGE_NAME}{}", format.file_extension())
}
