//! Multi-format encode pipeline.
//!
//! One decoded raster snapshot in, one encoded buffer out, per call.
//! Because the snapshot is immutable and shared by `Arc`, any number of
//! encode calls for the same session may run concurrently on worker-pool
//! threads; this is the one operation exempt from the scheduler's
//! per-session single-flight rule.

mod options;
mod pipeline;

pub use options::{
    ChromaSubsampling, ColorSpace, EncodeOptions, ResizeFilter, MAX_TARGET_DIMENSION,
};
pub use pipeline::{encode_raster, resolve_dimensions};

use serde::{Deserialize, Serialize};

/// Target output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Jpeg,
    Png,
    #[serde(rename = "webp")]
    WebP,
    Avif,
    Tiff,
    Ppm,
    /// The embedded camera preview, re-encoded as JPEG.
    JpegThumbnail,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Ppm => "ppm",
            OutputFormat::JpegThumbnail => "jpeg-thumbnail",
        }
    }

    /// File extension for storage writes.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::JpegThumbnail => "jpg",
            OutputFormat::Jpeg => "jpg",
            other => other.as_str(),
        }
    }

    /// Formats where the quality knob applies.
    pub fn is_lossy(self) -> bool {
        matches!(
            self,
            OutputFormat::Jpeg | OutputFormat::WebP | OutputFormat::Avif | OutputFormat::JpegThumbnail
        )
    }

    /// Formats encoded through the JPEG entropy coder.
    pub fn is_jpeg(self) -> bool {
        matches!(self, OutputFormat::Jpeg | OutputFormat::JpegThumbnail)
    }

    /// Whether this format encodes the thumbnail snapshot rather than
    /// the processed raster.
    pub fn uses_thumbnail(self) -> bool {
        self == OutputFormat::JpegThumbnail
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Byte sizes of a single encode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FileSize {
    /// Raw raster bytes going in.
    pub original: u64,
    /// Encoded bytes coming out.
    pub compressed: u64,
    /// `original / compressed`.
    pub ratio: f64,
}

/// Output of one encode call: the encoded bytes plus measurements and
/// the options that were actually applied (remaps included).
#[derive(Debug, Clone, Serialize)]
pub struct BufferResult {
    pub format: OutputFormat,
    /// Encoded bytes. Skipped in serialized form; the metadata block is
    /// what gets reported.
    #[serde(skip)]
    pub data: Vec<u8>,
    pub original_dimensions: Dimensions,
    pub output_dimensions: Dimensions,
    pub file_size: FileSize,
    pub processing_time_ms: f64,
    pub throughput_mbps: f64,
    pub options: EncodeOptions,
}
