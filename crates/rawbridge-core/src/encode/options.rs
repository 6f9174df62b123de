//! Per-format encode options with eager validation.
//!
//! One options record covers every target format; validation checks the
//! fields the chosen format actually consumes and returns the *applied*
//! set, which may differ from the requested set where a documented remap
//! exists. Remaps are logged and always observable in the echoed options
//! of the result, never silent.
//!
//! Default table:
//!
//! | field               | default  | consumed by                      |
//! |---------------------|----------|----------------------------------|
//! | `quality`           | 85       | JPEG, AVIF, JPEG-thumbnail       |
//! | `width` / `height`  | source   | all                              |
//! | `compression_level` | 6 (0-9)  | PNG                              |
//! | `chroma_subsampling`| 4:2:0    | JPEG                             |
//! | `effort`            | 4 (1-10) | AVIF                             |
//! | `color_space`       | srgb     | all                              |
//! | `progressive`       | false    | JPEG                             |
//! | `filter`            | lanczos3 | resize step of all formats       |

use serde::{Deserialize, Serialize};

use super::OutputFormat;
use crate::error::{Result, SessionError};

/// Encoders reject dimensions past this bound (the JPEG hard limit,
/// applied uniformly).
pub const MAX_TARGET_DIMENSION: u32 = 65_500;

/// Chroma subsampling modes for JPEG output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChromaSubsampling {
    #[serde(rename = "4:4:4")]
    Cs444,
    #[serde(rename = "4:2:2")]
    Cs422,
    #[default]
    #[serde(rename = "4:2:0")]
    Cs420,
}

impl std::fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChromaSubsampling::Cs444 => "4:4:4",
            ChromaSubsampling::Cs422 => "4:2:2",
            ChromaSubsampling::Cs420 => "4:2:0",
        })
    }
}

/// Output color space. The software pipeline always develops into sRGB;
/// the field is validated and echoed so native engines can honor it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    #[default]
    Srgb,
    AdobeRgb,
}

/// Resampling filter for the resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    #[default]
    Lanczos3,
}

impl ResizeFilter {
    pub fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            ResizeFilter::Nearest => image::imageops::FilterType::Nearest,
            ResizeFilter::Bilinear => image::imageops::FilterType::Triangle,
            ResizeFilter::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

/// Configuration for one encode call. See the module docs for the
/// default table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeOptions {
    /// Lossy quality, 1-100.
    pub quality: u8,
    /// Target width; the height is derived when omitted.
    pub width: Option<u32>,
    /// Target height; the width is derived when omitted.
    pub height: Option<u32>,
    /// PNG compression level, 0-9.
    pub compression_level: u8,
    pub chroma_subsampling: ChromaSubsampling,
    /// AVIF encoder effort, 1-10 (higher is slower and smaller).
    pub effort: u8,
    pub color_space: ColorSpace,
    /// Progressive JPEG flag.
    pub progressive: bool,
    pub filter: ResizeFilter,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            quality: 85,
            width: None,
            height: None,
            compression_level: 6,
            chroma_subsampling: ChromaSubsampling::default(),
            effort: 4,
            color_space: ColorSpace::default(),
            progressive: false,
            filter: ResizeFilter::default(),
        }
    }
}

impl EncodeOptions {
    /// Validate against a format's schema and return the applied set.
    ///
    /// Fails fast with `InvalidArgument` on out-of-range values. The only
    /// silent-on-input adjustments are the documented remaps, which are
    /// reflected in the returned options:
    ///
    /// - JPEG 4:2:2 subsampling is not supported by the underlying
    ///   encoder and is remapped to 4:4:4;
    /// - the JPEG encoder emits baseline scans only, so `progressive`
    ///   comes back `false`;
    /// - the WebP encoder is lossless-only, so `quality` comes back 100.
    pub fn validated(&self, format: OutputFormat) -> Result<EncodeOptions> {
        if format.is_lossy() && !(1..=100).contains(&self.quality) {
            return Err(SessionError::InvalidArgument(format!(
                "quality {} out of range 1-100",
                self.quality
            )));
        }
        if format == OutputFormat::Png && self.compression_level > 9 {
            return Err(SessionError::InvalidArgument(format!(
                "compression_level {} out of range 0-9",
                self.compression_level
            )));
        }
        if format == OutputFormat::Avif && !(1..=10).contains(&self.effort) {
            return Err(SessionError::InvalidArgument(format!(
                "effort {} out of range 1-10",
                self.effort
            )));
        }
        for (name, dim) in [("width", self.width), ("height", self.height)] {
            if let Some(d) = dim {
                if d == 0 || d > MAX_TARGET_DIMENSION {
                    return Err(SessionError::InvalidArgument(format!(
                        "{} {} out of range 1-{}",
                        name, d, MAX_TARGET_DIMENSION
                    )));
                }
            }
        }

        let mut applied = self.clone();
        if format.is_jpeg() && applied.chroma_subsampling == ChromaSubsampling::Cs422 {
            // Compatibility shim: the JPEG encoder has no 4:2:2 mode.
            tracing::warn!("chroma subsampling 4:2:2 unsupported, applying 4:4:4");
            applied.chroma_subsampling = ChromaSubsampling::Cs444;
        }
        if format.is_jpeg() && applied.progressive {
            tracing::warn!("progressive JPEG unsupported, emitting baseline");
            applied.progressive = false;
        }
        if format == OutputFormat::WebP && applied.quality != 100 {
            tracing::warn!(
                requested = applied.quality,
                "webp output is lossless, quality does not apply"
            );
            applied.quality = 100;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let opts = EncodeOptions::default();
        assert_eq!(opts.quality, 85);
        assert_eq!(opts.compression_level, 6);
        assert_eq!(opts.effort, 4);
        assert_eq!(opts.chroma_subsampling, ChromaSubsampling::Cs420);
        assert_eq!(opts.filter, ResizeFilter::Lanczos3);
        assert!(!opts.progressive);
        assert!(opts.width.is_none() && opts.height.is_none());
    }

    #[test]
    fn test_quality_bounds_checked_for_lossy_formats() {
        let mut opts = EncodeOptions::default();
        opts.quality = 0;
        assert!(opts.validated(OutputFormat::Jpeg).is_err());
        assert!(opts.validated(OutputFormat::Avif).is_err());
        // PNG ignores quality entirely.
        assert!(opts.validated(OutputFormat::Png).is_ok());
    }

    #[test]
    fn test_compression_level_only_checked_for_png() {
        let mut opts = EncodeOptions::default();
        opts.compression_level = 12;
        assert!(opts.validated(OutputFormat::Png).is_err());
        assert!(opts.validated(OutputFormat::Jpeg).is_ok());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let mut opts = EncodeOptions::default();
        opts.width = Some(0);
        let err = opts.validated(OutputFormat::Jpeg).unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[test]
    fn test_oversized_dimension_rejected() {
        let mut opts = EncodeOptions::default();
        opts.height = Some(MAX_TARGET_DIMENSION + 1);
        assert!(opts.validated(OutputFormat::Png).is_err());
    }

    #[test]
    fn test_chroma_422_remapped_to_444_for_jpeg() {
        let mut opts = EncodeOptions::default();
        opts.chroma_subsampling = ChromaSubsampling::Cs422;
        let applied = opts.validated(OutputFormat::Jpeg).unwrap();
        assert_eq!(applied.chroma_subsampling, ChromaSubsampling::Cs444);
        // Non-JPEG formats do not consume the field; no remap.
        let applied = opts.validated(OutputFormat::Png).unwrap();
        assert_eq!(applied.chroma_subsampling, ChromaSubsampling::Cs422);
    }

    #[test]
    fn test_chroma_420_passes_through() {
        let opts = EncodeOptions::default();
        let applied = opts.validated(OutputFormat::Jpeg).unwrap();
        assert_eq!(applied.chroma_subsampling, ChromaSubsampling::Cs420);
    }

    #[test]
    fn test_webp_quality_remapped_to_lossless() {
        let applied = EncodeOptions::default()
            .validated(OutputFormat::WebP)
            .unwrap();
        assert_eq!(applied.quality, 100);
        // Out-of-range quality is still rejected before the remap.
        let mut opts = EncodeOptions::default();
        opts.quality = 0;
        assert!(opts.validated(OutputFormat::WebP).is_err());
        // Other lossy formats keep the requested quality.
        let applied = EncodeOptions::default()
            .validated(OutputFormat::Jpeg)
            .unwrap();
        assert_eq!(applied.quality, 85);
    }

    #[test]
    fn test_progressive_remapped_to_baseline() {
        let mut opts = EncodeOptions::default();
        opts.progressive = true;
        let applied = opts.validated(OutputFormat::Jpeg).unwrap();
        assert!(!applied.progressive);
    }

    #[test]
    fn test_serde_chroma_names() {
        let json = serde_json::to_string(&ChromaSubsampling::Cs422).unwrap();
        assert_eq!(json, "\"4:2:2\"");
        let parsed: ChromaSubsampling = serde_json::from_str("\"4:2:0\"").unwrap();
        assert_eq!(parsed, ChromaSubsampling::Cs420);
    }
}
