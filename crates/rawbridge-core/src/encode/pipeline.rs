//! Resize and format dispatch for one encode call.

use std::io::Cursor;
use std::time::Instant;

use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use super::{
    BufferResult, Dimensions, EncodeOptions, FileSize, OutputFormat, MAX_TARGET_DIMENSION,
};
use crate::error::{Result, SessionError};
use crate::handle::RasterSnapshot;

/// Resolve target dimensions against the source, preserving aspect ratio
/// when only one dimension is given. Rounds to nearest, minimum 1px.
pub fn resolve_dimensions(
    source: Dimensions,
    width: Option<u32>,
    height: Option<u32>,
) -> Dimensions {
    let (width, height) = match (width, height) {
        (None, None) => (source.width, source.height),
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let h = (source.height as f64 * f64::from(w) / source.width.max(1) as f64).round();
            (w, h as u32)
        }
        (None, Some(h)) => {
            let w = (source.width as f64 * f64::from(h) / source.height.max(1) as f64).round();
            (w as u32, h)
        }
    };
    Dimensions {
        width: width.max(1),
        height: height.max(1),
    }
}

/// Encode one immutable snapshot into `format`.
///
/// `options` must already be the applied set from
/// [`EncodeOptions::validated`]; this function does no remapping of its
/// own. Runs synchronously and is meant for a worker-pool thread.
pub fn encode_raster(
    snapshot: &RasterSnapshot,
    format: OutputFormat,
    options: &EncodeOptions,
) -> Result<BufferResult> {
    let start = Instant::now();

    if snapshot.channels != 3 || snapshot.bits_per_sample != 8 {
        return Err(SessionError::Encode {
            format: format.to_string(),
            message: format!(
                "unsupported raster layout: {} channels, {} bits",
                snapshot.channels, snapshot.bits_per_sample
            ),
        });
    }

    let source = Dimensions {
        width: snapshot.width,
        height: snapshot.height,
    };
    let target = resolve_dimensions(source, options.width, options.height);
    // Option validation bounds only explicit values; a derived dimension
    // can still blow past the codec limit on extreme aspect ratios.
    if target.width > MAX_TARGET_DIMENSION || target.height > MAX_TARGET_DIMENSION {
        return Err(SessionError::InvalidArgument(format!(
            "derived dimensions {}x{} exceed the {} px limit",
            target.width, target.height, MAX_TARGET_DIMENSION
        )));
    }

    let img = RgbImage::from_raw(snapshot.width, snapshot.height, snapshot.data.clone())
        .ok_or_else(|| SessionError::Encode {
            format: format.to_string(),
            message: "raster byte count does not match dimensions".into(),
        })?;

    let resized;
    let pixels: &RgbImage = if target == source {
        &img
    } else {
        resized = image::imageops::resize(
            &img,
            target.width,
            target.height,
            options.filter.to_image_filter(),
        );
        &resized
    };

    let data = dispatch(pixels, target, format, options)?;

    let elapsed = start.elapsed();
    let original = snapshot.data.len() as u64;
    let compressed = data.len() as u64;
    let seconds = elapsed.as_secs_f64().max(1e-9);

    let result = BufferResult {
        format,
        original_dimensions: source,
        output_dimensions: target,
        file_size: FileSize {
            original,
            compressed,
            ratio: original as f64 / compressed.max(1) as f64,
        },
        processing_time_ms: elapsed.as_secs_f64() * 1000.0,
        throughput_mbps: (original as f64 / (1024.0 * 1024.0)) / seconds,
        options: options.clone(),
        data,
    };
    tracing::debug!(
        format = %format,
        width = target.width,
        height = target.height,
        bytes = compressed,
        ms = result.processing_time_ms,
        "encoded raster"
    );
    Ok(result)
}

/// Hand the resolved pixels to the format's codec.
fn dispatch(
    pixels: &RgbImage,
    target: Dimensions,
    format: OutputFormat,
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    let encode_err = |e: image::ImageError| SessionError::Encode {
        format: format.to_string(),
        message: e.to_string(),
    };

    match format {
        OutputFormat::Jpeg | OutputFormat::JpegThumbnail => {
            JpegEncoder::new_with_quality(&mut out, options.quality)
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::Png => {
            let compression = match options.compression_level {
                0..=3 => CompressionType::Fast,
                4..=6 => CompressionType::Default,
                _ => CompressionType::Best,
            };
            PngEncoder::new_with_quality(&mut out, compression, PngFilter::Adaptive)
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::WebP => {
            // Lossless-only encoder; option validation remaps quality to
            // 100 so the echoed options match the stream.
            WebPEncoder::new_lossless(&mut out)
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::Avif => {
            let speed = (11 - options.effort).clamp(1, 10);
            AvifEncoder::new_with_speed_quality(&mut out, speed, options.quality)
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::Tiff => {
            TiffEncoder::new(&mut out)
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        OutputFormat::Ppm => {
            PnmEncoder::new(&mut out)
                .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
                .write_image(pixels, target.width, target.height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
    }

    Ok(out.into_inner())
}
