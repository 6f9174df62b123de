//! Software decode engine backed by `rawloader` and `image`.
//!
//! This is the default [`DecodeEngine`] implementation. Sensor decoding is
//! delegated to `rawloader`, maker metadata to `kamadak-exif`, and preview
//! decoding to the `image` crate. The develop step is a deliberately plain
//! half-size render: each CFA quad becomes one RGB pixel after black/white
//! normalization, white balance and gamma. Sessions that need a publishable
//! full-resolution demosaic should slot in a native engine instead.

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use exif::{In, Tag, Value};
use rawloader::{RawImage, RawImageData};

use super::{
    DecodeEngine, EngineColor, EngineIdent, EngineLens, EngineSizes, EngineStatus,
    RasterDescriptor,
};

/// Representative models the software engine is known to handle, exposed
/// through the crate-level `supported_camera_models()` query.
pub(crate) const KNOWN_CAMERA_MODELS: &[&str] = &[
    "Canon EOS 5D Mark IV",
    "Canon EOS R5",
    "Canon EOS 90D",
    "Nikon D750",
    "Nikon D850",
    "Nikon Z 6",
    "Sony ILCE-7M3",
    "Sony ILCE-7RM4",
    "Sony ILCE-6600",
    "Fujifilm X-T3",
    "Fujifilm X-T4",
    "Olympus E-M1MarkII",
    "Panasonic DC-GH5",
    "Panasonic DC-S5",
    "Pentax K-1",
    "Leica Q2",
];

// Non-TIFF container magics rawloader also understands.
const MAGIC_RW2: [u8; 4] = [0x49, 0x49, 0x55, 0x00];
const MAGIC_ORF_O: [u8; 4] = [0x49, 0x49, 0x52, 0x4F];
const MAGIC_ORF_S: [u8; 4] = [0x49, 0x49, 0x53, 0x4F];
const MAGIC_RAF: &[u8] = b"FUJIFILM";

/// Pure-Rust decode engine. One instance per session.
pub struct SoftwareEngine {
    source: Option<Vec<u8>>,
    source_path: Option<PathBuf>,
    raw: Option<RawImage>,
    /// Frame dimensions read from the container at load time, before any
    /// sensor decode.
    container_dims: Option<(u32, u32)>,
    developed: Option<RasterDescriptor>,
    thumb: Option<RasterDescriptor>,
    ident: EngineIdent,
    lens: EngineLens,
    maximum_override: Option<u32>,
    black_subtracted: bool,
    warnings: u32,
}

impl SoftwareEngine {
    pub fn new() -> Self {
        Self {
            source: None,
            source_path: None,
            raw: None,
            container_dims: None,
            developed: None,
            thumb: None,
            ident: EngineIdent::default(),
            lens: EngineLens::default(),
            maximum_override: None,
            black_subtracted: false,
            warnings: 0,
        }
    }

    fn accept(&mut self, data: Vec<u8>) -> EngineStatus {
        if !signature_supported(&data) {
            return EngineStatus::FILE_UNSUPPORTED;
        }
        // Maker metadata is best-effort; its absence is a warning, not
        // a failure.
        match read_exif(&data) {
            Some((ident, lens)) => {
                self.ident = ident;
                self.lens = lens;
            }
            None => self.warnings += 1,
        }
        self.container_dims = super::container_dimensions(&data);
        self.source = Some(data);
        EngineStatus::SUCCESS
    }

    /// Active sensor area after subtracting the masked crop borders.
    fn active_area(raw: &RawImage) -> (usize, usize, usize, usize) {
        let top = raw.crops[0];
        let right = raw.crops[1];
        let bottom = raw.crops[2];
        let left = raw.crops[3];
        let width = raw.width.saturating_sub(left + right).max(1);
        let height = raw.height.saturating_sub(top + bottom).max(1);
        (left, top, width, height)
    }

    fn white_level(&self, raw: &RawImage) -> f32 {
        let white = self
            .maximum_override
            .unwrap_or(raw.whitelevels[0] as u32)
            .max(1);
        white as f32
    }

    /// Half-size develop of CFA sensor data into RGB8.
    fn develop_cfa(&self, raw: &RawImage, data: &[u16]) -> RasterDescriptor {
        let (left, top, width, height) = Self::active_area(raw);
        let out_w = (width / 2).max(1);
        let out_h = (height / 2).max(1);

        let black = if self.black_subtracted {
            0.0
        } else {
            raw.blacklevels[0] as f32
        };
        let range = (self.white_level(raw) - black).max(1.0);

        // Normalize white balance so green stays at 1.0.
        let green = if raw.wb_coeffs[1].is_normal() {
            raw.wb_coeffs[1]
        } else {
            1.0
        };
        let wb = [
            safe_mul(raw.wb_coeffs[0] / green),
            1.0,
            safe_mul(raw.wb_coeffs[2] / green),
        ];

        let mut out = Vec::with_capacity(out_w * out_h * 3);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = [0.0f32; 3];
                let mut cnt = [0u32; 3];
                for dy in 0..2 {
                    for dx in 0..2 {
                        let row = top + oy * 2 + dy;
                        let col = left + ox * 2 + dx;
                        let Some(&v) = data.get(row * raw.width + col) else {
                            continue;
                        };
                        let c = match raw.cfa.color_at(row, col) {
                            3 => 1, // second green
                            c => c.min(2),
                        };
                        acc[c] += (v as f32 - black).max(0.0) / range;
                        cnt[c] += 1;
                    }
                }
                for c in 0..3 {
                    let v = if cnt[c] > 0 { acc[c] / cnt[c] as f32 } else { 0.0 };
                    out.push(to_srgb8(v * wb[c]));
                }
            }
        }

        RasterDescriptor {
            width: out_w as u32,
            height: out_h as u32,
            channels: 3,
            bits_per_sample: 8,
            data: out,
        }
    }

    /// Develop of already-demosaiced (cpp == 3) data: normalize and gamma.
    fn develop_rgb(&self, raw: &RawImage, data: &[u16]) -> RasterDescriptor {
        let black = if self.black_subtracted {
            0.0
        } else {
            raw.blacklevels[0] as f32
        };
        let range = (self.white_level(raw) - black).max(1.0);

        let mut out = Vec::with_capacity(raw.width * raw.height * 3);
        for &v in data.iter().take(raw.width * raw.height * 3) {
            out.push(to_srgb8(((v as f32) - black).max(0.0) / range));
        }

        RasterDescriptor {
            width: raw.width as u32,
            height: raw.height as u32,
            channels: 3,
            bits_per_sample: 8,
            data: out,
        }
    }
}

impl Default for SoftwareEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for SoftwareEngine {
    fn open_file(&mut self, path: &Path) -> EngineStatus {
        match std::fs::read(path) {
            Ok(bytes) => {
                self.source_path = Some(path.to_path_buf());
                self.accept(bytes)
            }
            Err(_) => EngineStatus::IO_ERROR,
        }
    }

    fn open_buffer(&mut self, data: &[u8]) -> EngineStatus {
        self.source_path = None;
        self.accept(data.to_vec())
    }

    fn unpack(&mut self) -> EngineStatus {
        let Some(source) = self.source.as_ref() else {
            return EngineStatus::OUT_OF_ORDER_CALL;
        };
        let mut cursor = Cursor::new(source.as_slice());
        match rawloader::decode(&mut cursor) {
            Ok(raw) => {
                self.raw = Some(raw);
                EngineStatus::SUCCESS
            }
            // rawloader's error type is an opaque struct; unsupported files
            // are only distinguishable by the "Couldn't find ..." messages
            // its decoder lookup emits.
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("Couldn't find a decoder")
                    || msg.contains("Couldn't find camera")
                {
                    EngineStatus::FILE_UNSUPPORTED
                } else {
                    EngineStatus::DATA_ERROR
                }
            }
        }
    }

    fn unpack_thumbnail(&mut self) -> EngineStatus {
        let Some(source) = self.source.as_ref() else {
            return EngineStatus::OUT_OF_ORDER_CALL;
        };
        let jpeg = match super::extract_embedded_jpeg(source) {
            Ok(jpeg) => jpeg,
            Err(status) => {
                self.warnings += 1;
                return status;
            }
        };
        match image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg) {
            Ok(img) => {
                let rgb = img.to_rgb8();
                self.thumb = Some(RasterDescriptor {
                    width: rgb.width(),
                    height: rgb.height(),
                    channels: 3,
                    bits_per_sample: 8,
                    data: rgb.into_raw(),
                });
                EngineStatus::SUCCESS
            }
            Err(_) => EngineStatus::UNSUPPORTED_THUMBNAIL,
        }
    }

    fn subtract_black(&mut self) -> EngineStatus {
        let Some(raw) = self.raw.as_mut() else {
            return EngineStatus::OUT_OF_ORDER_CALL;
        };
        if self.black_subtracted {
            return EngineStatus::SUCCESS;
        }
        let black = raw.blacklevels[0];
        if let RawImageData::Integer(data) = &mut raw.data {
            for v in data.iter_mut() {
                *v = v.saturating_sub(black);
            }
        }
        self.black_subtracted = true;
        EngineStatus::SUCCESS
    }

    fn adjust_maximum(&mut self) -> EngineStatus {
        let Some(raw) = self.raw.as_ref() else {
            return EngineStatus::OUT_OF_ORDER_CALL;
        };
        if let RawImageData::Integer(data) = &raw.data {
            if let Some(&max) = data.iter().max() {
                self.maximum_override = Some(u32::from(max).max(1));
            }
        }
        EngineStatus::SUCCESS
    }

    fn process(&mut self) -> EngineStatus {
        let Some(raw) = self.raw.as_ref() else {
            return EngineStatus::OUT_OF_ORDER_CALL;
        };
        let RawImageData::Integer(data) = &raw.data else {
            // Floating-point sensor data is out of scope for the
            // software develop path.
            return EngineStatus::DATA_ERROR;
        };
        let developed = if raw.cpp == 3 {
            self.develop_rgb(raw, data)
        } else {
            self.develop_cfa(raw, data)
        };
        if developed.data.is_empty() {
            return EngineStatus::INSUFFICIENT_MEMORY;
        }
        self.developed = Some(developed);
        EngineStatus::SUCCESS
    }

    fn raster(&self) -> Result<RasterDescriptor, EngineStatus> {
        self.developed
            .clone()
            .ok_or(EngineStatus::OUT_OF_ORDER_CALL)
    }

    fn thumbnail(&self) -> Result<RasterDescriptor, EngineStatus> {
        self.thumb.clone().ok_or(EngineStatus::NO_THUMBNAIL)
    }

    fn ident(&self) -> EngineIdent {
        let mut ident = self.ident.clone();
        // rawloader's normalized names win over raw EXIF strings when the
        // sensor data has been unpacked.
        if let Some(raw) = self.raw.as_ref() {
            if !raw.clean_make.is_empty() {
                ident.make = raw.clean_make.clone();
            }
            if !raw.clean_model.is_empty() {
                ident.model = raw.clean_model.clone();
            }
        }
        ident
    }

    fn sizes(&self) -> EngineSizes {
        let Some(raw) = self.raw.as_ref() else {
            // Sensor data not decoded yet; report the frame dimensions the
            // container advertises. Margins and orientation need the full
            // decode and stay at their defaults until then.
            let (width, height) = self.container_dims.unwrap_or((0, 0));
            return EngineSizes {
                width,
                height,
                raw_width: width,
                raw_height: height,
                ..EngineSizes::default()
            };
        };
        let (left, top, width, height) = Self::active_area(raw);
        EngineSizes {
            width: width as u32,
            height: height as u32,
            raw_width: raw.width as u32,
            raw_height: raw.height as u32,
            top_margin: top as u32,
            left_margin: left as u32,
            flip: orientation_code(&raw.orientation),
        }
    }

    fn color(&self) -> EngineColor {
        let Some(raw) = self.raw.as_ref() else {
            return EngineColor::default();
        };
        EngineColor {
            colors: if raw.cpp == 3 { 3 } else { 4 },
            filter_pattern: raw.cfa.name.clone(),
            cam_xyz: raw.xyz_to_cam,
            black_level: if self.black_subtracted {
                0
            } else {
                raw.blacklevels[0] as u32
            },
            maximum: self
                .maximum_override
                .unwrap_or(raw.whitelevels[0] as u32),
            cam_mul: raw.wb_coeffs,
        }
    }

    fn lens(&self) -> EngineLens {
        self.lens.clone()
    }

    fn error_count(&self) -> u32 {
        self.warnings
    }

    fn recycle(&mut self) {
        self.source = None;
        self.source_path = None;
        self.raw = None;
        self.container_dims = None;
        self.developed = None;
        self.thumb = None;
        self.ident = EngineIdent::default();
        self.lens = EngineLens::default();
        self.maximum_override = None;
        self.black_subtracted = false;
    }
}

fn signature_supported(bytes: &[u8]) -> bool {
    if super::looks_like_raw(bytes) {
        return true;
    }
    if bytes.len() < 8 {
        return false;
    }
    bytes[..4] == MAGIC_RW2
        || bytes[..4] == MAGIC_ORF_O
        || bytes[..4] == MAGIC_ORF_S
        || bytes.starts_with(MAGIC_RAF)
}

fn orientation_code(orientation: &rawloader::Orientation) -> u32 {
    use rawloader::Orientation::*;
    match orientation {
        Normal => 0,
        HorizontalFlip => 1,
        Rotate180 => 3,
        VerticalFlip => 2,
        Transpose => 4,
        Rotate90 => 6,
        Transverse => 7,
        Rotate270 => 5,
        Unknown => 0,
    }
}

fn safe_mul(v: f32) -> f32 {
    if v.is_normal() && v > 0.0 {
        v
    } else {
        1.0
    }
}

/// Linear [0,1] to gamma-encoded 8-bit.
fn to_srgb8(v: f32) -> u8 {
    let v = v.clamp(0.0, 1.0);
    let encoded = if v <= 0.0031308 {
        12.92 * v
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    };
    (encoded * 255.0 + 0.5) as u8
}

/// Best-effort maker metadata from the EXIF container.
fn read_exif(bytes: &[u8]) -> Option<(EngineIdent, EngineLens)> {
    let mut reader = BufReader::new(Cursor::new(bytes));
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let ident = EngineIdent {
        make: exif_string(&exif, Tag::Make),
        model: exif_string(&exif, Tag::Model),
        software: exif_string(&exif, Tag::Software),
        iso_speed: exif_u32(&exif, Tag::PhotographicSensitivity) as f32,
        shutter: exif_rational(&exif, Tag::ExposureTime),
        aperture: exif_rational(&exif, Tag::FNumber),
        focal_len: exif_rational(&exif, Tag::FocalLength),
        timestamp: exif
            .get_field(Tag::DateTimeOriginal, In::PRIMARY)
            .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))
            .map(|f| f.display_value().to_string().trim_matches('"').to_string())
            .unwrap_or_default(),
    };

    let (min_focal, max_focal) = exif
        .get_field(Tag::LensSpecification, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Rational(v) if v.len() >= 2 => {
                Some((v[0].to_f64() as f32, v[1].to_f64() as f32))
            }
            _ => None,
        })
        .unwrap_or((ident.focal_len, ident.focal_len));

    let lens = EngineLens {
        name: exif_string(&exif, Tag::LensModel),
        min_focal,
        max_focal,
        serial: exif_string(&exif, Tag::LensSerialNumber),
    };

    Some((ident, lens))
}

fn exif_string(exif: &exif::Exif, tag: Tag) -> String {
    exif.get_field(tag, In::PRIMARY)
        .map(|f| f.display_value().to_string().trim_matches('"').to_string())
        .unwrap_or_default()
}

fn exif_u32(exif: &exif::Exif, tag: Tag) -> u32 {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Short(v) => v.first().map(|&x| u32::from(x)),
            Value::Long(v) => v.first().copied(),
            _ => None,
        })
        .unwrap_or(0)
}

fn exif_rational(exif: &exif::Exif, tag: Tag) -> f32 {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|f| match &f.value {
            Value::Rational(v) => v.first().map(|r| r.to_f64() as f32),
            _ => None,
        })
        .unwrap_or(0.0)
}
