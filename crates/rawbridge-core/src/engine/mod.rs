//! The decode-engine boundary.
//!
//! A [`DecodeEngine`] is the black-box collaborator that owns the actual
//! RAW decoding mathematics. The rest of the crate only talks to it through
//! this trait and the opaque [`EngineStatus`] codes it returns; translation
//! into typed errors happens in [`crate::error`].
//!
//! The default implementation ([`software::SoftwareEngine`]) is backed by
//! the `rawloader` and `image` crates, so sessions work without any native
//! library present. A binding to a native decoder can slot in by
//! implementing the trait.

mod software;
mod thumbnail;

pub(crate) use software::KNOWN_CAMERA_MODELS;
pub use software::SoftwareEngine;
pub use thumbnail::{container_dimensions, extract_embedded_jpeg, looks_like_raw};

use std::path::Path;

/// Opaque engine status code.
///
/// Values mirror the convention of native RAW decoders: zero is success,
/// small negatives are recoverable protocol errors, values at or below
/// `-100_000` are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus(i32);

impl EngineStatus {
    pub const SUCCESS: EngineStatus = EngineStatus(0);
    pub const UNSPECIFIED: EngineStatus = EngineStatus(-1);
    pub const FILE_UNSUPPORTED: EngineStatus = EngineStatus(-2);
    pub const OUT_OF_ORDER_CALL: EngineStatus = EngineStatus(-4);
    pub const NO_THUMBNAIL: EngineStatus = EngineStatus(-5);
    pub const UNSUPPORTED_THUMBNAIL: EngineStatus = EngineStatus(-6);
    pub const INSUFFICIENT_MEMORY: EngineStatus = EngineStatus(-100_007);
    pub const DATA_ERROR: EngineStatus = EngineStatus(-100_008);
    pub const IO_ERROR: EngineStatus = EngineStatus(-100_009);

    /// Wrap a raw code. Used at the boundary and in tests; codes outside
    /// the known table still flow through translation as `Internal`.
    pub fn from_code(code: i32) -> Self {
        EngineStatus(code)
    }

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Fatal codes invalidate the handle's intermediate buffers.
    pub fn is_fatal(self) -> bool {
        self.0 <= -100_000
    }

    /// Human-readable description of a status code.
    pub fn strerror(self) -> &'static str {
        match self {
            EngineStatus::SUCCESS => "no error",
            EngineStatus::UNSPECIFIED => "unspecified error",
            EngineStatus::FILE_UNSUPPORTED => "file format not recognized",
            EngineStatus::OUT_OF_ORDER_CALL => "operation called out of order",
            EngineStatus::NO_THUMBNAIL => "no embedded thumbnail",
            EngineStatus::UNSUPPORTED_THUMBNAIL => "unsupported thumbnail format",
            EngineStatus::INSUFFICIENT_MEMORY => "insufficient memory",
            EngineStatus::DATA_ERROR => "malformed data during decode",
            EngineStatus::IO_ERROR => "input/output error",
            _ => "unknown engine error",
        }
    }
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.strerror(), self.0)
    }
}

/// An owned copy of a raster produced by the engine.
///
/// Engines copy out of their internal memory before returning this, so the
/// descriptor has no lifetime ties to the engine.
#[derive(Debug, Clone)]
pub struct RasterDescriptor {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub data: Vec<u8>,
}

/// Camera identification fields, sentinel-filled (empty string / zero)
/// when the engine cannot populate them.
#[derive(Debug, Clone, Default)]
pub struct EngineIdent {
    pub make: String,
    pub model: String,
    pub software: String,
    pub iso_speed: f32,
    pub shutter: f32,
    pub aperture: f32,
    pub focal_len: f32,
    /// Capture time as reported by the maker metadata, empty when absent.
    pub timestamp: String,
}

/// Geometry as reported by the engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSizes {
    pub width: u32,
    pub height: u32,
    pub raw_width: u32,
    pub raw_height: u32,
    pub top_margin: u32,
    pub left_margin: u32,
    /// Orientation code, 0 when upright.
    pub flip: u32,
}

/// Color pipeline parameters.
#[derive(Debug, Clone, Default)]
pub struct EngineColor {
    pub colors: u32,
    pub filter_pattern: String,
    /// Camera-to-XYZ matrix, one row per CFA color.
    pub cam_xyz: [[f32; 3]; 4],
    pub black_level: u32,
    pub maximum: u32,
    /// As-shot white balance multipliers.
    pub cam_mul: [f32; 4],
}

/// Lens identification fields.
#[derive(Debug, Clone, Default)]
pub struct EngineLens {
    pub name: String,
    pub min_focal: f32,
    pub max_focal: f32,
    pub serial: String,
}

/// The stateful decode engine behind one session.
///
/// Implementations are not required to gate call order; the
/// [`crate::handle::DecoderHandle`] state machine guarantees operations
/// arrive in a legal sequence, one at a time. Implementations must be
/// `Send` so they can move between worker-pool threads, but never need to
/// be `Sync`.
pub trait DecodeEngine: Send {
    /// Load RAW data from a file on disk.
    fn open_file(&mut self, path: &Path) -> EngineStatus;

    /// Load RAW data from an in-memory buffer.
    fn open_buffer(&mut self, data: &[u8]) -> EngineStatus;

    /// Decode the sensor data into the intermediate image (raw -> image).
    fn unpack(&mut self) -> EngineStatus;

    /// Extract and decode the embedded preview without touching sensor data.
    fn unpack_thumbnail(&mut self) -> EngineStatus;

    /// Subtract the black level from unpacked sensor values.
    fn subtract_black(&mut self) -> EngineStatus;

    /// Recompute the white point from actual data maxima.
    fn adjust_maximum(&mut self) -> EngineStatus;

    /// Run the color pipeline, producing the final raster.
    fn process(&mut self) -> EngineStatus;

    /// Copy the processed raster out of engine memory.
    fn raster(&self) -> std::result::Result<RasterDescriptor, EngineStatus>;

    /// Copy the decoded thumbnail out of engine memory.
    fn thumbnail(&self) -> std::result::Result<RasterDescriptor, EngineStatus>;

    fn ident(&self) -> EngineIdent;
    fn sizes(&self) -> EngineSizes;
    fn color(&self) -> EngineColor;
    fn lens(&self) -> EngineLens;

    /// Nonfatal warnings accumulated since load.
    fn error_count(&self) -> u32;

    /// Release all engine resources. Must be idempotent.
    fn recycle(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(EngineStatus::SUCCESS.is_success());
        assert!(!EngineStatus::DATA_ERROR.is_success());
        assert!(EngineStatus::DATA_ERROR.is_fatal());
        assert!(EngineStatus::INSUFFICIENT_MEMORY.is_fatal());
        assert!(!EngineStatus::NO_THUMBNAIL.is_fatal());
        assert!(!EngineStatus::FILE_UNSUPPORTED.is_fatal());
    }

    #[test]
    fn test_strerror_unknown_code() {
        assert_eq!(EngineStatus::from_code(-424242).strerror(), "unknown engine error");
    }
}
