//! Metadata marshalling from engine structs into immutable records.
//!
//! Marshalling is pure and read-only: it copies fields out of the engine's
//! structs into owned value types and never mutates handle state. Fields
//! the engine cannot populate for a given camera come back as sentinels
//! (empty string, zero), never omitted. Records are produced fresh on
//! every query; nothing is cached, since engine state may change between
//! calls.

use serde::{Deserialize, Serialize};

use crate::engine::DecodeEngine;

/// Camera identification and shot parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    pub make: String,
    pub model: String,
    pub software: String,
    /// ISO sensitivity; 0.0 when unreported.
    pub iso_speed: f32,
    /// Exposure time in seconds; 0.0 when unreported.
    pub shutter: f32,
    /// F-number; 0.0 when unreported.
    pub aperture: f32,
    /// Focal length in millimeters; 0.0 when unreported.
    pub focal_length: f32,
    /// Capture time string; empty when unreported.
    pub timestamp: String,
}

/// Image geometry, including masked sensor margins.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SizeInfo {
    /// Usable image width after crop.
    pub width: u32,
    /// Usable image height after crop.
    pub height: u32,
    /// Full sensor width.
    pub raw_width: u32,
    /// Full sensor height.
    pub raw_height: u32,
    pub top_margin: u32,
    pub left_margin: u32,
    /// Orientation code; 0 means upright.
    pub flip: u32,
}

/// Color pipeline parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColorInfo {
    /// Number of CFA colors (3 for demosaiced sources, 4 for Bayer).
    pub color_count: u32,
    /// CFA layout name, e.g. "RGGB"; empty for non-CFA sources.
    pub filter_pattern: String,
    /// Camera-to-XYZ conversion matrix, one row per CFA color.
    pub cam_to_xyz: [[f32; 3]; 4],
    pub black_level: u32,
    /// White level / data maximum.
    pub maximum: u32,
    /// As-shot white balance multipliers.
    pub white_balance: [f32; 4],
}

/// Lens identification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensInfo {
    pub name: String,
    /// Shortest focal length in millimeters; 0.0 when unreported.
    pub min_focal: f32,
    /// Longest focal length in millimeters; 0.0 when unreported.
    pub max_focal: f32,
    pub serial: String,
}

pub fn camera_info(engine: &dyn DecodeEngine) -> CameraInfo {
    let ident = engine.ident();
    CameraInfo {
        make: ident.make,
        model: ident.model,
        software: ident.software,
        iso_speed: ident.iso_speed,
        shutter: ident.shutter,
        aperture: ident.aperture,
        focal_length: ident.focal_len,
        timestamp: ident.timestamp,
    }
}

pub fn size_info(engine: &dyn DecodeEngine) -> SizeInfo {
    let sizes = engine.sizes();
    SizeInfo {
        width: sizes.width,
        height: sizes.height,
        raw_width: sizes.raw_width,
        raw_height: sizes.raw_height,
        top_margin: sizes.top_margin,
        left_margin: sizes.left_margin,
        flip: sizes.flip,
    }
}

pub fn color_info(engine: &dyn DecodeEngine) -> ColorInfo {
    let color = engine.color();
    ColorInfo {
        color_count: color.colors,
        filter_pattern: color.filter_pattern,
        cam_to_xyz: color.cam_xyz,
        black_level: color.black_level,
        maximum: color.maximum,
        white_balance: color.cam_mul,
    }
}

pub fn lens_info(engine: &dyn DecodeEngine) -> LensInfo {
    let lens = engine.lens();
    LensInfo {
        name: lens.name,
        min_focal: lens.min_focal,
        max_focal: lens.max_focal,
        serial: lens.serial,
    }
}
