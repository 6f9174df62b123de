//! Decoder handle wrapper and its lifecycle state machine.
//!
//! A [`DecoderHandle`] owns exactly one [`DecodeEngine`] and gates every
//! primitive operation on the current lifecycle state:
//!
//! ```text
//! Empty -> Loaded -> Unpacked -> Processed
//!                \-> thumbnail side-branch (any loaded-or-later state)
//! Closed: terminal, reachable from anywhere
//! ```
//!
//! Calling an operation whose precondition does not match fails with
//! `InvalidState` naming the required state; it never silently no-ops.
//! All methods here are synchronous and expected to run on worker-pool
//! threads via the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{DecodeEngine, EngineStatus, RasterDescriptor};
use crate::error::{Result, SessionError};
use crate::metadata::{self, CameraInfo, ColorInfo, LensInfo, SizeInfo};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a decoder handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Empty,
    Loaded,
    Unpacked,
    Processed,
    Closed,
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HandleState::Empty => "empty",
            HandleState::Loaded => "loaded",
            HandleState::Unpacked => "unpacked",
            HandleState::Processed => "processed",
            HandleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Immutable, reference-counted view of a decoded pixel buffer.
///
/// Published once after a successful develop (or thumbnail unpack) and
/// shared read-only by every encode task; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RasterSnapshot {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
    pub data: Vec<u8>,
}

impl From<RasterDescriptor> for RasterSnapshot {
    fn from(d: RasterDescriptor) -> Self {
        Self {
            width: d.width,
            height: d.height,
            channels: d.channels,
            bits_per_sample: d.bits_per_sample,
            data: d.data,
        }
    }
}

/// Owns one decode engine and enforces the operation/state table.
pub struct DecoderHandle {
    engine: Box<dyn DecodeEngine>,
    state: HandleState,
    thumbnail_ready: bool,
    id: u64,
}

impl DecoderHandle {
    pub fn new(engine: Box<dyn DecodeEngine>) -> Self {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(handle_id = id, "decoder handle created");
        Self {
            engine,
            state: HandleState::Empty,
            thumbnail_ready: false,
            id,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Whether the thumbnail side-branch has been taken.
    pub fn thumbnail_ready(&self) -> bool {
        self.thumbnail_ready
    }

    fn require(&self, operation: &'static str, required: HandleState) -> Result<()> {
        if self.state == required {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                required,
                actual: self.state,
            })
        }
    }

    /// Loaded or any later non-closed state.
    fn require_loaded(&self, operation: &'static str) -> Result<()> {
        match self.state {
            HandleState::Loaded | HandleState::Unpacked | HandleState::Processed => Ok(()),
            _ => Err(SessionError::InvalidState {
                operation,
                required: HandleState::Loaded,
                actual: self.state,
            }),
        }
    }

    fn transition(&mut self, operation: &'static str, to: HandleState) {
        tracing::trace!(
            handle_id = self.id,
            from = %self.state,
            to = %to,
            operation,
            "state transition"
        );
        self.state = to;
    }

    fn check(&self, status: EngineStatus, context: &str) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(SessionError::from_status(status, context))
        }
    }

    /// Load RAW data from a file. `Empty -> Loaded`.
    pub fn load_file(&mut self, path: &std::path::Path) -> Result<()> {
        self.require("load", HandleState::Empty)?;
        let status = self.engine.open_file(path);
        self.check(status, &path.display().to_string())?;
        self.transition("load", HandleState::Loaded);
        Ok(())
    }

    /// Load RAW data from an in-memory buffer. `Empty -> Loaded`.
    pub fn load_buffer(&mut self, data: &[u8]) -> Result<()> {
        self.require("load", HandleState::Empty)?;
        let status = self.engine.open_buffer(data);
        self.check(status, "in-memory buffer")?;
        self.transition("load", HandleState::Loaded);
        Ok(())
    }

    /// Extract and decode the embedded preview. Side-branch; legal from
    /// any loaded-or-later state and does not change the main chain.
    pub fn unpack_thumbnail(&mut self) -> Result<Arc<RasterSnapshot>> {
        self.require_loaded("unpack_thumbnail")?;
        let status = self.engine.unpack_thumbnail();
        self.check(status, "embedded thumbnail")?;
        let descriptor = self
            .engine
            .thumbnail()
            .map_err(|s| SessionError::from_status(s, "embedded thumbnail"))?;
        self.thumbnail_ready = true;
        Ok(Arc::new(descriptor.into()))
    }

    /// Decode sensor data into the intermediate image. `Loaded -> Unpacked`.
    pub fn raw_to_image(&mut self) -> Result<()> {
        self.require("raw_to_image", HandleState::Loaded)?;
        let status = self.engine.unpack();
        self.check(status, "sensor data")?;
        self.transition("raw_to_image", HandleState::Unpacked);
        Ok(())
    }

    /// Subtract the black level in place. `Unpacked -> Unpacked`.
    pub fn subtract_black(&mut self) -> Result<()> {
        self.require("subtract_black", HandleState::Unpacked)?;
        let status = self.engine.subtract_black();
        self.check(status, "black subtraction")
    }

    /// Recompute the white point from data maxima. `Unpacked -> Unpacked`.
    pub fn adjust_maximum(&mut self) -> Result<()> {
        self.require("adjust_maximum", HandleState::Unpacked)?;
        let status = self.engine.adjust_maximum();
        self.check(status, "maximum adjustment")
    }

    /// Run the color pipeline and publish the raster snapshot.
    /// `Unpacked -> Processed`.
    pub fn process(&mut self) -> Result<Arc<RasterSnapshot>> {
        self.require("process", HandleState::Unpacked)?;
        let status = self.engine.process();
        self.check(status, "color pipeline")?;
        let descriptor = self
            .engine
            .raster()
            .map_err(|s| SessionError::from_status(s, "processed raster"))?;
        self.transition("process", HandleState::Processed);
        Ok(Arc::new(descriptor.into()))
    }

    /// Camera identification. Queries require a loaded handle and never
    /// mutate engine state.
    pub fn query_metadata(&self) -> Result<CameraInfo> {
        self.require_loaded("query_metadata")?;
        Ok(metadata::camera_info(self.engine.as_ref()))
    }

    pub fn query_size(&self) -> Result<SizeInfo> {
        self.require_loaded("query_size")?;
        Ok(metadata::size_info(self.engine.as_ref()))
    }

    pub fn query_color_info(&self) -> Result<ColorInfo> {
        self.require_loaded("query_color_info")?;
        Ok(metadata::color_info(self.engine.as_ref()))
    }

    pub fn query_lens_info(&self) -> Result<LensInfo> {
        self.require_loaded("query_lens_info")?;
        Ok(metadata::lens_info(self.engine.as_ref()))
    }

    /// Nonfatal warning count accumulated by the engine since load.
    pub fn error_count(&self) -> Result<u32> {
        self.require_loaded("error_count")?;
        Ok(self.engine.error_count())
    }

    /// Release the engine. Idempotent; never fails. The engine is
    /// recycled exactly once.
    pub fn close(&mut self) {
        if self.state == HandleState::Closed {
            return;
        }
        tracing::debug!(handle_id = self.id, "closing decoder handle");
        self.engine.recycle();
        self.thumbnail_ready = false;
        self.transition("close", HandleState::Closed);
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.close();
    }
}
