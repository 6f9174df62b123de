//! Rawbridge Core - Async orchestration over a stateful RAW decoder.
//!
//! Rawbridge wraps a session-oriented RAW decode engine behind an async
//! facade: one session owns one decoder handle, mutating operations are
//! serialized per session over a bounded shared worker pool, and encode
//! operations fan out in parallel from an immutable raster snapshot.
//!
//! # Architecture
//!
//! ```text
//! RAW file → Load → Unpack → Process → Snapshot → Encode (JPEG/PNG/WebP/…)
//!                 ↘ Thumbnail ───────→ Snapshot → Encode (JPEG)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use rawbridge_core::{EncodeOptions, OutputFormat, RawSession};
//!
//! #[tokio::main]
//! async fn main() -> rawbridge_core::Result<()> {
//!     let session = RawSession::open();
//!     session.load("./photo.nef").await?;
//!     let info = session.query_metadata().await?;
//!     println!("Shot on {} {}", info.make, info.model);
//!
//!     session.decode_to_raster().await?;
//!     let jpeg = session.encode(OutputFormat::Jpeg, EncodeOptions::default()).await?;
//!     println!("{} bytes", jpeg.data.len());
//!     session.close().await;
//!     Ok(())
//! }
//! ```

use std::sync::OnceLock;

use serde::Serialize;

// Module declarations
pub mod config;
pub mod encode;
pub mod engine;
pub mod error;
pub mod handle;
pub mod metadata;
pub mod sched;
pub mod session;

// Re-exports for convenient access
pub use config::Config;
pub use encode::{
    BufferResult, ChromaSubsampling, ColorSpace, Dimensions, EncodeOptions, OutputFormat,
    ResizeFilter,
};
pub use engine::{DecodeEngine, EngineStatus, SoftwareEngine};
pub use error::{ConfigError, Result, SessionError};
pub use handle::{HandleState, RasterSnapshot};
pub use metadata::{CameraInfo, ColorInfo, LensInfo, SizeInfo};
pub use sched::WorkerPool;
pub use session::RawSession;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library version string.
pub fn version() -> &'static str {
    VERSION
}

/// Feature flags describing what this build can do.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Capabilities {
    pub thumbnails: bool,
    pub buffer_input: bool,
    pub formats: &'static [&'static str],
}

/// Capabilities of this build.
pub fn capabilities() -> Capabilities {
    Capabilities {
        thumbnails: true,
        buffer_input: true,
        formats: &["jpeg", "png", "webp", "avif", "tiff", "ppm", "jpeg-thumbnail"],
    }
}

/// Camera models the bundled software engine recognizes.
pub fn supported_camera_models() -> &'static [&'static str] {
    engine::KNOWN_CAMERA_MODELS
}

static DEFAULT_POOL: OnceLock<WorkerPool> = OnceLock::new();

/// The process-wide worker pool used by `RawSession::open`, sized from
/// available parallelism on first use.
pub fn default_pool() -> &'static WorkerPool {
    DEFAULT_POOL.get_or_init(|| WorkerPool::new(0))
}
