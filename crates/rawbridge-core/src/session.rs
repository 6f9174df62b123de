//! The session facade, composing the handle, scheduler and encode
//! pipeline behind an async surface.
//!
//! One `RawSession` owns exactly one decoder handle. Handle-mutating
//! calls are queued FIFO through the session's command queue; encode
//! calls run directly on the shared worker pool against the immutable
//! raster snapshot, so any number of them may proceed in parallel.
//! `close` is the universal recovery path: it always succeeds, releases
//! the handle exactly once, and pending queued operations observe
//! `InvalidState` instead of touching freed resources.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{Config, LimitsConfig};
use crate::encode::{encode_raster, BufferResult, Dimensions, EncodeOptions, OutputFormat};
use crate::engine::{DecodeEngine, SoftwareEngine};
use crate::error::{Result, SessionError};
use crate::handle::{DecoderHandle, HandleState, RasterSnapshot};
use crate::metadata::{CameraInfo, ColorInfo, LensInfo, SizeInfo};
use crate::sched::{SessionQueue, WorkerPool};

#[derive(Default)]
struct Snapshots {
    raster: Option<Arc<RasterSnapshot>>,
    thumbnail: Option<Arc<RasterSnapshot>>,
}

/// One RAW decoding session over one exclusively-owned decoder handle.
pub struct RawSession {
    queue: SessionQueue,
    pool: WorkerPool,
    handle_id: u64,
    limits: LimitsConfig,
    /// Last state reported by a completed operation; used for error
    /// messages on the facade-side fast paths (the queue task owns the
    /// authoritative state).
    state: Arc<Mutex<HandleState>>,
    snapshots: Arc<Mutex<Snapshots>>,
}

impl RawSession {
    /// Open a session with the software engine, default configuration
    /// and the process-wide worker pool.
    pub fn open() -> Self {
        Self::new(crate::default_pool(), &Config::default())
    }

    /// Open a session with the software engine on a caller-owned pool.
    pub fn new(pool: &WorkerPool, config: &Config) -> Self {
        Self::with_engine(Box::new(SoftwareEngine::new()), pool, config)
    }

    /// Open a session over a custom decode engine.
    pub fn with_engine(
        engine: Box<dyn DecodeEngine>,
        pool: &WorkerPool,
        config: &Config,
    ) -> Self {
        let handle = DecoderHandle::new(engine);
        let handle_id = handle.id();
        let queue = SessionQueue::spawn(handle, pool, config.workers.queue_depth);
        Self {
            queue,
            pool: pool.clone(),
            handle_id,
            limits: config.limits.clone(),
            state: Arc::new(Mutex::new(HandleState::Empty)),
            snapshots: Arc::new(Mutex::new(Snapshots::default())),
        }
    }

    /// Stable identifier for diagnostics and log correlation.
    pub fn handle_id(&self) -> u64 {
        self.handle_id
    }

    /// Last observed handle state.
    pub fn state(&self) -> HandleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_state(&self, state: HandleState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn submit<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: FnOnce(&mut DecoderHandle) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.queue
            .submit(operation, move |handle| {
                let result = op(handle);
                *state.lock().unwrap_or_else(|e| e.into_inner()) = handle.state();
                result
            })
            .await
    }

    /// Load a RAW file from disk. `Empty -> Loaded`.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let meta = tokio::fs::metadata(&path).await.map_err(|e| SessionError::Io {
            path: path.clone(),
            message: e.to_string(),
        })?;
        let limit = self.limits.max_file_size_mb * 1024 * 1024;
        if meta.len() > limit {
            return Err(SessionError::InvalidArgument(format!(
                "file {} exceeds the {} MB limit",
                path.display(),
                self.limits.max_file_size_mb
            )));
        }
        self.submit("load", move |handle| handle.load_file(&path))
            .await
    }

    /// Load RAW data from an in-memory buffer. `Empty -> Loaded`.
    pub async fn load_buffer(&self, data: Vec<u8>) -> Result<()> {
        let limit = self.limits.max_file_size_mb * 1024 * 1024;
        if data.len() as u64 > limit {
            return Err(SessionError::InvalidArgument(format!(
                "buffer exceeds the {} MB limit",
                self.limits.max_file_size_mb
            )));
        }
        self.submit("load", move |handle| handle.load_buffer(&data))
            .await
    }

    /// Extract and decode the embedded preview; publishes the thumbnail
    /// snapshot used by `encode(JpegThumbnail, ..)`. Side-branch: does
    /// not advance the main decode chain.
    pub async fn unpack_thumbnail(&self) -> Result<Dimensions> {
        let snap = self
            .submit("unpack_thumbnail", |handle| handle.unpack_thumbnail())
            .await?;
        let dims = Dimensions {
            width: snap.width,
            height: snap.height,
        };
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .thumbnail = Some(snap);
        Ok(dims)
    }

    /// Decode sensor data and run the color pipeline, publishing the
    /// raster snapshot. Composite of `raw -> image` and `process`;
    /// `Loaded or Unpacked -> Processed`.
    pub async fn decode_to_raster(&self) -> Result<Dimensions> {
        let snap = self
            .submit("decode_to_raster", |handle| {
                if handle.state() == HandleState::Loaded {
                    handle.raw_to_image()?;
                }
                handle.process()
            })
            .await?;
        let dims = Dimensions {
            width: snap.width,
            height: snap.height,
        };
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .raster = Some(snap);
        Ok(dims)
    }

    /// Subtract the black level from the unpacked sensor data. Decodes
    /// the sensor data first when called straight after `load`.
    pub async fn subtract_black(&self) -> Result<()> {
        self.submit("subtract_black", |handle| {
            if handle.state() == HandleState::Loaded {
                handle.raw_to_image()?;
            }
            handle.subtract_black()
        })
        .await
    }

    /// Recompute the white point from actual data maxima.
    pub async fn adjust_maximum(&self) -> Result<()> {
        self.submit("adjust_maximum", |handle| {
            if handle.state() == HandleState::Loaded {
                handle.raw_to_image()?;
            }
            handle.adjust_maximum()
        })
        .await
    }

    /// Camera identification and shot parameters.
    pub async fn query_metadata(&self) -> Result<CameraInfo> {
        self.submit("query_metadata", |handle| handle.query_metadata())
            .await
    }

    /// Image geometry including sensor margins.
    pub async fn query_size(&self) -> Result<SizeInfo> {
        self.submit("query_size", |handle| handle.query_size()).await
    }

    /// Color pipeline parameters.
    pub async fn query_color_info(&self) -> Result<ColorInfo> {
        self.submit("query_color_info", |handle| handle.query_color_info())
            .await
    }

    /// Lens identification.
    pub async fn query_lens_info(&self) -> Result<LensInfo> {
        self.submit("query_lens_info", |handle| handle.query_lens_info())
            .await
    }

    /// Nonfatal warnings accumulated by the engine since load.
    pub async fn error_count(&self) -> Result<u32> {
        self.submit("error_count", |handle| handle.error_count())
            .await
    }

    /// Encode the published snapshot into `format`.
    ///
    /// Options are validated before dispatch; the result echoes the
    /// applied set, including documented remaps. Runs on the shared
    /// worker pool without queuing behind handle-mutating operations,
    /// so concurrent encodes against the same snapshot are safe and may
    /// complete in any order. A failure in one encode never affects its
    /// siblings.
    pub async fn encode(
        &self,
        format: OutputFormat,
        options: EncodeOptions,
    ) -> Result<BufferResult> {
        let applied = options.validated(format)?;
        let snap = {
            let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
            if format.uses_thumbnail() {
                snapshots.thumbnail.clone()
            } else {
                snapshots.raster.clone()
            }
        };
        let Some(snap) = snap else {
            return Err(SessionError::InvalidState {
                operation: "encode",
                required: if format.uses_thumbnail() {
                    HandleState::Loaded
                } else {
                    HandleState::Processed
                },
                actual: self.state(),
            });
        };
        self.pool
            .run(move || encode_raster(&snap, format, &applied))
            .await
    }

    /// Encode and write the result to disk. The byte write is plain
    /// file I/O; the encoded buffer is not retained.
    pub async fn write_to_storage(
        &self,
        format: OutputFormat,
        options: EncodeOptions,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let result = self.encode(format, options).await?;
        tokio::fs::write(&path, &result.data)
            .await
            .map_err(|e| SessionError::Io {
                path: path.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(
            handle_id = self.handle_id,
            path = %path.display(),
            bytes = result.data.len(),
            "wrote encoded output"
        );
        Ok(())
    }

    /// Close the session and release the handle. Idempotent, never
    /// fails, and safe to call from a failure handler: operations still
    /// queued behind the close observe `InvalidState` on completion.
    pub async fn close(&self) {
        self.queue.close().await;
        self.record_state(HandleState::Closed);
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots.raster = None;
        snapshots.thumbnail = None;
    }
}
