//! End-to-end tests of the session facade over a scripted engine.
//!
//! The scripted engine produces a deterministic synthetic raster, so
//! these tests exercise the full lifecycle, queueing and encode paths
//! without needing camera files on disk.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rawbridge_core::engine::{
    DecodeEngine, EngineColor, EngineIdent, EngineLens, EngineSizes, EngineStatus,
    RasterDescriptor,
};
use rawbridge_core::{
    ChromaSubsampling, Config, EncodeOptions, HandleState, OutputFormat, RawSession,
    SessionError, WorkerPool,
};

const RASTER_W: u32 = 192;
const RASTER_H: u32 = 128;
const THUMB_W: u32 = 48;
const THUMB_H: u32 = 32;

fn gradient(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            data.push((x * 255 / width.max(1)) as u8);
            data.push((y * 255 / height.max(1)) as u8);
            data.push(((x + y) % 256) as u8);
        }
    }
    data
}

/// Engine that decodes a synthetic scene regardless of input bytes.
struct ScriptedEngine {
    loaded: bool,
    unpacked: bool,
    processed: bool,
    thumb_decoded: bool,
    warnings: u32,
    releases: Arc<AtomicU32>,
}

impl ScriptedEngine {
    fn new() -> Self {
        Self::with_release_counter(Arc::new(AtomicU32::new(0)))
    }

    /// Shares a counter incremented on every `recycle`, for asserting
    /// that native resources are released exactly once per session.
    fn with_release_counter(releases: Arc<AtomicU32>) -> Self {
        Self {
            loaded: false,
            unpacked: false,
            processed: false,
            thumb_decoded: false,
            warnings: 0,
            releases,
        }
    }
}

impl DecodeEngine for ScriptedEngine {
    fn open_file(&mut self, path: &Path) -> EngineStatus {
        if !path.exists() {
            return EngineStatus::IO_ERROR;
        }
        self.loaded = true;
        EngineStatus::SUCCESS
    }

    fn open_buffer(&mut self, _data: &[u8]) -> EngineStatus {
        self.loaded = true;
        EngineStatus::SUCCESS
    }

    fn unpack(&mut self) -> EngineStatus {
        if !self.loaded {
            return EngineStatus::OUT_OF_ORDER_CALL;
        }
        self.unpacked = true;
        EngineStatus::SUCCESS
    }

    fn unpack_thumbnail(&mut self) -> EngineStatus {
        if !self.loaded {
            return EngineStatus::OUT_OF_ORDER_CALL;
        }
        self.thumb_decoded = true;
        EngineStatus::SUCCESS
    }

    fn subtract_black(&mut self) -> EngineStatus {
        EngineStatus::SUCCESS
    }

    fn adjust_maximum(&mut self) -> EngineStatus {
        self.warnings += 1;
        EngineStatus::SUCCESS
    }

    fn process(&mut self) -> EngineStatus {
        if !self.unpacked {
            return EngineStatus::OUT_OF_ORDER_CALL;
        }
        self.processed = true;
        EngineStatus::SUCCESS
    }

    fn raster(&self) -> Result<RasterDescriptor, EngineStatus> {
        if !self.processed {
            return Err(EngineStatus::OUT_OF_ORDER_CALL);
        }
        Ok(RasterDescriptor {
            width: RASTER_W,
            height: RASTER_H,
            channels: 3,
            bits_per_sample: 8,
            data: gradient(RASTER_W, RASTER_H),
        })
    }

    fn thumbnail(&self) -> Result<RasterDescriptor, EngineStatus> {
        if !self.thumb_decoded {
            return Err(EngineStatus::NO_THUMBNAIL);
        }
        Ok(RasterDescriptor {
            width: THUMB_W,
            height: THUMB_H,
            channels: 3,
            bits_per_sample: 8,
            data: gradient(THUMB_W, THUMB_H),
        })
    }

    fn ident(&self) -> EngineIdent {
        EngineIdent {
            make: "Scripted".to_string(),
            model: "SC-1000".to_string(),
            iso_speed: 200.0,
            shutter: 1.0 / 125.0,
            aperture: 2.8,
            ..EngineIdent::default()
        }
    }

    fn sizes(&self) -> EngineSizes {
        EngineSizes {
            width: RASTER_W,
            height: RASTER_H,
            raw_width: RASTER_W + 16,
            raw_height: RASTER_H + 8,
            top_margin: 4,
            left_margin: 8,
            flip: 0,
        }
    }

    fn color(&self) -> EngineColor {
        EngineColor {
            colors: 3,
            filter_pattern: "RGGB".to_string(),
            black_level: 512,
            maximum: 16383,
            cam_mul: [2.1, 1.0, 1.6, 1.0],
            ..EngineColor::default()
        }
    }

    fn lens(&self) -> EngineLens {
        EngineLens {
            name: "Scripted 35mm F2.8".to_string(),
            min_focal: 35.0,
            max_focal: 35.0,
            ..EngineLens::default()
        }
    }

    fn error_count(&self) -> u32 {
        self.warnings
    }

    fn recycle(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.loaded = false;
        self.unpacked = false;
        self.processed = false;
        self.thumb_decoded = false;
    }
}

fn scripted_session(pool: &WorkerPool) -> RawSession {
    init_tracing();
    RawSession::with_engine(Box::new(ScriptedEngine::new()), pool, &Config::default())
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let level = Config::default().logging.level;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(format!("rawbridge_core={level}"))
            .with_test_writer()
            .try_init();
    });
}

#[tokio::test]
async fn test_load_then_query_metadata() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();

    let info = session.query_metadata().await.unwrap();
    assert_eq!(info.make, "Scripted");
    assert_eq!(info.model, "SC-1000");
    assert!(!info.make.is_empty() && !info.model.is_empty());

    let size = session.query_size().await.unwrap();
    assert_eq!(size.width, RASTER_W);
    assert_eq!(size.raw_width, RASTER_W + 16);

    let color = session.query_color_info().await.unwrap();
    assert_eq!(color.filter_pattern, "RGGB");
    assert_eq!(color.black_level, 512);

    let lens = session.query_lens_info().await.unwrap();
    assert_eq!(lens.name, "Scripted 35mm F2.8");
    session.close().await;
}

#[tokio::test]
async fn test_load_missing_path_is_io_error() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    let err = session
        .load("/definitely/not/a/real/file.nef")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Io { .. }));
    // Recovery path must still work after a failed load.
    session.close().await;
    assert_eq!(session.state(), HandleState::Closed);
}

#[tokio::test]
async fn test_operations_on_empty_session_fail_with_invalid_state() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);

    let err = session.decode_to_raster().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            actual: HandleState::Empty,
            ..
        }
    ));

    let err = session.query_metadata().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    let err = session
        .encode(OutputFormat::Jpeg, EncodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
    session.close().await;
}

#[tokio::test]
async fn test_operations_after_close_fail_with_invalid_state() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();
    session.close().await;

    let err = session.query_metadata().await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));

    // The raster snapshot is released on close, so encode also refuses.
    let err = session
        .encode(OutputFormat::Jpeg, EncodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            actual: HandleState::Closed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.close().await;
    session.close().await;
    session.close().await;
    assert_eq!(session.state(), HandleState::Closed);
}

#[tokio::test]
async fn test_decode_then_encode_jpeg() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    let dims = session.decode_to_raster().await.unwrap();
    assert_eq!(dims.width, RASTER_W);
    assert_eq!(dims.height, RASTER_H);

    let result = session
        .encode(OutputFormat::Jpeg, EncodeOptions::default())
        .await
        .unwrap();
    assert_eq!(&result.data[..3], &[0xFF, 0xD8, 0xFF]);
    assert_eq!(result.output_dimensions.width, RASTER_W);
    assert_eq!(result.options.quality, 85);
    session.close().await;
}

#[tokio::test]
async fn test_resize_keeps_aspect_ratio() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();

    let result = session
        .encode(
            OutputFormat::Jpeg,
            EncodeOptions {
                width: Some(96),
                ..EncodeOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.output_dimensions.width, 96);
    // 192x128 at width 96 gives height 64, tolerating rounding.
    let expected = 96.0 * RASTER_H as f64 / RASTER_W as f64;
    assert!((result.output_dimensions.height as f64 - expected).abs() <= 1.0);
    session.close().await;
}

#[tokio::test]
async fn test_concurrent_encodes_match_sequential() {
    let pool = WorkerPool::new(4);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();

    let (jpeg, png, webp) = tokio::join!(
        session.encode(OutputFormat::Jpeg, EncodeOptions::default()),
        session.encode(OutputFormat::Png, EncodeOptions::default()),
        session.encode(OutputFormat::WebP, EncodeOptions::default()),
    );
    let jpeg = jpeg.unwrap();
    let png = png.unwrap();
    let webp = webp.unwrap();
    assert_eq!(&jpeg.data[..3], &[0xFF, 0xD8, 0xFF]);
    assert_eq!(&png.data[..4], &[0x89, b'P', b'N', b'G']);
    assert_eq!(&webp.data[..4], b"RIFF");

    // Same snapshot, same options: sequential bytes are identical.
    let jpeg_again = session
        .encode(OutputFormat::Jpeg, EncodeOptions::default())
        .await
        .unwrap();
    assert_eq!(jpeg.data, jpeg_again.data);
    session.close().await;
}

#[tokio::test]
async fn test_jpeg_chroma_remap_is_echoed() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();

    let result = session
        .encode(
            OutputFormat::Jpeg,
            EncodeOptions {
                chroma_subsampling: ChromaSubsampling::Cs422,
                ..EncodeOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.options.chroma_subsampling, ChromaSubsampling::Cs444);
    session.close().await;
}

#[tokio::test]
async fn test_thumbnail_branch_does_not_advance_lifecycle() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();

    let dims = session.unpack_thumbnail().await.unwrap();
    assert_eq!(dims.width, THUMB_W);
    assert_eq!(session.state(), HandleState::Loaded);

    let thumb = session
        .encode(OutputFormat::JpegThumbnail, EncodeOptions::default())
        .await
        .unwrap();
    assert_eq!(&thumb.data[..3], &[0xFF, 0xD8, 0xFF]);
    assert_eq!(thumb.output_dimensions.width, THUMB_W);

    // Full-size encode still requires the processed raster.
    let err = session
        .encode(OutputFormat::Jpeg, EncodeOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            required: HandleState::Processed,
            ..
        }
    ));
    session.close().await;
}

#[tokio::test]
async fn test_subtract_black_and_adjust_maximum_chain() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.subtract_black().await.unwrap();
    session.adjust_maximum().await.unwrap();
    assert_eq!(session.error_count().await.unwrap(), 1);

    let dims = session.decode_to_raster().await.unwrap();
    assert_eq!(dims.width, RASTER_W);
    session.close().await;
}

#[tokio::test]
async fn test_write_to_storage() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.png");

    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();
    session
        .write_to_storage(OutputFormat::Png, EncodeOptions::default(), &out)
        .await
        .unwrap();

    let written = std::fs::read(&out).unwrap();
    assert_eq!(&written[..4], &[0x89, b'P', b'N', b'G']);
    session.close().await;
}

#[tokio::test]
async fn test_invalid_options_fail_before_dispatch() {
    let pool = WorkerPool::new(2);
    let session = scripted_session(&pool);
    session.load_buffer(vec![0u8; 64]).await.unwrap();
    session.decode_to_raster().await.unwrap();

    let err = session
        .encode(
            OutputFormat::Jpeg,
            EncodeOptions {
                quality: 0,
                ..EncodeOptions::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    session.close().await;
}

#[tokio::test]
async fn test_repeated_sessions_on_shared_pool() {
    let pool = WorkerPool::new(2);
    for _ in 0..5 {
        let session = scripted_session(&pool);
        session.load_buffer(vec![0u8; 64]).await.unwrap();
        session.decode_to_raster().await.unwrap();
        let jpeg = session
            .encode(OutputFormat::Jpeg, EncodeOptions::default())
            .await
            .unwrap();
        assert!(!jpeg.data.is_empty());
        session.close().await;
    }
}

#[tokio::test]
async fn test_session_cycles_release_engine_exactly_once_each() {
    let pool = WorkerPool::new(2);
    let releases = Arc::new(AtomicU32::new(0));
    const CYCLES: u32 = 100;

    for i in 0..CYCLES {
        let engine = ScriptedEngine::with_release_counter(Arc::clone(&releases));
        let session = RawSession::with_engine(Box::new(engine), &pool, &Config::default());
        session.load_buffer(vec![0u8; 64]).await.unwrap();
        session.decode_to_raster().await.unwrap();
        session.close().await;
        // Double close must not release twice.
        session.close().await;
        assert_eq!(releases.load(Ordering::SeqCst), i + 1);
    }
    assert_eq!(releases.load(Ordering::SeqCst), CYCLES);
}

#[tokio::test]
async fn test_software_engine_reports_sizes_after_load() {
    // Minimal little-endian TIFF whose IFD0 advertises the frame size.
    let mut tiff = Vec::new();
    tiff.extend_from_slice(&[0x49, 0x49, 0x2A, 0x00]);
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value) in [(0x0100u16, 6000u32), (0x0101, 4000)] {
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&4u16.to_le_bytes());
        tiff.extend_from_slice(&1u32.to_le_bytes());
        tiff.extend_from_slice(&value.to_le_bytes());
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    let pool = WorkerPool::new(2);
    let session = RawSession::new(&pool, &Config::default());
    session.load_buffer(tiff).await.unwrap();

    let size = session.query_size().await.unwrap();
    assert!(size.width > 0 && size.height > 0);
    assert_eq!(size.width, 6000);
    assert_eq!(size.height, 4000);
    session.close().await;
}

#[tokio::test]
async fn test_oversized_buffer_is_rejected() {
    let pool = WorkerPool::new(2);
    let mut config = Config::default();
    config.limits.max_file_size_mb = 1;
    let session =
        RawSession::with_engine(Box::new(ScriptedEngine::new()), &pool, &config);

    let err = session
        .load_buffer(vec![0u8; 2 * 1024 * 1024])
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    session.close().await;
}
