//! Animated GIF assembly, re-encoding, and frame extraction.
//!
//! Three operations, each reporting coarse percentage progress through a
//! caller-supplied callback:
//!
//! | Operation | Ledger row |
//! |---|---|
//! | [`create_from_images`] — stills in, one animation out | yes, one |
//! | [`optimize`] — re-encode an existing animation | yes, one |
//! | [`extract_frames`] — animation in, stills out | no |
//!
//! Frame extraction writes no history row: it fans one source out into many
//! files and fits neither the one-row-per-file nor the one-row-per-operation
//! shape, so it stays out of the ledger entirely.
//!
//! Decoding goes through the `image` crate, which hands back fully
//! composited RGBA canvases per frame. Encoding uses the `gif` crate
//! directly for palette and disposal control the high-level encoder does
//! not expose.

mod quantize;

use quantize::{PaletteQuantizer, samplefac_for_quality};

use crate::codec::{self, CodecError, fit_within};
use crate::params::{
    AspectMode, ConversionParams, DisposalMethod, GifCreationParams, GifOptimizationParams,
    OutputFormat,
};
use crate::store::{ConversionRecord, HistoryStore, NewRecord, RecordStatus, StoreError};
use gif::Repeat;
use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, RgbaImage};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

/// NeuQuant sampling factor for re-encoding, where no quality setting
/// applies. 10 is the crate author's recommended speed/fidelity middle.
const OPTIMIZE_SAMPLEFAC: i32 = 10;

#[derive(Error, Debug)]
pub enum AnimationError {
    #[error("animation needs at least 2 frames, got {0}")]
    InsufficientFrames(usize),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("cannot decode animation {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("cannot encode animation {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of [`optimize`]: the ledger row plus the size change.
#[derive(Debug)]
pub struct OptimizeOutcome {
    pub record: ConversionRecord,
    /// Percentage by which the file shrank. Negative when re-encoding grew
    /// the file; surfaced as-is, not clamped.
    pub reduction_percent: f64,
}

/// Assemble an animated GIF from still images, one input per frame.
///
/// All frames share one global palette learned across the whole set. Every
/// frame displays for the same duration. Requires at least two inputs.
///
/// `progress` receives 5 after setup, climbs to 75 during frame decoding,
/// hits 80 before encoding and 100 once the ledger row is persisted.
pub fn create_from_images(
    sources: &[PathBuf],
    target: &Path,
    params: &GifCreationParams,
    store: &HistoryStore,
    progress: impl Fn(u8),
) -> Result<ConversionRecord, AnimationError> {
    if sources.len() < 2 {
        return Err(AnimationError::InsufficientFrames(sources.len()));
    }
    let started = Instant::now();
    let total = sources.len();
    tracing::info!(frames = total, target = %target.display(), "creating animation");
    progress(5);

    let mut frames: Vec<RgbaImage> = Vec::with_capacity(total);
    let mut source_bytes = 0u64;
    for (index, source) in sources.iter().enumerate() {
        source_bytes += fs::metadata(source).map(|m| m.len()).unwrap_or(0);
        let img = codec::open_image(source)?;
        let img = match params.resize() {
            Some(request) => {
                let box_w = request.width.unwrap_or(img.width());
                let box_h = request.height.unwrap_or(img.height());
                match params.aspect() {
                    AspectMode::Preserve => {
                        let (w, h) = fit_within((img.width(), img.height()), (box_w, box_h));
                        img.resize_exact(w, h, FilterType::Lanczos3)
                    }
                    AspectMode::Stretch => img.resize_exact(box_w, box_h, FilterType::Lanczos3),
                }
            }
            None => img,
        };
        frames.push(img.to_rgba8());
        progress((5 + (index + 1) * 70 / total) as u8);
    }

    // Every frame must match the canvas; later frames conform to the first.
    let (canvas_w, canvas_h) = (frames[0].width(), frames[0].height());
    check_canvas(canvas_w, canvas_h, target)?;
    for frame in frames.iter_mut().skip(1) {
        if frame.dimensions() != (canvas_w, canvas_h) {
            *frame = image::imageops::resize(frame, canvas_w, canvas_h, FilterType::Lanczos3);
        }
    }
    progress(80);

    let with_transparency = frames.iter().any(has_transparency);
    let quantizer = PaletteQuantizer::from_frames(
        &frames,
        256,
        with_transparency,
        samplefac_for_quality(params.quality().value()),
    );

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| AnimationError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let writer = BufWriter::new(File::create(target).map_err(|source| AnimationError::Io {
        path: target.to_path_buf(),
        source,
    })?);
    let encode_err = |e: gif::EncodingError| AnimationError::Encode {
        path: target.to_path_buf(),
        reason: e.to_string(),
    };
    {
        let mut encoder = gif::Encoder::new(
            writer,
            canvas_w as u16,
            canvas_h as u16,
            quantizer.palette(),
        )
        .map_err(encode_err)?;
        let repeat = match params.loop_count() {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        };
        encoder.set_repeat(repeat).map_err(encode_err)?;

        let delay_cs = (params.frame_duration_ms() / 10) as u16;
        for frame in &frames {
            let indices = quantizer.index_frame(frame, params.optimize());
            let gif_frame = gif::Frame {
                width: canvas_w as u16,
                height: canvas_h as u16,
                buffer: Cow::Owned(indices),
                delay: delay_cs,
                transparent: quantizer.transparent(),
                dispose: if with_transparency {
                    gif::DisposalMethod::Background
                } else {
                    gif::DisposalMethod::Any
                },
                ..gif::Frame::default()
            };
            encoder.write_frame(&gif_frame).map_err(encode_err)?;
        }
    }

    let record = store.append(&NewRecord {
        source_path: format!("{total} source files"),
        target_path: target.to_string_lossy().into_owned(),
        source_format: "multiple".to_string(),
        target_format: "gif".to_string(),
        source_size: source_bytes,
        target_size: fs::metadata(target).map(|m| m.len()).unwrap_or(0),
        width: Some(canvas_w),
        height: Some(canvas_h),
        duration_ms: started.elapsed().as_millis() as u64,
        status: RecordStatus::Completed,
    })?;
    progress(100);
    Ok(record)
}

/// Re-encode an existing animated GIF, re-quantizing each frame against its
/// own local palette while preserving per-frame durations.
///
/// The size change is reported as-is: a negative `reduction_percent` means
/// re-encoding grew the file, and the caller decides what to do with that.
pub fn optimize(
    source: &Path,
    target: &Path,
    params: &GifOptimizationParams,
    store: &HistoryStore,
    progress: impl Fn(u8),
) -> Result<OptimizeOutcome, AnimationError> {
    let started = Instant::now();
    let frames = decode_frames(source)?;
    let total = frames.len();
    let (canvas_w, canvas_h) = (frames[0].0.width(), frames[0].0.height());
    check_canvas(canvas_w, canvas_h, target)?;
    tracing::info!(frames = total, source = %source.display(), "re-encoding animation");
    progress(10);

    let max_colors = if params.reduce_colors() {
        params.max_colors() as usize
    } else {
        256
    };

    // Per-frame palettes: each frame quantizes independently so one busy
    // frame cannot starve the rest of palette entries.
    let mut encoded: Vec<(Vec<u8>, Vec<u8>, Option<u8>, u32)> = Vec::with_capacity(total);
    for (index, (frame, delay_ms)) in frames.iter().enumerate() {
        let transparent = params.preserve_transparency() && has_transparency(frame);
        let quantizer = PaletteQuantizer::from_frames(
            std::slice::from_ref(frame),
            max_colors,
            transparent,
            OPTIMIZE_SAMPLEFAC,
        );
        let indices = quantizer.index_frame(frame, params.dither());
        encoded.push((
            indices,
            quantizer.palette().to_vec(),
            quantizer.transparent(),
            *delay_ms,
        ));
        progress((10 + (index + 1) * 60 / total) as u8);
    }
    progress(70);

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| AnimationError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let writer = BufWriter::new(File::create(target).map_err(|source| AnimationError::Io {
        path: target.to_path_buf(),
        source,
    })?);
    let encode_err = |e: gif::EncodingError| AnimationError::Encode {
        path: target.to_path_buf(),
        reason: e.to_string(),
    };
    {
        // Empty global palette: every frame carries its own.
        let mut encoder =
            gif::Encoder::new(writer, canvas_w as u16, canvas_h as u16, &[]).map_err(encode_err)?;
        encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?;

        for (indices, palette, transparent, delay_ms) in encoded {
            let gif_frame = gif::Frame {
                width: canvas_w as u16,
                height: canvas_h as u16,
                buffer: Cow::Owned(indices),
                palette: Some(palette),
                delay: (delay_ms / 10) as u16,
                transparent,
                dispose: disposal_of(params.disposal()),
                ..gif::Frame::default()
            };
            encoder.write_frame(&gif_frame).map_err(encode_err)?;
        }
    }

    let source_size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);
    let target_size = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
    let reduction_percent = if source_size > 0 {
        (1.0 - target_size as f64 / source_size as f64) * 100.0
    } else {
        0.0
    };

    let record = store.append(&NewRecord {
        source_path: source.to_string_lossy().into_owned(),
        target_path: target.to_string_lossy().into_owned(),
        source_format: "gif".to_string(),
        target_format: "gif".to_string(),
        source_size,
        target_size,
        width: Some(canvas_w),
        height: Some(canvas_h),
        duration_ms: started.elapsed().as_millis() as u64,
        status: RecordStatus::Completed,
    })?;
    progress(100);

    Ok(OptimizeOutcome {
        record,
        reduction_percent,
    })
}

/// Split an animated GIF into numbered still images (`frame_0000.png`,
/// `frame_0001.png`, ...) in the given directory.
///
/// Returns the written paths in frame order. Appends nothing to the ledger.
pub fn extract_frames(
    source: &Path,
    output_dir: &Path,
    format: OutputFormat,
    progress: impl Fn(u8),
) -> Result<Vec<PathBuf>, AnimationError> {
    let frames = decode_frames(source)?;
    let total = frames.len();
    tracing::info!(frames = total, source = %source.display(), "extracting frames");

    fs::create_dir_all(output_dir).map_err(|source| AnimationError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let params = ConversionParams::new(format);
    let mut written = Vec::with_capacity(total);
    for (index, (frame, _)) in frames.into_iter().enumerate() {
        let path = output_dir.join(format!("frame_{index:04}.{}", format.ext()));
        codec::encode(&DynamicImage::ImageRgba8(frame), &path, &params)?;
        written.push(path);
        progress(((index + 1) * 100 / total) as u8);
    }
    Ok(written)
}

/// Decode an animated GIF into composited RGBA frames with their display
/// durations in milliseconds.
fn decode_frames(source: &Path) -> Result<Vec<(RgbaImage, u32)>, AnimationError> {
    let decode_err = |reason: String| AnimationError::Decode {
        path: source.to_path_buf(),
        reason,
    };

    let file = File::open(source).map_err(|e| AnimationError::Io {
        path: source.to_path_buf(),
        source: e,
    })?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| decode_err(e.to_string()))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| decode_err(e.to_string()))?;
    if frames.is_empty() {
        return Err(decode_err("no frames".to_string()));
    }

    Ok(frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let ms = if denom == 0 { numer } else { numer / denom };
            (frame.into_buffer(), ms)
        })
        .collect())
}

/// The GIF logical screen is addressed with u16 fields; anything larger
/// cannot be encoded.
fn check_canvas(width: u32, height: u32, target: &Path) -> Result<(), AnimationError> {
    const GIF_MAX_DIMENSION: u32 = u16::MAX as u32;
    if width > GIF_MAX_DIMENSION || height > GIF_MAX_DIMENSION {
        return Err(AnimationError::Encode {
            path: target.to_path_buf(),
            reason: format!("canvas {width}x{height} exceeds the {GIF_MAX_DIMENSION} pixel GIF limit"),
        });
    }
    Ok(())
}

fn has_transparency(frame: &RgbaImage) -> bool {
    frame.pixels().any(|p| p.0[3] < 128)
}

fn disposal_of(method: DisposalMethod) -> gif::DisposalMethod {
    match method {
        DisposalMethod::Any => gif::DisposalMethod::Any,
        DisposalMethod::Keep => gif::DisposalMethod::Keep,
        DisposalMethod::Background => gif::DisposalMethod::Background,
        DisposalMethod::Previous => gif::DisposalMethod::Previous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::sync::Mutex;

    fn write_png(dir: &Path, name: &str, rgba: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(16, 16, Rgba(rgba)).save(&path).unwrap();
        path
    }

    #[test]
    fn create_rejects_fewer_than_two_frames() {
        let tmp = tempfile::TempDir::new().unwrap();
        let single = write_png(tmp.path(), "only.png", [255, 0, 0, 255]);
        let store = HistoryStore::open_in_memory().unwrap();

        let result = create_from_images(
            &[single],
            &tmp.path().join("out.gif"),
            &GifCreationParams::new(),
            &store,
            |_| {},
        );
        assert!(matches!(result, Err(AnimationError::InsufficientFrames(1))));
        assert!(store.recent(10).is_empty());
    }

    #[test]
    fn create_emits_monotonic_progress_ending_at_100() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sources = vec![
            write_png(tmp.path(), "a.png", [255, 0, 0, 255]),
            write_png(tmp.path(), "b.png", [0, 255, 0, 255]),
            write_png(tmp.path(), "c.png", [0, 0, 255, 255]),
        ];
        let store = HistoryStore::open_in_memory().unwrap();
        let seen = Mutex::new(Vec::new());

        create_from_images(
            &sources,
            &tmp.path().join("out.gif"),
            &GifCreationParams::new(),
            &store,
            |p| seen.lock().unwrap().push(p),
        )
        .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&5));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn create_rejects_canvas_wider_than_gif_allows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let wide_a = tmp.path().join("wide_a.png");
        let wide_b = tmp.path().join("wide_b.png");
        RgbaImage::from_pixel(70_000, 1, image::Rgba([255, 0, 0, 255]))
            .save(&wide_a)
            .unwrap();
        RgbaImage::from_pixel(70_000, 1, image::Rgba([0, 0, 255, 255]))
            .save(&wide_b)
            .unwrap();
        let store = HistoryStore::open_in_memory().unwrap();

        let result = create_from_images(
            &[wide_a, wide_b],
            &tmp.path().join("out.gif"),
            &GifCreationParams::new(),
            &store,
            |_| {},
        );
        assert!(matches!(result, Err(AnimationError::Encode { .. })));
        assert!(store.recent(10).is_empty());
    }

    #[test]
    fn decode_rejects_non_animation() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("noise.gif");
        fs::write(&path, b"GIF89a broken").unwrap();
        assert!(matches!(
            decode_frames(&path),
            Err(AnimationError::Decode { .. })
        ));
    }

    #[test]
    fn disposal_mapping_is_total() {
        for method in [
            DisposalMethod::Any,
            DisposalMethod::Keep,
            DisposalMethod::Background,
            DisposalMethod::Previous,
        ] {
            assert_eq!(disposal_of(method) as u8, method.code());
        }
    }
}
