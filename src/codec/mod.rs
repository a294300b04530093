//! Still-image decode, resize, color normalization, and encode.
//!
//! Pure, synchronous, stateless functions over single images. The pipelines
//! call [`convert`] once per unit of work; every error here is terminal for
//! that unit only, never for a whole batch.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (PNG, JPEG, WebP, GIF, BMP, TIFF) | `image` crate |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → PNG/JPEG/ICO/GIF | `image` codec encoders |
//! | Encode → WebP (lossy) | `webp` crate (the `image` crate only does lossless) |
//!
//! ## Color-mode policy
//!
//! JPEG has no alpha channel, so sources with alpha are composited onto an
//! opaque white background using the alpha channel as the blend mask. Other
//! targets pass color through unchanged.

mod fit;

pub use fit::{ICO_SIZES, fit_within, ico_sizes};

use crate::params::{AspectMode, ConversionParams, OutputFormat, ResizeTarget};
use image::codecs::gif::GifEncoder;
use image::codecs::ico::{IcoEncoder, IcoFrame};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, PngEncoder};
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ExtendedColorType, ImageReader, RgbImage};
use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("cannot encode {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

/// Container-level facts about an image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    /// Detected container format, e.g. `"png"`.
    pub format: String,
    /// Pixel layout of the decoded image, e.g. `"rgba8"`.
    pub color_mode: String,
    pub size_bytes: u64,
}

/// Dimensions of the image actually written by [`convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducedImage {
    pub width: u32,
    pub height: u32,
}

/// Decode just enough of a file to describe it.
pub fn inspect(path: &Path) -> Result<ImageInfo, CodecError> {
    let size_bytes = fs::metadata(path)
        .map_err(|source| CodecError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();

    let reader = open_reader(path)?;
    let format = reader
        .format()
        .map(|f| f.extensions_str()[0].to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let img = reader.decode().map_err(|source| CodecError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        color_mode: color_mode_name(img.color()),
        size_bytes,
    })
}

/// Convert one image: decode, resize per the aspect policy, normalize color
/// for the target format, encode. Creates the target's parent directories.
pub fn convert(
    source: &Path,
    target: &Path,
    params: &ConversionParams,
) -> Result<ProducedImage, CodecError> {
    let img = open_image(source)?;
    let img = match params.resize() {
        Some(request) => resize(img, request, params.aspect()),
        None => img,
    };
    let (width, height) = encode(&img, target, params)?;
    Ok(ProducedImage { width, height })
}

/// Decode a still image from disk. Shared with the animation pipeline.
pub(crate) fn open_image(path: &Path) -> Result<DynamicImage, CodecError> {
    open_reader(path)?
        .decode()
        .map_err(|source| CodecError::Decode {
            path: path.to_path_buf(),
            source,
        })
}

fn open_reader(
    path: &Path,
) -> Result<ImageReader<std::io::BufReader<File>>, CodecError> {
    let io_err = |source| CodecError::Io {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)
        .map_err(io_err)?
        .with_guessed_format()
        .map_err(io_err)
}

/// Apply a resize request under the given aspect policy.
pub(crate) fn resize(
    img: DynamicImage,
    request: ResizeTarget,
    aspect: AspectMode,
) -> DynamicImage {
    let box_w = request.width.unwrap_or(img.width());
    let box_h = request.height.unwrap_or(img.height());
    match aspect {
        AspectMode::Preserve => {
            let (w, h) = fit_within((img.width(), img.height()), (box_w, box_h));
            img.resize_exact(w, h, FilterType::Lanczos3)
        }
        AspectMode::Stretch => img.resize_exact(box_w, box_h, FilterType::Lanczos3),
    }
}

/// Composite an image onto an opaque white background, using the alpha
/// channel as the blend mask.
pub(crate) fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::from_pixel(rgba.width(), rgba.height(), image::Rgb([255, 255, 255]));
    for (x, y, px) in rgba.enumerate_pixels() {
        let alpha = px[3] as u32;
        let dest = out.get_pixel_mut(x, y);
        for c in 0..3 {
            dest[c] = ((px[c] as u32 * alpha + dest[c] as u32 * (255 - alpha)) / 255) as u8;
        }
    }
    out
}

/// Encode an already-processed image to the target path.
///
/// Also used by frame extraction, which prepares frames itself and only
/// needs the per-format encoding (including the white-background
/// normalization for JPEG).
pub(crate) fn encode(
    img: &DynamicImage,
    target: &Path,
    params: &ConversionParams,
) -> Result<(u32, u32), CodecError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| CodecError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let dims = (img.width(), img.height());
    match params.format() {
        OutputFormat::Png => encode_png(img, target, params.png_compression())?,
        OutputFormat::Jpeg => encode_jpeg(img, target, params.quality().value())?,
        OutputFormat::Webp => encode_webp(img, target, params.quality().value())?,
        OutputFormat::Ico => encode_ico(img, target)?,
        OutputFormat::Gif => encode_gif_still(img, target)?,
    }
    Ok(dims)
}

fn create_writer(target: &Path) -> Result<BufWriter<File>, CodecError> {
    let file = File::create(target).map_err(|source| CodecError::Io {
        path: target.to_path_buf(),
        source,
    })?;
    Ok(BufWriter::new(file))
}

fn encode_err(target: &Path, reason: impl ToString) -> CodecError {
    CodecError::Encode {
        path: target.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn encode_png(img: &DynamicImage, target: &Path, level: u8) -> Result<(), CodecError> {
    let compression = match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let writer = create_writer(target)?;
    let encoder =
        PngEncoder::new_with_quality(writer, compression, image::codecs::png::FilterType::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| encode_err(target, e))
}

fn encode_jpeg(img: &DynamicImage, target: &Path, quality: u8) -> Result<(), CodecError> {
    let mut writer = create_writer(target)?;
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality);
    let result = if img.color().has_alpha() {
        let flat = flatten_onto_white(img);
        flat.write_with_encoder(encoder)
    } else {
        // JPEG encodes luma and RGB only
        match img.color() {
            ColorType::L8 | ColorType::Rgb8 => img.write_with_encoder(encoder),
            _ => img.to_rgb8().write_with_encoder(encoder),
        }
    };
    result.map_err(|e| encode_err(target, e))
}

fn encode_webp(img: &DynamicImage, target: &Path, quality: u8) -> Result<(), CodecError> {
    let rgba = img.to_rgba8();
    let encoded =
        webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height()).encode(quality as f32);
    fs::write(target, &*encoded).map_err(|source| CodecError::Io {
        path: target.to_path_buf(),
        source,
    })
}

fn encode_ico(img: &DynamicImage, target: &Path) -> Result<(), CodecError> {
    let sizes = ico_sizes((img.width(), img.height()));
    let scaled: Vec<image::RgbaImage> = sizes
        .iter()
        .map(|&s| img.resize_exact(s, s, FilterType::Lanczos3).to_rgba8())
        .collect();
    let frames: Vec<IcoFrame<'_>> = scaled
        .iter()
        .map(|buf| IcoFrame::as_png(buf.as_raw(), buf.width(), buf.height(), ExtendedColorType::Rgba8))
        .collect::<Result<_, _>>()
        .map_err(|e| encode_err(target, e))?;

    let writer = create_writer(target)?;
    IcoEncoder::new(writer)
        .encode_images(&frames)
        .map_err(|e| encode_err(target, e))
}

fn encode_gif_still(img: &DynamicImage, target: &Path) -> Result<(), CodecError> {
    let writer = create_writer(target)?;
    let mut encoder = GifEncoder::new(writer);
    encoder
        .encode_frame(image::Frame::new(img.to_rgba8()))
        .map_err(|e| encode_err(target, e))
}

fn color_mode_name(color: ColorType) -> String {
    match color {
        ColorType::L8 => "l8",
        ColorType::La8 => "la8",
        ColorType::Rgb8 => "rgb8",
        ColorType::Rgba8 => "rgba8",
        ColorType::L16 => "l16",
        ColorType::La16 => "la16",
        ColorType::Rgb16 => "rgb16",
        ColorType::Rgba16 => "rgba16",
        ColorType::Rgb32F => "rgb32f",
        ColorType::Rgba32F => "rgba32f",
        _ => "unknown",
    }
    .to_string()
}
