//! Parameter types for conversion operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between callers (the CLI, or any other front end) and the
//! [`codec`](crate::codec), [`pipeline`](crate::pipeline) and
//! [`animation`](crate::animation) modules that do the actual work.
//!
//! Every parameter set is validated at construction and immutable afterwards:
//! a value you managed to build is a value the pipelines will accept. The one
//! documented exception is the GIF frame-duration minimum, which clamps
//! instead of rejecting (see [`GifCreationParams::with_frame_duration`]).

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParamError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u32,
        max: u32,
        value: u32,
    },
    #[error("resize requires at least one of width or height")]
    EmptyResize,
}

/// Largest dimension accepted for animation frame resizing.
pub const MAX_GIF_DIMENSION: u32 = 4096;
/// Frame durations below this clamp up to it instead of failing.
pub const MIN_FRAME_DURATION_MS: u32 = 100;
pub const MAX_FRAME_DURATION_MS: u32 = 5000;

/// Encodable target formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputFormat {
    Png,
    Jpeg,
    Webp,
    Ico,
    Gif,
}

impl OutputFormat {
    /// Parse a user-supplied format name. Accepts `jpeg` as an alias for `jpg`.
    pub fn parse(name: &str) -> Result<Self, ParamError> {
        match name.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "ico" => Ok(Self::Ico),
            "gif" => Ok(Self::Gif),
            other => Err(ParamError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Canonical file extension (also the ledger's format label).
    pub fn ext(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Ico => "ico",
            Self::Gif => "gif",
        }
    }

    /// Whether the encoded file can carry an alpha channel.
    ///
    /// Targets without alpha get sources composited onto an opaque white
    /// background before encoding.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ext())
    }
}

/// Quality setting for lossy encoding (1-100). Clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u8) -> Self {
        let clamped = value.clamp(1, 100);
        if clamped != value {
            tracing::warn!(requested = value, used = clamped, "quality out of range, clamping");
        }
        Self(clamped)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// How resize requests treat the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectMode {
    /// Scale to fit entirely within the requested box, preserving aspect.
    #[default]
    Preserve,
    /// Scale to the exact requested dimensions, ignoring aspect.
    Stretch,
}

/// A validated resize request. At least one edge is set; every set edge
/// is >= 1. A missing edge means "keep the source length on that axis".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeTarget {
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
}

impl ResizeTarget {
    fn new(
        width: Option<u32>,
        height: Option<u32>,
        max: u32,
    ) -> Result<Option<Self>, ParamError> {
        if width.is_none() && height.is_none() {
            return Err(ParamError::EmptyResize);
        }
        for (field, value) in [("resize width", width), ("resize height", height)] {
            if let Some(v) = value {
                if v < 1 || v > max {
                    return Err(ParamError::OutOfRange {
                        field,
                        min: 1,
                        max,
                        value: v,
                    });
                }
            }
        }
        Ok(Some(Self { width, height }))
    }
}

/// Parameters for one still-image conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionParams {
    format: OutputFormat,
    quality: Quality,
    png_compression: u8,
    resize: Option<ResizeTarget>,
    aspect: AspectMode,
}

impl ConversionParams {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            quality: Quality::default(),
            png_compression: 6,
            resize: None,
            aspect: AspectMode::default(),
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Quality::new(quality);
        self
    }

    /// PNG compression effort, 0 (fastest) to 9 (smallest).
    pub fn with_png_compression(mut self, level: u8) -> Result<Self, ParamError> {
        if level > 9 {
            return Err(ParamError::OutOfRange {
                field: "png compression",
                min: 0,
                max: 9,
                value: level as u32,
            });
        }
        self.png_compression = level;
        Ok(self)
    }

    pub fn with_resize(
        mut self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Self, ParamError> {
        self.resize = ResizeTarget::new(width, height, u32::MAX)?;
        Ok(self)
    }

    pub fn with_aspect(mut self, aspect: AspectMode) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub(crate) fn png_compression(&self) -> u8 {
        self.png_compression
    }

    pub(crate) fn resize(&self) -> Option<ResizeTarget> {
        self.resize
    }

    pub(crate) fn aspect(&self) -> AspectMode {
        self.aspect
    }
}

/// Parameters for building one animation from still images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifCreationParams {
    frame_duration_ms: u32,
    loop_count: u16,
    optimize: bool,
    quality: Quality,
    resize: Option<ResizeTarget>,
    aspect: AspectMode,
}

impl Default for GifCreationParams {
    fn default() -> Self {
        Self {
            frame_duration_ms: 500,
            loop_count: 0,
            optimize: true,
            quality: Quality::default(),
            resize: None,
            aspect: AspectMode::default(),
        }
    }
}

impl GifCreationParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-frame display duration. Values above the maximum are rejected;
    /// values below the minimum clamp up to it (the documented exception
    /// to reject-don't-clamp).
    pub fn with_frame_duration(mut self, ms: u32) -> Result<Self, ParamError> {
        if ms > MAX_FRAME_DURATION_MS {
            return Err(ParamError::OutOfRange {
                field: "frame duration",
                min: MIN_FRAME_DURATION_MS,
                max: MAX_FRAME_DURATION_MS,
                value: ms,
            });
        }
        if ms < MIN_FRAME_DURATION_MS {
            tracing::warn!(
                requested = ms,
                minimum = MIN_FRAME_DURATION_MS,
                "frame duration below minimum, clamping"
            );
            self.frame_duration_ms = MIN_FRAME_DURATION_MS;
        } else {
            self.frame_duration_ms = ms;
        }
        Ok(self)
    }

    /// Number of animation loops; 0 means loop forever.
    pub fn with_loop_count(mut self, count: u16) -> Self {
        self.loop_count = count;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Quality::new(quality);
        self
    }

    pub fn with_resize(
        mut self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Self, ParamError> {
        self.resize = ResizeTarget::new(width, height, MAX_GIF_DIMENSION)?;
        Ok(self)
    }

    pub fn with_aspect(mut self, aspect: AspectMode) -> Self {
        self.aspect = aspect;
        self
    }

    pub fn frame_duration_ms(&self) -> u32 {
        self.frame_duration_ms
    }

    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    pub(crate) fn optimize(&self) -> bool {
        self.optimize
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub(crate) fn resize(&self) -> Option<ResizeTarget> {
        self.resize
    }

    pub(crate) fn aspect(&self) -> AspectMode {
        self.aspect
    }
}

/// GIF frame disposal, as written into the encoded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposalMethod {
    Any,
    Keep,
    /// Restore to background color between frames.
    #[default]
    Background,
    Previous,
}

impl DisposalMethod {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Any),
            1 => Some(Self::Keep),
            2 => Some(Self::Background),
            3 => Some(Self::Previous),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Any => 0,
            Self::Keep => 1,
            Self::Background => 2,
            Self::Previous => 3,
        }
    }
}

/// Parameters for re-encoding an existing animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifOptimizationParams {
    reduce_colors: bool,
    max_colors: u16,
    dither: bool,
    preserve_transparency: bool,
    disposal: DisposalMethod,
}

impl Default for GifOptimizationParams {
    fn default() -> Self {
        Self {
            reduce_colors: true,
            max_colors: 256,
            dither: true,
            preserve_transparency: true,
            disposal: DisposalMethod::default(),
        }
    }
}

impl GifOptimizationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reduce_colors(mut self, reduce: bool) -> Self {
        self.reduce_colors = reduce;
        self
    }

    pub fn with_max_colors(mut self, colors: u16) -> Result<Self, ParamError> {
        if !(2..=256).contains(&colors) {
            return Err(ParamError::OutOfRange {
                field: "max colors",
                min: 2,
                max: 256,
                value: colors as u32,
            });
        }
        self.max_colors = colors;
        Ok(self)
    }

    pub fn with_dither(mut self, dither: bool) -> Self {
        self.dither = dither;
        self
    }

    pub fn with_preserve_transparency(mut self, preserve: bool) -> Self {
        self.preserve_transparency = preserve;
        self
    }

    pub fn with_disposal(mut self, disposal: DisposalMethod) -> Self {
        self.disposal = disposal;
        self
    }

    pub(crate) fn reduce_colors(&self) -> bool {
        self.reduce_colors
    }

    pub(crate) fn max_colors(&self) -> u16 {
        self.max_colors
    }

    pub(crate) fn dither(&self) -> bool {
        self.dither
    }

    pub(crate) fn preserve_transparency(&self) -> bool {
        self.preserve_transparency
    }

    pub(crate) fn disposal(&self) -> DisposalMethod {
        self.disposal
    }
}
