//! # Pixmill
//!
//! A batch raster-image conversion library with a persisted history ledger.
//! Point it at files, pick a target format, and it converts them one by one,
//! recording every attempt (success or failure) as an immutable row in a
//! local SQLite database.
//!
//! # Architecture: Pipelines Over a Stateless Codec
//!
//! All pixel work lives in [`codec`], a set of pure functions over single
//! images. The pipelines above it add sequencing, progress, cancellation,
//! and bookkeeping:
//!
//! ```text
//! files  →  pipeline   →  converted files + one ledger row per file
//! stills →  animation  →  one GIF        + one ledger row per operation
//! ```
//!
//! This separation exists for three reasons:
//!
//! - **Testability**: codec functions are deterministic file-to-file
//!   transforms, exercised with tiny synthetic images.
//! - **Error containment**: a codec failure is terminal for one unit of
//!   work, never for a batch; the pipeline records it and moves on.
//! - **Front-end independence**: the pipelines expose observers and
//!   progress callbacks instead of printing, so a CLI, a GUI, or a test
//!   harness can drive them identically.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`params`] | Validated parameter types for every operation |
//! | [`codec`] | Still-image decode, resize, color normalization, encode |
//! | [`pipeline`] | Sequential batch conversion with progress and cancellation |
//! | [`animation`] | GIF assembly, re-encoding, and frame extraction |
//! | [`store`] | Append-only SQLite conversion-history ledger |
//! | [`config`] | JSON settings file with deep-merge partial updates |
//!
//! # Design Decisions
//!
//! ## One Ledger Row Per Unit of Work
//!
//! The history ledger records outcomes, not intentions: a row is appended
//! only after a conversion finishes (or definitively fails), and progress
//! callbacks fire only after the row is persisted. An observer that sees
//! `progress(n, total)` can rely on exactly `n` rows existing for that
//! batch.
//!
//! ## Reject, Don't Clamp
//!
//! Out-of-range parameters are construction errors, not silent corrections.
//! The single documented exception is the GIF frame-duration minimum, which
//! clamps upward because sub-minimum durations render inconsistently across
//! viewers anyway.
//!
//! ## Pure-Rust Codecs
//!
//! Everything is pure Rust: the `image` crate for decode and most encodes,
//! `libwebp` bindings via the `webp` crate for lossy WebP, the `gif` and
//! `color_quant` crates for palette-controlled animation output, and
//! bundled SQLite via `rusqlite`. No system codec installs, no version
//! skew between machines.

pub mod animation;
pub mod codec;
pub mod config;
pub mod params;
pub mod pipeline;
pub mod store;
