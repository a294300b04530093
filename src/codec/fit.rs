//! Pure dimension calculations for resize and icon encoding.
//!
//! All functions here are pure and testable without any I/O or images.

/// Standard icon sizes an ICO file may embed.
pub const ICO_SIZES: [u32; 6] = [16, 32, 48, 64, 128, 256];

/// Calculate dimensions that fit entirely within a bounding box while
/// preserving the source aspect ratio.
///
/// Neither returned edge exceeds the box. Both edges are at least 1, so
/// extreme aspect ratios never collapse to a zero-height image.
///
/// # Examples
/// ```
/// # use pixmill::codec::fit_within;
/// // Landscape into a square box: width binds
/// assert_eq!(fit_within((200, 100), (50, 50)), (50, 25));
/// // Box wider than the source on both axes: scales up
/// assert_eq!(fit_within((100, 100), (300, 200)), (200, 200));
/// ```
pub fn fit_within(source: (u32, u32), bbox: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = source;
    let (bw, bh) = bbox;

    let width_ratio = bw as f64 / sw as f64;
    let height_ratio = bh as f64 / sh as f64;
    let ratio = width_ratio.min(height_ratio);

    let w = (sw as f64 * ratio).round().max(1.0) as u32;
    let h = (sh as f64 * ratio).round().max(1.0) as u32;
    (w, h)
}

/// Select the icon sizes to embed for a source of the given dimensions.
///
/// Returns every standard size that does not exceed the source on either
/// axis; falls back to a single 16x16 entry when the source is smaller
/// than all of them.
pub fn ico_sizes(source: (u32, u32)) -> Vec<u32> {
    let (w, h) = source;
    let qualifying: Vec<u32> = ICO_SIZES
        .iter()
        .copied()
        .filter(|&s| s <= w && s <= h)
        .collect();

    if qualifying.is_empty() {
        vec![16]
    } else {
        qualifying
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // fit_within tests
    // =========================================================================

    #[test]
    fn fit_landscape_into_square() {
        assert_eq!(fit_within((2000, 1000), (500, 500)), (500, 250));
    }

    #[test]
    fn fit_portrait_into_square() {
        assert_eq!(fit_within((1000, 2000), (500, 500)), (250, 500));
    }

    #[test]
    fn fit_exact_match_is_identity() {
        assert_eq!(fit_within((800, 600), (800, 600)), (800, 600));
    }

    #[test]
    fn fit_scales_up_when_box_is_larger() {
        assert_eq!(fit_within((100, 50), (400, 400)), (400, 200));
    }

    #[test]
    fn fit_never_exceeds_box() {
        for &source in &[(3, 1000), (1000, 3), (999, 998), (1, 1)] {
            let (w, h) = fit_within(source, (100, 100));
            assert!(w <= 100 && h <= 100, "source {source:?} gave ({w}, {h})");
            assert!(w >= 1 && h >= 1);
        }
    }

    #[test]
    fn fit_preserves_aspect_within_rounding() {
        let (w, h) = fit_within((1920, 1080), (640, 640));
        let source_aspect = 1920.0 / 1080.0;
        let out_aspect = w as f64 / h as f64;
        // One pixel of rounding slack on the shorter edge
        assert!((out_aspect - source_aspect).abs() < source_aspect / h as f64);
    }

    // =========================================================================
    // ico_sizes tests
    // =========================================================================

    #[test]
    fn ico_selects_sizes_up_to_source() {
        assert_eq!(ico_sizes((64, 64)), vec![16, 32, 48, 64]);
    }

    #[test]
    fn ico_limits_by_shorter_edge() {
        assert_eq!(ico_sizes((256, 48)), vec![16, 32, 48]);
    }

    #[test]
    fn ico_falls_back_to_smallest() {
        assert_eq!(ico_sizes((10, 10)), vec![16]);
    }

    #[test]
    fn ico_embeds_all_sizes_for_large_source() {
        assert_eq!(ico_sizes((512, 512)), ICO_SIZES.to_vec());
    }
}
