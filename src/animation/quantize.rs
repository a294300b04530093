//! Palette construction and pixel indexing for GIF output.
//!
//! GIF frames carry at most 256 palette entries, so every RGBA frame has to
//! be reduced to indexed color. The palette is learned with NeuQuant over
//! the opaque pixels of the input frames; indexing optionally applies
//! Floyd-Steinberg error diffusion to hide banding in gradients.

use color_quant::NeuQuant;
use image::RgbaImage;

/// Alpha below this is treated as fully transparent when the palette
/// reserves a transparency slot.
const ALPHA_CUTOFF: u8 = 128;

/// Map a 1-100 quality setting to a NeuQuant sampling factor (1 = every
/// pixel, 30 = sparsest).
pub fn samplefac_for_quality(quality: u8) -> i32 {
    (31 - i32::from(quality) * 30 / 100).clamp(1, 30)
}

/// A learned palette plus the machinery to index frames against it.
pub struct PaletteQuantizer {
    neu: NeuQuant,
    palette: Vec<u8>,
    transparent: Option<u8>,
}

impl PaletteQuantizer {
    /// Learn a palette from the opaque pixels of the given frames.
    ///
    /// `max_colors` caps the palette size (2..=256). With `with_transparency`
    /// one slot is reserved for fully transparent pixels, leaving one fewer
    /// for colors.
    pub fn from_frames(
        frames: &[RgbaImage],
        max_colors: usize,
        with_transparency: bool,
        samplefac: i32,
    ) -> Self {
        let color_slots = if with_transparency {
            max_colors.saturating_sub(1).max(2)
        } else {
            max_colors
        };

        let mut samples: Vec<u8> = Vec::new();
        for frame in frames {
            for pixel in frame.pixels() {
                if pixel.0[3] >= ALPHA_CUTOFF {
                    samples.extend_from_slice(&pixel.0);
                }
            }
        }
        // NeuQuant needs at least one sample even for an all-transparent input.
        if samples.is_empty() {
            samples.extend_from_slice(&[0, 0, 0, 255]);
        }

        let neu = NeuQuant::new(samplefac, color_slots, &samples);
        let mut palette = neu.color_map_rgb();
        let transparent = if with_transparency {
            let slot = (palette.len() / 3) as u8;
            palette.extend_from_slice(&[0, 0, 0]);
            Some(slot)
        } else {
            None
        };

        Self {
            neu,
            palette,
            transparent,
        }
    }

    /// The learned palette as packed RGB triples.
    pub fn palette(&self) -> &[u8] {
        &self.palette
    }

    /// Index of the reserved transparency slot, if one exists.
    pub fn transparent(&self) -> Option<u8> {
        self.transparent
    }

    /// Map a frame to palette indices, one byte per pixel in row-major
    /// order. With `dither` the residual color error of each pixel is
    /// diffused to its unvisited neighbors (Floyd-Steinberg weights).
    pub fn index_frame(&self, frame: &RgbaImage, dither: bool) -> Vec<u8> {
        if dither {
            self.index_dithered(frame)
        } else {
            self.index_plain(frame)
        }
    }

    fn index_plain(&self, frame: &RgbaImage) -> Vec<u8> {
        frame
            .pixels()
            .map(|pixel| match self.transparent {
                Some(slot) if pixel.0[3] < ALPHA_CUTOFF => slot,
                _ => self.nearest(pixel.0[0], pixel.0[1], pixel.0[2]),
            })
            .collect()
    }

    fn index_dithered(&self, frame: &RgbaImage) -> Vec<u8> {
        let width = frame.width() as usize;
        let height = frame.height() as usize;

        // Working copy in f32 so diffused error can push channels out of
        // the u8 range before clamping at quantization time.
        let mut work: Vec<[f32; 3]> = frame
            .pixels()
            .map(|p| [f32::from(p.0[0]), f32::from(p.0[1]), f32::from(p.0[2])])
            .collect();
        let mut indices = vec![0u8; width * height];

        for y in 0..height {
            for x in 0..width {
                let at = y * width + x;
                let alpha = frame.get_pixel(x as u32, y as u32).0[3];
                if let Some(slot) = self.transparent
                    && alpha < ALPHA_CUTOFF
                {
                    // Transparent pixels take no color and diffuse no error.
                    indices[at] = slot;
                    continue;
                }

                let r = work[at][0].clamp(0.0, 255.0);
                let g = work[at][1].clamp(0.0, 255.0);
                let b = work[at][2].clamp(0.0, 255.0);
                let index = self.nearest(r as u8, g as u8, b as u8);
                indices[at] = index;

                let base = usize::from(index) * 3;
                let err = [
                    r - f32::from(self.palette[base]),
                    g - f32::from(self.palette[base + 1]),
                    b - f32::from(self.palette[base + 2]),
                ];

                let mut spread = |dx: isize, dy: isize, weight: f32| {
                    let nx = x as isize + dx;
                    let ny = y as isize + dy;
                    if nx < 0 || nx >= width as isize || ny >= height as isize {
                        return;
                    }
                    let neighbor = ny as usize * width + nx as usize;
                    for c in 0..3 {
                        work[neighbor][c] += err[c] * weight;
                    }
                };
                spread(1, 0, 7.0 / 16.0);
                spread(-1, 1, 3.0 / 16.0);
                spread(0, 1, 5.0 / 16.0);
                spread(1, 1, 1.0 / 16.0);
            }
        }

        indices
    }

    fn nearest(&self, r: u8, g: u8, b: u8) -> u8 {
        self.neu.index_of(&[r, g, b, 255]) as u8
    }
}
