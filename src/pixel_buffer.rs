//! The linear store of pixel colors that frames are mapped into.
//!
//! The color depth is chosen once at boot from the device settings, so the
//! buffer is an enum over the two depths rather than a struct with a mode flag.

use core::iter;

use derive_more::Display;
use heapless::Vec;
use smart_leds::{RGB8, RGBW, White};

/// Largest strip the node will drive. Longer configurations are clamped.
pub const MAX_PIXELS: usize = 1024;

const DARK_RGB: RGB8 = RGB8::new(0, 0, 0);
const DARK_RGBW: RGBW<u8> = RGBW {
    r: 0,
    g: 0,
    b: 0,
    a: White(0),
};

/// Channels carried per pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PixelLayout {
    /// Three channels: red, green, blue.
    #[display("RGB")]
    Rgb,
    /// Four channels: red, green, blue, white.
    #[display("RGBW")]
    Rgbw,
}

impl PixelLayout {
    /// Number of payload bytes per pixel.
    #[must_use]
    pub const fn channels(self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Rgbw => 4,
        }
    }

    /// Bits clocked out per pixel on the strip's data line.
    #[must_use]
    pub const fn bits_per_pixel(self) -> u8 {
        match self {
            Self::Rgb => 24,
            Self::Rgbw => 32,
        }
    }
}

/// Pixel colors for the whole strip, in strip order.
#[derive(Clone, Debug, PartialEq)]
pub enum PixelBuffer {
    /// Three-channel pixels.
    Rgb(Vec<RGB8, MAX_PIXELS>),
    /// Four-channel pixels.
    Rgbw(Vec<RGBW<u8>, MAX_PIXELS>),
}

impl PixelBuffer {
    /// A dark buffer of `pixel_count` pixels, clamped to [`MAX_PIXELS`].
    #[must_use]
    pub fn new(layout: PixelLayout, pixel_count: usize) -> Self {
        let len = pixel_count.min(MAX_PIXELS);
        match layout {
            PixelLayout::Rgb => Self::Rgb(iter::repeat_n(DARK_RGB, len).collect()),
            PixelLayout::Rgbw => Self::Rgbw(iter::repeat_n(DARK_RGBW, len).collect()),
        }
    }

    /// The color depth of this buffer.
    #[must_use]
    pub const fn layout(&self) -> PixelLayout {
        match self {
            Self::Rgb(_) => PixelLayout::Rgb,
            Self::Rgbw(_) => PixelLayout::Rgbw,
        }
    }

    /// Number of pixels.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Rgb(pixels) => pixels.len(),
            Self::Rgbw(pixels) => pixels.len(),
        }
    }

    /// True for a zero-length strip.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set one pixel from its channel bytes (`R,G,B` or `R,G,B,W`).
    ///
    /// Returns `false`, leaving the buffer untouched, when `index` is past the
    /// end or `channels` is shorter than the layout needs.
    pub fn set_pixel(&mut self, index: usize, channels: &[u8]) -> bool {
        match self {
            Self::Rgb(pixels) => match (pixels.get_mut(index), channels) {
                (Some(pixel), &[r, g, b, ..]) => {
                    *pixel = RGB8::new(r, g, b);
                    true
                }
                _ => false,
            },
            Self::Rgbw(pixels) => match (pixels.get_mut(index), channels) {
                (Some(pixel), &[r, g, b, w, ..]) => {
                    *pixel = RGBW {
                        r,
                        g,
                        b,
                        a: White(w),
                    };
                    true
                }
                _ => false,
            },
        }
    }

    /// Turn every pixel off.
    pub fn clear(&mut self) {
        match self {
            Self::Rgb(pixels) => pixels.iter_mut().for_each(|pixel| *pixel = DARK_RGB),
            Self::Rgbw(pixels) => pixels.iter_mut().for_each(|pixel| *pixel = DARK_RGBW),
        }
    }

    /// The pixel at `index` of a three-channel buffer.
    #[must_use]
    pub fn rgb(&self, index: usize) -> Option<RGB8> {
        match self {
            Self::Rgb(pixels) => pixels.get(index).copied(),
            Self::Rgbw(_) => None,
        }
    }

    /// The pixel at `index` of a four-channel buffer.
    #[must_use]
    pub fn rgbw(&self, index: usize) -> Option<RGBW<u8>> {
        match self {
            Self::Rgb(_) => None,
            Self::Rgbw(pixels) => pixels.get(index).copied(),
        }
    }

    /// Pack pixels into GRB(W) words for the PIO shifter, MSB first.
    ///
    /// RGB pixels fill the top 24 bits of each word. Returns the number of
    /// words written, which is capped by `words.len()`.
    pub fn encode_grb_words(&self, words: &mut [u32]) -> usize {
        match self {
            Self::Rgb(pixels) => pixels
                .iter()
                .zip(words.iter_mut())
                .map(|(pixel, word)| {
                    *word = u32::from_be_bytes([pixel.g, pixel.r, pixel.b, 0]);
                })
                .count(),
            Self::Rgbw(pixels) => pixels
                .iter()
                .zip(words.iter_mut())
                .map(|(pixel, word)| {
                    *word = u32::from_be_bytes([pixel.g, pixel.r, pixel.b, pixel.a.0]);
                })
                .count(),
        }
    }
}
