//! Maps universe frames onto the linear pixel buffer.
//!
//! Each universe starts where the previous universe's span would end, and
//! that span is taken from the length of the most recently received frame.
//! Controllers that send equal-length universes (all but possibly the last)
//! land every pixel where expected. A short final universe shifts the start
//! of the next cycle's first frame, which is a known quirk of this mapping.
//! [`UniverseSpan::Fixed`] removes it when the controller's span is known.

use crate::pixel_buffer::PixelBuffer;

/// How many pixels one universe is assumed to cover.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UniverseSpan {
    /// Whole pixels in the previously received frame.
    #[default]
    PreviousFrame,
    /// A fixed number of pixels per universe.
    Fixed {
        /// Pixels per universe.
        pixels: u16,
    },
}

/// Writes decoded frames into a [`PixelBuffer`].
#[derive(Clone, Debug)]
pub struct FrameMapper {
    start_universe: u16,
    span: UniverseSpan,
    previous_frame_length: usize,
}

impl FrameMapper {
    /// A mapper whose pixel 0 belongs to `start_universe`.
    #[must_use]
    pub const fn new(start_universe: u16) -> Self {
        Self {
            start_universe,
            span: UniverseSpan::PreviousFrame,
            previous_frame_length: 0,
        }
    }

    /// Replace the universe span rule.
    #[must_use]
    pub const fn with_span(mut self, span: UniverseSpan) -> Self {
        self.span = span;
        self
    }

    /// Channel count of the last frame seen. Zero before the first frame.
    #[must_use]
    pub const fn previous_frame_length(&self) -> usize {
        self.previous_frame_length
    }

    /// Map one frame into `pixels`.
    ///
    /// Pixel `i` of the payload lands at
    /// `i + (universe - start_universe) * span`. Destinations outside the
    /// buffer, including negative ones from universes below the start, are
    /// skipped. A trailing partial pixel is ignored. The sequence number is
    /// accepted for the caller's convenience and otherwise unused.
    pub fn on_frame(
        &mut self,
        pixels: &mut PixelBuffer,
        universe: u16,
        _sequence: u8,
        payload: &[u8],
    ) {
        let channels = pixels.layout().channels();
        let span = match self.span {
            UniverseSpan::PreviousFrame => self.previous_frame_length.checked_div(channels).unwrap_or(0),
            UniverseSpan::Fixed { pixels } => usize::from(pixels),
        };
        let universe_offset = i64::from(universe).saturating_sub(i64::from(self.start_universe));
        let first = universe_offset.saturating_mul(i64::try_from(span).unwrap_or(i64::MAX));
        let pixel_count = pixels.len();

        for (index, pixel) in payload.chunks_exact(channels).enumerate() {
            let Ok(index) = i64::try_from(index) else {
                break;
            };
            match usize::try_from(first.saturating_add(index)) {
                Ok(destination) if destination < pixel_count => {
                    pixels.set_pixel(destination, pixel);
                }
                _ => {}
            }
        }

        self.previous_frame_length = payload.len();
    }
}
