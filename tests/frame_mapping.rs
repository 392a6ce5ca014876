#![allow(missing_docs)]
//! Host-level tests for universe-to-pixel mapping.

use artnet_pixel_node::frame_mapper::{FrameMapper, UniverseSpan};
use artnet_pixel_node::pixel_buffer::{PixelBuffer, PixelLayout};
use smart_leds::{RGB8, RGBW, White};

fn ramp(len: usize, start: u8) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}

#[test]
fn first_universe_fills_rgbw_strip() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgbw, 60);
    let mut mapper = FrameMapper::new(0);
    let payload = ramp(240, 0);

    mapper.on_frame(&mut pixels, 0, 1, &payload);

    for index in 0..60 {
        let base = (index * 4) as u8;
        assert_eq!(
            pixels.rgbw(index),
            Some(RGBW {
                r: base,
                g: base + 1,
                b: base + 2,
                a: White(base + 3),
            })
        );
    }
    assert_eq!(mapper.previous_frame_length(), 240);
}

#[test]
fn second_universe_past_end_is_discarded() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgbw, 60);
    let mut mapper = FrameMapper::new(0);
    mapper.on_frame(&mut pixels, 0, 1, &ramp(240, 0));
    let before = pixels.clone();

    // 10 pixels at 1 * 60 = 60 onwards: all outside a 60-pixel strip.
    mapper.on_frame(&mut pixels, 1, 2, &[0xAA; 40]);

    assert_eq!(pixels, before);
    assert_eq!(mapper.previous_frame_length(), 40);
}

#[test]
fn offset_follows_previous_frame_length() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 20);
    let mut mapper = FrameMapper::new(0);

    mapper.on_frame(&mut pixels, 0, 0, &[1; 15]);
    mapper.on_frame(&mut pixels, 1, 0, &[2; 6]);

    // Universe 1 starts after the 5 pixels universe 0 carried.
    assert_eq!(pixels.rgb(4), Some(RGB8::new(1, 1, 1)));
    assert_eq!(pixels.rgb(5), Some(RGB8::new(2, 2, 2)));
    assert_eq!(pixels.rgb(6), Some(RGB8::new(2, 2, 2)));
    assert_eq!(pixels.rgb(7), Some(RGB8::default()));
}

#[test]
fn short_last_universe_shifts_next_cycle() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 20);
    let mut mapper = FrameMapper::new(0);

    mapper.on_frame(&mut pixels, 0, 0, &[1; 15]);
    mapper.on_frame(&mut pixels, 1, 0, &[2; 6]);
    // Next cycle: universe 1 is now offset by the 2 pixels of the short frame.
    mapper.on_frame(&mut pixels, 1, 0, &[3; 3]);

    assert_eq!(pixels.rgb(2), Some(RGB8::new(3, 3, 3)));
    assert_eq!(pixels.rgb(5), Some(RGB8::new(2, 2, 2)));
}

#[test]
fn only_mapped_pixel_changes() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 8);
    let mut mapper = FrameMapper::new(0);

    mapper.on_frame(&mut pixels, 0, 0, &[9, 8, 7]);

    assert_eq!(pixels.rgb(0), Some(RGB8::new(9, 8, 7)));
    for index in 1..8 {
        assert_eq!(pixels.rgb(index), Some(RGB8::default()));
    }
}

#[test]
fn trailing_partial_pixel_is_ignored() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgbw, 4);
    let mut mapper = FrameMapper::new(0);

    mapper.on_frame(&mut pixels, 0, 0, &[1, 2, 3, 4, 5, 6]);

    assert_eq!(
        pixels.rgbw(0),
        Some(RGBW {
            r: 1,
            g: 2,
            b: 3,
            a: White(4),
        })
    );
    assert_eq!(
        pixels.rgbw(1),
        Some(RGBW {
            r: 0,
            g: 0,
            b: 0,
            a: White(0),
        })
    );
    assert_eq!(mapper.previous_frame_length(), 6);
}

#[test]
fn universe_below_start_is_discarded() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 10);
    let mut mapper = FrameMapper::new(5);
    mapper.on_frame(&mut pixels, 5, 0, &[1; 9]);
    let before = pixels.clone();

    // (4 - 5) * 3 = -3: every pixel lands below zero.
    mapper.on_frame(&mut pixels, 4, 0, &[7; 9]);

    assert_eq!(pixels, before);
}

#[test]
fn universe_below_start_keeps_in_range_tail() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 10);
    let mut mapper = FrameMapper::new(1);
    mapper.on_frame(&mut pixels, 1, 0, &[1; 6]);

    // (0 - 1) * 2 = -2: pixels 2 and 3 of this frame land on 0 and 1.
    mapper.on_frame(&mut pixels, 0, 0, &[4, 4, 4, 4, 4, 4, 5, 5, 5, 6, 6, 6]);

    assert_eq!(pixels.rgb(0), Some(RGB8::new(5, 5, 5)));
    assert_eq!(pixels.rgb(1), Some(RGB8::new(6, 6, 6)));
}

#[test]
fn first_frame_has_zero_offset_for_any_universe() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 4);
    let mut mapper = FrameMapper::new(0);

    // No previous frame, so the span is zero.
    mapper.on_frame(&mut pixels, 3, 0, &[1, 2, 3]);

    assert_eq!(pixels.rgb(0), Some(RGB8::new(1, 2, 3)));
}

#[test]
fn fixed_span_ignores_previous_frame() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 20);
    let mut mapper = FrameMapper::new(0).with_span(UniverseSpan::Fixed { pixels: 5 });

    mapper.on_frame(&mut pixels, 0, 0, &[1; 3]);
    mapper.on_frame(&mut pixels, 2, 0, &[2; 3]);

    assert_eq!(pixels.rgb(0), Some(RGB8::new(1, 1, 1)));
    assert_eq!(pixels.rgb(10), Some(RGB8::new(2, 2, 2)));
    assert_eq!(pixels.rgb(1), Some(RGB8::default()));
}

#[test]
fn pixel_count_is_clamped() {
    let pixels = PixelBuffer::new(PixelLayout::Rgb, 5000);
    assert_eq!(pixels.len(), artnet_pixel_node::pixel_buffer::MAX_PIXELS);
}

#[test]
fn grb_words_are_msb_first() {
    let mut pixels = PixelBuffer::new(PixelLayout::Rgbw, 1);
    pixels.set_pixel(0, &[0x11, 0x22, 0x33, 0x44]);
    let mut words = [0u32; 2];

    assert_eq!(pixels.encode_grb_words(&mut words), 1);
    assert_eq!(words[0], 0x2211_3344);

    let mut pixels = PixelBuffer::new(PixelLayout::Rgb, 1);
    pixels.set_pixel(0, &[0x11, 0x22, 0x33]);
    pixels.encode_grb_words(&mut words);
    assert_eq!(words[0], 0x2211_3300);
}
