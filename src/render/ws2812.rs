//! PIO + DMA driver for WS2812-family strips, in GRB or GRBW order at 800 kHz.
//!
//! Unlike a fixed-length strip driver, the number of pixels and the bits per
//! pixel come from the device settings at boot.

use embassy_rp::Peri;
use embassy_rp::clocks;
use embassy_rp::dma::Channel;
use embassy_rp::pio::{
    Common, Config, FifoJoin, Instance, PioPin, ShiftConfig, ShiftDirection, StateMachine,
};
use embassy_time::Timer;
use fixed::types::U24F8;

use crate::pixel_buffer::{MAX_PIXELS, PixelBuffer, PixelLayout};
use crate::render::PixelDriver;

// Cycles per bit phase: T1 high, T2 data, T3 low.
const T1: u8 = 2;
const T2: u8 = 5;
const T3: u8 = 3;
const CYCLES_PER_BIT: u32 = (T1 + T2 + T3) as u32;

const STRIP_KHZ: u32 = 800;

// Data line held low this long latches the strip.
const LATCH_MICROS: u64 = 55;

/// A strip on one PIO state machine, fed by one DMA channel.
pub struct Ws2812<'d, P: Instance, const S: usize, D: Channel> {
    sm: StateMachine<'d, P, S>,
    dma: Peri<'d, D>,
    words: [u32; MAX_PIXELS],
}

impl<'d, P: Instance, const S: usize, D: Channel> Ws2812<'d, P, S, D> {
    /// Load the bit program and configure `sm` to drive `pin`.
    pub fn new(
        common: &mut Common<'d, P>,
        mut sm: StateMachine<'d, P, S>,
        dma: Peri<'d, D>,
        pin: Peri<'d, impl PioPin>,
        layout: PixelLayout,
    ) -> Self {
        let side_set = pio::SideSet::new(false, 1, false);
        let mut assembler: pio::Assembler<32> = pio::Assembler::new_with_side_set(side_set);
        let mut wrap_target = assembler.label();
        let mut wrap_source = assembler.label();
        let mut do_zero = assembler.label();
        assembler.set_with_side_set(pio::SetDestination::PINDIRS, 1, 0);
        assembler.bind(&mut wrap_target);
        assembler.out_with_delay_and_side_set(pio::OutDestination::X, 1, T3 - 1, 0);
        assembler.jmp_with_delay_and_side_set(
            pio::JmpCondition::XIsZero,
            &mut do_zero,
            T1 - 1,
            1,
        );
        assembler.jmp_with_delay_and_side_set(
            pio::JmpCondition::Always,
            &mut wrap_target,
            T2 - 1,
            1,
        );
        assembler.bind(&mut do_zero);
        assembler.nop_with_delay_and_side_set(T2 - 1, 0);
        assembler.bind(&mut wrap_source);
        let program = assembler.assemble_with_wrap(wrap_source, wrap_target);
        let program = common.load_program(&program);

        let out_pin = common.make_pio_pin(pin);
        let mut cfg = Config::default();
        cfg.set_out_pins(&[&out_pin]);
        cfg.set_set_pins(&[&out_pin]);
        cfg.use_program(&program, &[&out_pin]);

        let clock_khz = U24F8::from_num(clocks::clk_sys_freq() / 1000);
        let bit_khz = U24F8::from_num(STRIP_KHZ * CYCLES_PER_BIT);
        cfg.clock_divider = clock_khz.saturating_div(bit_khz);

        cfg.fifo_join = FifoJoin::TxOnly;
        cfg.shift_out = ShiftConfig {
            auto_fill: true,
            threshold: layout.bits_per_pixel(),
            direction: ShiftDirection::Left,
        };

        sm.set_config(&cfg);
        sm.set_enable(true);

        Self {
            sm,
            dma,
            words: [0; MAX_PIXELS],
        }
    }
}

impl<P: Instance, const S: usize, D: Channel> PixelDriver for Ws2812<'_, P, S, D> {
    async fn push(&mut self, pixels: &PixelBuffer) {
        let count = pixels.encode_grb_words(&mut self.words);
        let Some(words) = self.words.get(..count) else {
            return;
        };
        self.sm
            .tx()
            .dma_push(self.dma.reborrow(), words, false)
            .await;
        Timer::after_micros(LATCH_MICROS).await;
    }
}
