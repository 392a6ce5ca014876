//! The joined-network controller: turns Art-Net packets into strip updates.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

use embassy_time::Instant;

use crate::artnet::{self, ArtPacket, POLL_REPLY_LEN, PollReply};
use crate::config::DeviceConfig;
use crate::frame_mapper::FrameMapper;
use crate::pixel_buffer::PixelBuffer;
use crate::render::{RenderOutcome, RenderScheduler};

/// Owns the ingest buffer and mapping state for one boot.
///
/// Frames are written into the buffer as they arrive. Only an `ArtSync`
/// hands the buffer to the [`RenderScheduler`].
pub struct ArtnetNode<'a> {
    config: &'a DeviceConfig,
    scheduler: &'a RenderScheduler,
    mapper: FrameMapper,
    pixels: PixelBuffer,
    address: Ipv4Addr,
    last_sync: Option<Instant>,
}

impl<'a> ArtnetNode<'a> {
    /// A node with a dark buffer sized from `config`.
    #[must_use]
    pub fn new(config: &'a DeviceConfig, scheduler: &'a RenderScheduler) -> Self {
        Self {
            config,
            scheduler,
            mapper: FrameMapper::new(config.start_universe),
            pixels: PixelBuffer::new(config.layout(), config.pixel_len()),
            address: Ipv4Addr::UNSPECIFIED,
            last_sync: None,
        }
    }

    /// Set the address advertised in poll replies.
    pub const fn set_address(&mut self, address: Ipv4Addr) {
        self.address = address;
    }

    /// The ingest buffer.
    #[must_use]
    pub const fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    /// The mapping state.
    #[must_use]
    pub const fn mapper(&self) -> &FrameMapper {
        &self.mapper
    }

    /// Clear the buffer and show it, so the strip starts dark.
    pub async fn render_blank(&mut self) -> RenderOutcome {
        self.pixels.clear();
        self.scheduler.request_render(&self.pixels).await
    }

    /// Act on one datagram.
    ///
    /// Returns the length of an `ArtPollReply` written into `reply` when the
    /// packet asks for one. Undecodable packets are dropped.
    pub async fn handle_packet(
        &mut self,
        packet: &[u8],
        reply: &mut [u8; POLL_REPLY_LEN],
    ) -> Option<usize> {
        match artnet::parse(packet) {
            Ok(ArtPacket::Dmx(frame)) => {
                self.mapper
                    .on_frame(&mut self.pixels, frame.universe, frame.sequence, frame.data);
                None
            }
            Ok(ArtPacket::Sync) => {
                self.log_sync_delta();
                let outcome = self.scheduler.request_render(&self.pixels).await;
                trace!("Artnet: sync render {}", outcome);
                None
            }
            Ok(ArtPacket::Poll) => {
                let poll_reply = PollReply {
                    address: self.address,
                    name: self.config.device_name.as_str(),
                    universe: self.config.start_universe,
                };
                artnet::write_poll_reply(&poll_reply, reply);
                Some(POLL_REPLY_LEN)
            }
            Ok(ArtPacket::Other(opcode)) => {
                trace!("Artnet: ignoring opcode {}", opcode);
                None
            }
            Err(err) => {
                trace!("Artnet: dropped packet: {}", err);
                None
            }
        }
    }

    fn log_sync_delta(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_sync.replace(now) {
            debug!(
                "Artnet: sync delta {} ms",
                now.saturating_duration_since(last).as_millis()
            );
        }
    }
}
