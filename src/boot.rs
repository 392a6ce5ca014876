//! Device bring-up: settings, radio, then one of the two run modes.
//!
//! Joined mode starts the render context on core 1 and pumps Art-Net on
//! core 0. Hotspot mode starts the captive services instead, and the strip
//! is never touched.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;

use embassy_executor::{Executor, Spawner};
use embassy_net::Stack;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_rp::Peri;
use embassy_rp::multicore::{self, spawn_core1};
use embassy_rp::peripherals::{CORE1, DMA_CH1, PIN_2, PIO1};
use embassy_rp::pio::Pio;
use static_cell::StaticCell;

use crate::artnet::{self, ARTNET_PORT, MAX_PACKET_LEN, POLL_REPLY_LEN};
use crate::config::DeviceConfig;
use crate::connectivity::radio::{Cyw43Radio, RadioPins};
use crate::connectivity::{
    ConnectivityManager, ConnectivityState, HOTSPOT_ADDRESS, dhcp, dns, portal,
};
use crate::node::ArtnetNode;
use crate::pio_irqs::Irqs;
use crate::pixel_buffer::PixelLayout;
use crate::render::RenderScheduler;
use crate::render::ws2812::Ws2812;
use crate::storage::{self, SettingsFlash};
use crate::{Error, Result};

static RENDER_SCHEDULER: RenderScheduler = RenderScheduler::new();

/// The strip's data line and the hardware that drives it.
struct StripPins {
    core: Peri<'static, CORE1>,
    pio: Peri<'static, PIO1>,
    data: Peri<'static, PIN_2>,
    dma: Peri<'static, DMA_CH1>,
}

/// Run the node. Only returns if bring-up fails.
///
/// # Errors
///
/// Returns an error if a task cannot be spawned or a socket cannot be bound.
pub async fn run(spawner: Spawner) -> Result<Infallible> {
    static CONFIG: StaticCell<DeviceConfig> = StaticCell::new();
    let p = embassy_rp::init(embassy_rp::config::Config::default());

    let mut store = SettingsFlash::new(p.FLASH);
    let config: &'static DeviceConfig = CONFIG.init(storage::load_or_default(&mut store));
    info!(
        "Boot: {} with {} pixels of {} channels from universe {}",
        config.device_name.as_str(),
        config.pixel_len(),
        config.layout().channels(),
        config.start_universe
    );

    let radio_pins = RadioPins {
        power: p.PIN_23,
        data: p.PIN_24,
        chip_select: p.PIN_25,
        clock: p.PIN_29,
        pio: p.PIO0,
        dma: p.DMA_CH0,
    };
    let (mut radio, stack) = Cyw43Radio::start(radio_pins, spawner).await?;

    let mut connectivity = ConnectivityManager::new(config);
    match connectivity.bootstrap(&mut radio).await {
        ConnectivityState::Connected => {
            let strip = StripPins {
                core: p.CORE1,
                pio: p.PIO1,
                data: p.PIN_2,
                dma: p.DMA_CH1,
            };
            start_render_context(strip, config.layout());
            spawner.spawn(portal::portal_task(stack, config, store)?);
            pump_artnet(stack, config).await
        }
        // Bootstrap only settles in the two outcomes above.
        _ => {
            spawner.spawn(dhcp::dhcp_server_task(stack, HOTSPOT_ADDRESS)?);
            spawner.spawn(portal::portal_task(stack, config, store)?);
            info!(
                "Boot: connect to {} to configure the node",
                config.device_name.as_str()
            );
            dns::serve(stack, HOTSPOT_ADDRESS).await
        }
    }
}

fn start_render_context(strip: StripPins, layout: PixelLayout) {
    static CORE1_STACK: StaticCell<multicore::Stack<8192>> = StaticCell::new();
    static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

    let StripPins {
        core,
        pio,
        data,
        dma,
    } = strip;
    spawn_core1(core, CORE1_STACK.init(multicore::Stack::new()), move || {
        let executor1 = EXECUTOR1.init(Executor::new());
        executor1.run(|spawner| match render_task(pio, data, dma, layout) {
            Ok(token) => spawner.spawn(token),
            Err(err) => error!("Render: {}", Error::from(err)),
        });
    });
    info!("Boot: render context started on core 1");
}

#[embassy_executor::task]
async fn render_task(
    pio: Peri<'static, PIO1>,
    data: Peri<'static, PIN_2>,
    dma: Peri<'static, DMA_CH1>,
    layout: PixelLayout,
) -> ! {
    let Pio {
        mut common, sm0, ..
    } = Pio::new(pio, Irqs);
    let mut driver = Ws2812::new(&mut common, sm0, dma, data, layout);
    RENDER_SCHEDULER.render_loop(&mut driver).await
}

/// Receive Art-Net on core 0 and answer polls on the subnet broadcast address.
async fn pump_artnet(stack: Stack<'static>, config: &'static DeviceConfig) -> Result<Infallible> {
    let mut rx_meta = [PacketMetadata::EMPTY; 8];
    let mut rx_buffer = [0u8; 4 * MAX_PACKET_LEN];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 2 * POLL_REPLY_LEN];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(ARTNET_PORT).map_err(|_| {
        error!("Artnet: cannot bind port {}", ARTNET_PORT);
        Error::Network
    })?;

    let mut node = ArtnetNode::new(config, &RENDER_SCHEDULER);
    let broadcast = stack.config_v4().map(|v4| {
        node.set_address(v4.address.address());
        artnet::broadcast_address(v4.address.address(), v4.address.prefix_len())
    });
    let outcome = node.render_blank().await;
    debug!("Render: blank frame {}", outcome);
    info!("Artnet: listening on port {}", ARTNET_PORT);

    let mut packet = [0u8; MAX_PACKET_LEN];
    let mut reply = [0u8; POLL_REPLY_LEN];
    loop {
        let Ok((len, _meta)) = socket.recv_from(&mut packet).await else {
            // Oversized datagrams land here.
            continue;
        };
        let Some(packet) = packet.get(..len) else {
            continue;
        };
        let Some(reply_len) = node.handle_packet(packet, &mut reply).await else {
            continue;
        };
        let (Some(broadcast), Some(reply)) = (broadcast, reply.get(..reply_len)) else {
            continue;
        };
        if socket.send_to(reply, (broadcast, ARTNET_PORT)).await.is_err() {
            debug!("Artnet: poll reply send failed");
        }
    }
}
