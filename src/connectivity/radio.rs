//! [`Radio`] for the Pico W's CYW43439, with the embassy-net stack on top.
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::net::Ipv4Addr;

use cyw43::{Control, JoinOptions, PowerManagementMode};
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use embassy_executor::Spawner;
use embassy_net::{Config, DhcpConfig, Ipv4Cidr, Stack, StackResources, StaticConfigV4};
use embassy_rp::Peri;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::Pio;
use embassy_time::{Duration, with_timeout};
use heapless::Vec;
use static_cell::StaticCell;

use super::{Radio, RadioMode};
use crate::Result;
use crate::pio_irqs::Irqs;

/// How long a join may wait for its DHCP lease.
const LEASE_TIMEOUT: Duration = Duration::from_secs(10);
const AP_CHANNEL: u8 = 6;
const STACK_SEED: u64 = 0x5a17_c0de_a27e_4e75;

/// The radio pins and peripherals the Pico W wires to the CYW43439.
pub struct RadioPins {
    /// Power enable.
    pub power: Peri<'static, PIN_23>,
    /// SPI data.
    pub data: Peri<'static, PIN_24>,
    /// SPI chip select.
    pub chip_select: Peri<'static, PIN_25>,
    /// SPI clock.
    pub clock: Peri<'static, PIN_29>,
    /// PIO block running the SPI program.
    pub pio: Peri<'static, PIO0>,
    /// DMA channel feeding the SPI program.
    pub dma: Peri<'static, DMA_CH0>,
}

/// The CYW43439 driver's control half and the network stack it feeds.
pub struct Cyw43Radio {
    control: Control<'static>,
    stack: Stack<'static>,
    joined: bool,
}

impl Cyw43Radio {
    /// Boot the radio firmware and start the driver and network tasks.
    ///
    /// The stack starts out expecting DHCP. [`Radio::configure_address`]
    /// switches it to a static address for the hotspot.
    ///
    /// # Errors
    ///
    /// Returns an error if a task cannot be spawned.
    pub async fn start(pins: RadioPins, spawner: Spawner) -> Result<(Self, Stack<'static>)> {
        static STATE: StaticCell<cyw43::State> = StaticCell::new();
        static RESOURCES: StaticCell<StackResources<6>> = StaticCell::new();

        let firmware = cyw43_firmware::CYW43_43439A0;
        let clm = cyw43_firmware::CYW43_43439A0_CLM;

        let power = Output::new(pins.power, Level::Low);
        let chip_select = Output::new(pins.chip_select, Level::High);
        let mut pio = Pio::new(pins.pio, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            chip_select,
            pins.data,
            pins.clock,
            pins.dma,
        );

        let state = STATE.init(cyw43::State::new());
        let (net_device, mut control, runner) = cyw43::new(state, power, spi, firmware).await;
        spawner.spawn(cyw43_task(runner)?);

        control.init(clm).await;
        // Power saving adds tens of milliseconds of latency to every packet.
        control
            .set_power_management(PowerManagementMode::None)
            .await;

        let (stack, runner) = embassy_net::new(
            net_device,
            Config::dhcpv4(DhcpConfig::default()),
            RESOURCES.init(StackResources::new()),
            STACK_SEED,
        );
        spawner.spawn(net_task(runner)?);
        info!("Radio: firmware up");

        Ok((
            Self {
                control,
                stack,
                joined: false,
            },
            stack,
        ))
    }
}

impl Radio for Cyw43Radio {
    async fn set_mode(&mut self, mode: RadioMode) {
        debug!("Radio: switching to {}", mode);
        // Both roles start from a radio with no association.
        self.control.leave().await;
        self.joined = false;
    }

    async fn join(&mut self, network_name: &str, secret: Option<&str>) {
        let options = secret.map_or_else(JoinOptions::new_open, |secret| {
            JoinOptions::new(secret.as_bytes())
        });
        self.joined = match self.control.join(network_name, options).await {
            Ok(()) => true,
            Err(err) => {
                debug!("Radio: join status {}", err.status);
                false
            }
        };
    }

    async fn is_connected(&mut self) -> bool {
        if !self.joined {
            return false;
        }
        if with_timeout(LEASE_TIMEOUT, self.stack.wait_config_up())
            .await
            .is_err()
        {
            warn!("Radio: joined but no DHCP lease");
            return false;
        }
        if let Some(config) = self.stack.config_v4() {
            info!("Radio: address {}", config.address);
        }
        true
    }

    async fn start_access_point(&mut self, name: &str) {
        self.control.start_ap_open(name, AP_CHANNEL).await;
    }

    async fn configure_address(&mut self, address: Ipv4Addr, prefix_len: u8) {
        self.stack.set_config_v4(embassy_net::ConfigV4::Static(StaticConfigV4 {
            address: Ipv4Cidr::new(address, prefix_len),
            gateway: Some(address),
            dns_servers: Vec::from_slice(&[address]).unwrap_or_default(),
        }));
        info!("Radio: switched to a static /{} address", prefix_len);
    }
}

#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
