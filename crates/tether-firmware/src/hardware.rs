//! Peripheral bring-up for the node
//!
//! Pin assignments follow the carrier board: the console sits on the USB-UART
//! bridge (UART0, TX GPIO43 / RX GPIO44) and the SD card slot on SPI2.

use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{GPIO4, GPIO35, GPIO36, GPIO37, GPIO43, GPIO44, SPI2, UART0};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::uart::{Config as UartConfig, ConfigError, Uart};
use log::info;

use tether_core::config::CONSOLE_BAUD_RATE;
use tether_core::store::StoreError;
use tether_core::store::sd_card::{FixedTimeSource, SdCardStore};

use crate::serial::UartSerial;

/// SD cards must be initialised at no more than 400 kHz.
const SD_SPI_FREQUENCY_KHZ: u32 = 400;

pub type SdSpiDevice = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

/// The credential store as the firmware uses it
pub type CardStore = SdCardStore<SdCard<SdSpiDevice, Delay>, FixedTimeSource>;

/// Configure UART0 at the console line settings (115200 8N1).
pub fn create_console_uart(
    uart0: UART0<'static>,
    tx: GPIO43<'static>,
    rx: GPIO44<'static>,
) -> Result<UartSerial, ConfigError> {
    let uart = Uart::new(uart0, UartConfig::default().with_baudrate(CONSOLE_BAUD_RATE))?
        .with_tx(tx)
        .with_rx(rx)
        .into_async();
    Ok(UartSerial::new(uart))
}

/// Bring up the SD card and open the credential store on it.
///
/// Any failure here means the node has nowhere to keep its configuration.
pub fn open_credential_store(
    spi2: SPI2<'static>,
    sck: GPIO36<'static>,
    mosi: GPIO37<'static>,
    miso: GPIO35<'static>,
    cs: GPIO4<'static>,
) -> Result<CardStore, StoreError> {
    let spi_config = SpiConfig::default().with_frequency(Rate::from_khz(SD_SPI_FREQUENCY_KHZ));
    let spi_bus = Spi::new(spi2, spi_config)
        .map_err(|_| StoreError::Medium)?
        .with_sck(sck)
        .with_mosi(mosi)
        .with_miso(miso);

    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let spi_device = ExclusiveDevice::new(spi_bus, cs, Delay).map_err(|_| StoreError::Medium)?;

    let store = SdCardStore::open(SdCard::new(spi_device, Delay), FixedTimeSource)?;
    info!("Credential store ready on SD card");
    Ok(store)
}
