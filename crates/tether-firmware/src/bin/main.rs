#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::Delay;
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiDevice;
use log::{error, info};
use static_cell::StaticCell;

use tether_core::agent::Agent;
use tether_core::console::Console;
use tether_core::readings::UniformReadings;
use tether_firmware::hardware::{create_console_uart, open_credential_store};
use tether_firmware::link::{LINK_STATE, WifiLink, link_task};
use tether_firmware::rng::HardwareRng;
use tether_firmware::session::{MqttSession, SESSION_STATE, session_task};

/// Sockets needed by DHCP, DNS and the MQTT connection
const STACK_SOCKETS: usize = 4;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("Embassy initialized!");

    // Without a usable medium there is nowhere to provision into.
    let store = open_credential_store(
        peripherals.SPI2,
        peripherals.GPIO36,
        peripherals.GPIO37,
        peripherals.GPIO35,
        peripherals.GPIO4,
    )
    .expect("Failed to open the credential store");

    let serial = create_console_uart(peripherals.UART0, peripherals.GPIO43, peripherals.GPIO44)
        .expect("Failed to configure the console UART");

    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_init =
        RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());

    static RESOURCES: StaticCell<StackResources<STACK_SOCKETS>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );

    spawner
        .spawn(net_task(runner))
        .expect("Failed to spawn network task");
    spawner
        .spawn(link_task(wifi_controller, stack))
        .expect("Failed to spawn link task");
    spawner
        .spawn(session_task(stack))
        .expect("Failed to spawn session task");

    info!("Tasks running; handing over to the agent");

    let mut agent = Agent::new(
        Console::new(serial),
        store,
        WifiLink::new(),
        &LINK_STATE,
        MqttSession::new(),
        &SESSION_STATE,
        UniformReadings::new(HardwareRng::new()),
        Delay,
    );

    // The agent only returns when the console is gone; start over.
    let Err(e) = agent.run().await;
    error!("Agent stopped: {}", e);
    esp_hal::system::software_reset()
}
