#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::StackResources;
use embassy_time::{Duration, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use rtt_target::rprintln;
use smartplug_core::config::DeviceConfig;
use smartplug_core::plug::SmartPlug;
use smartplug_core::storage::{PersistedState, SettingsStore};
use smartplug_firmware::app_state::{self, APP_STATE, AppRunState};
use smartplug_firmware::tasks::{
    button_task, control_task, led_task, meter_task, mqtt_task, net_task, wifi_task,
};
use smartplug_firmware::wifi_secrets::BUILD_ENV;
use static_cell::StaticCell;

/// DHCP, DNS, and the broker connection
const NET_SOCKETS: usize = 3;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();
    rprintln!("{}", smartplug_core::banner());

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 66320);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_interrupt = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    info!("Embassy initialized");

    // Settings first: the relay's power-on state depends on them
    let mut store = app_state::init_settings_store(peripherals.FLASH);
    let factory = DeviceConfig::from_build_env(&BUILD_ENV).unwrap_or_else(|e| {
        error!("Build-time configuration unusable: {}", e);
        DeviceConfig::default()
    });
    let plug = SmartPlug::new(PersistedState::restore(store.load(), factory));

    let relay = app_state::init_relay(peripherals.GPIO4, plug.relay());
    APP_STATE
        .lock()
        .await
        .set_plug_status(plug.relay(), false);

    let led = app_state::init_led(peripherals.GPIO3);
    let button = app_state::init_button(peripherals.GPIO9);
    let meter = app_state::init_meter(peripherals.GPIO6, peripherals.GPIO7, peripherals.GPIO10);

    let device_id = app_state::device_id();
    info!("Device id {}", device_id);

    let device_config = plug.config().clone();

    spawner.spawn(control_task(plug, relay, store).expect("Failed to create control task"));
    spawner.spawn(led_task(led).expect("Failed to create LED task"));
    spawner.spawn(button_task(button).expect("Failed to create button task"));
    spawner.spawn(meter_task(meter).expect("Failed to create meter task"));

    match device_config.validate() {
        Ok(()) => {
            static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
            let radio =
                RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
            let (wifi_controller, interfaces) =
                esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
                    .expect("Failed to initialize Wi-Fi controller");

            let rng = Rng::new();
            let seed = (rng.random() as u64) << 32 | rng.random() as u64;

            static NET_RESOURCES: StaticCell<StackResources<NET_SOCKETS>> = StaticCell::new();
            let (stack, runner) = embassy_net::new(
                interfaces.sta,
                embassy_net::Config::dhcpv4(Default::default()),
                NET_RESOURCES.init(StackResources::new()),
                seed,
            );

            spawner.spawn(net_task(runner).expect("Failed to create net task"));
            spawner.spawn(
                wifi_task(wifi_controller, device_config.wifi).expect("Failed to create WiFi task"),
            );
            spawner.spawn(
                mqtt_task(stack, device_config.mqtt, device_id)
                    .expect("Failed to create MQTT task"),
            );
        }
        Err(e) => {
            // The plug still works from the button without a network
            warn!("Network disabled: {}", e);
            APP_STATE.lock().await.set_run_state(AppRunState::Error);
        }
    }

    loop {
        Timer::after(Duration::from_secs(60)).await;
        let state = APP_STATE.lock().await;
        info!(
            "Heartbeat: {}, heap used {} bytes",
            state.run_state.label(),
            esp_alloc::HEAP.used()
        );
        if let Some(e) = &state.last_error {
            info!("Last error: {}", e);
        }
    }
}
