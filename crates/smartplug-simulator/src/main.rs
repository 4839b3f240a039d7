//! Desktop simulator for the SmartPlug Pro controller.
//!
//! Runs the same `SmartPlug` state machine as the firmware against a
//! synthetic load, a RAM settings store, and commands typed on stdin.
//! Everything the firmware would publish is printed as `topic payload`.
//!
//! # Commands
//!
//! | Input              | Effect                                     |
//! |--------------------|--------------------------------------------|
//! | `press`            | Short button press                         |
//! | `hold`             | Long button press (factory reset)          |
//! | `load <watts>`     | Change the attached load                   |
//! | `<command> <arg>`  | MQTT command, e.g. `relay ON`, `calibrate 60` |
//! | `connect`          | Simulate a broker (re)connect              |
//! | `quit`             | Exit                                       |

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use log::{error, info, warn};

use smartplug_core::button::ButtonGesture;
use smartplug_core::commands::PlugCommand;
use smartplug_core::config::{BuildEnv, DeviceConfig};
use smartplug_core::metering::{MeterError, PowerMeter, PowerReading};
use smartplug_core::mqtt::{AVAILABILITY_ONLINE, Topic, TopicKind, Topics};
use smartplug_core::plug::{PlugAction, PlugInput, SmartPlug};
use smartplug_core::relay::RelayState;
use smartplug_core::storage::{MemoryStore, PersistedState, SettingsStore};
use smartplug_core::{DeviceId, telemetry};

/// Interval between synthetic meter readings
const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Locally administered MAC for the simulated device
const SIM_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x5a, 0x1b, 0x2c];

const FACTORY_ENV: BuildEnv<'static> = BuildEnv {
    wifi_ssid: "simulated",
    wifi_password: "",
    mqtt_host: "localhost",
    mqtt_port: "",
    mqtt_username: "",
    mqtt_password: "",
    topic_prefix: "",
};

/// Resistive load with a little ripple, only drawing power while the relay
/// is closed.
struct SyntheticLoad {
    load_mw: u32,
    relay_on: bool,
    ticks: u32,
}

impl SyntheticLoad {
    fn new(load_mw: u32) -> Self {
        Self {
            load_mw,
            relay_on: false,
            ticks: 0,
        }
    }
}

impl PowerMeter for SyntheticLoad {
    async fn read(&mut self) -> Result<PowerReading, MeterError> {
        self.ticks = self.ticks.wrapping_add(1);
        let t = self.ticks as f64;
        let voltage_mv = (230_000.0 + 1_500.0 * (t / 17.0).sin()) as u32;

        if !self.relay_on {
            return Ok(PowerReading {
                voltage_mv,
                current_ma: 0,
                power_mw: 0,
            });
        }

        let power_mw = (self.load_mw as f64 * (1.0 + 0.02 * (t / 5.0).sin())) as u32;
        let current_ma = (power_mw as u64 * 1000 / voltage_mv as u64) as u32;
        Ok(PowerReading {
            voltage_mv,
            current_ma,
            power_mw,
        })
    }
}

enum Line {
    Input(PlugInput),
    Load(u32),
    Quit,
}

/// Parse one stdin line. MQTT commands go through the same parser as
/// messages from the broker.
fn parse_line(line: &str, topics: &Topics) -> Result<Option<Line>, String> {
    let line = line.trim();
    let (word, arg) = line.split_once(' ').unwrap_or((line, ""));
    let line = match word {
        "" => return Ok(None),
        "quit" | "exit" => Line::Quit,
        "press" => Line::Input(PlugInput::Button(ButtonGesture::Press)),
        "hold" => Line::Input(PlugInput::Button(ButtonGesture::LongPress)),
        "connect" => Line::Input(PlugInput::MqttConnected),
        "load" => {
            let load_mw = arg
                .trim()
                .parse::<u32>()
                .ok()
                .and_then(|watts| watts.checked_mul(1000))
                .ok_or_else(|| format!("bad load {arg:?}"))?;
            Line::Load(load_mw)
        }
        name => {
            let topic = format!("{}/cmnd/{}", topics.base(), name);
            let command = PlugCommand::parse(topics, &topic, arg.trim().as_bytes())
                .map_err(|e| format!("{name}: {e}"))?;
            Line::Input(PlugInput::Command(command))
        }
    };
    Ok(Some(line))
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Simulated device: controller and settings store
struct Device {
    plug: SmartPlug,
    store: MemoryStore,
    topics: Topics,
    device_id: DeviceId,
    factory: DeviceConfig,
}

impl Device {
    fn boot(
        store: MemoryStore,
        topics: Topics,
        device_id: DeviceId,
        factory: DeviceConfig,
    ) -> Self {
        let mut device = Self {
            plug: SmartPlug::new(PersistedState::default()),
            store,
            topics,
            device_id,
            factory,
        };
        device.restart(0);
        device
    }

    /// Reload from the store as the firmware does at power-up, then announce
    /// on the (simulated) broker
    fn restart(&mut self, now_ms: u64) {
        info!("{}", smartplug_core::banner());
        let persisted = PersistedState::restore(self.store.load(), self.factory.clone());
        self.plug = SmartPlug::new(persisted);
        info!("Relay {:?} after boot", self.plug.relay());

        self.publish(TopicKind::Availability, AVAILABILITY_ONLINE, true);
        let info = telemetry::info_payload(&self.device_id, Some([127, 0, 0, 1]));
        self.publish(TopicKind::Info, &info, true);
        self.step(PlugInput::MqttConnected, now_ms);
    }

    fn publish(&self, kind: TopicKind, payload: &str, retain: bool) {
        let topic: Topic = self.topics.topic(kind);
        let retained = if retain { " (retained)" } else { "" };
        println!("{}{} {}", topic, retained, payload);
    }

    /// Run one input through the controller and carry out its actions
    fn step(&mut self, input: PlugInput, now_ms: u64) {
        let mut reboot = false;
        for action in self.plug.handle(input, now_ms) {
            match action {
                PlugAction::DriveRelay(state) => info!("Relay driven {:?}", state),
                PlugAction::Publish(outbound) => {
                    self.publish(outbound.kind, &outbound.payload, outbound.retain)
                }
                PlugAction::Persist => {
                    if let Err(e) = self.store.save(&self.plug.persisted_state()) {
                        error!("Save failed: {}", e);
                    }
                }
                PlugAction::Reboot => reboot = true,
                PlugAction::FactoryReset => {
                    warn!("Factory reset");
                    if let Err(e) = self.store.erase() {
                        error!("Erase failed: {}", e);
                    }
                    reboot = true;
                }
            }
        }
        if reboot {
            info!("--- reboot ---");
            self.restart(now_ms);
        }
    }
}

fn main() {
    env_logger::init();
    info!("Starting SmartPlug Pro simulator");
    info!("Commands: press, hold, load <W>, connect, quit");
    info!(
        "Device commands: relay ON|OFF|TOGGLE, power_on <mode>, report_interval <s>, \
         calibrate <W>, energy_reset, clear_fault, reboot, factory_reset"
    );

    let device_id = DeviceId::from_mac(SIM_MAC);
    info!("Device id {}", device_id);
    let factory = match DeviceConfig::from_build_env(&FACTORY_ENV) {
        Ok(config) => config,
        Err(e) => {
            error!("Factory configuration invalid: {}", e);
            return;
        }
    };
    let Some(topics) = Topics::new(&factory.mqtt.topic_prefix, &device_id) else {
        error!("Topic prefix too long");
        return;
    };

    let mut device = Device::boot(MemoryStore::new(), topics, device_id, factory);
    let mut load = SyntheticLoad::new(60_000);
    let started = Instant::now();
    let now_ms = || started.elapsed().as_millis() as u64;

    let lines = spawn_stdin_reader();
    let mut last_sample = Instant::now();

    'running: loop {
        // --- stdin --------------------------------------------------------
        loop {
            let line = match lines.try_recv() {
                Ok(line) => line,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'running,
            };
            let input = match parse_line(&line, &device.topics) {
                Ok(Some(Line::Input(input))) => input,
                Ok(Some(Line::Load(load_mw))) => {
                    info!("Load set to {} mW", load_mw);
                    load.load_mw = load_mw;
                    continue;
                }
                Ok(Some(Line::Quit)) => break 'running,
                Ok(None) => continue,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };
            device.step(input, now_ms());
        }

        // --- Synthetic meter ---------------------------------------------
        if last_sample.elapsed() >= SAMPLE_INTERVAL {
            load.relay_on = device.plug.relay() == RelayState::On;
            match embassy_futures::block_on(load.read()) {
                Ok(reading) => device.step(PlugInput::Reading(reading), now_ms()),
                Err(e) => warn!("Meter read failed: {}", e),
            }
            last_sample = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(20));
    }

    info!(
        "Simulator exiting: {} mWh, {} settings writes",
        device.plug.energy_mwh(),
        device.store.save_count()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics::new("smartplug", &DeviceId::from_mac(SIM_MAC)).unwrap()
    }

    #[test]
    fn test_parse_load() {
        assert!(matches!(
            parse_line("load 60", &topics()),
            Ok(Some(Line::Load(60_000)))
        ));
    }

    #[test]
    fn test_parse_load_out_of_range() {
        assert!(parse_line("load 5000000", &topics()).is_err());
        assert!(parse_line("load -1", &topics()).is_err());
    }

    #[test]
    fn test_parse_device_command() {
        assert!(matches!(
            parse_line("relay ON", &topics()),
            Ok(Some(Line::Input(PlugInput::Command(_))))
        ));
        assert!(parse_line("bogus 1", &topics()).is_err());
    }
}
