//! The plug controller: the firmware's main loop logic.
//!
//! [`SmartPlug`] is a synchronous state machine. Tasks feed it
//! [`PlugInput`]s and carry out the [`PlugAction`]s it returns, which keeps
//! every decision testable on the host.

use log::{info, warn};

use crate::button::ButtonGesture;
use crate::commands::PlugCommand;
use crate::config::DeviceConfig;
use crate::metering::{
    EnergyCounter, Hlw8012Converter, MeterAccumulator, PowerReading, PulseWindow,
};
use crate::mqtt::TopicKind;
use crate::protection::{Protection, ProtectionEvent, ProtectionState};
use crate::relay::{RelayCommand, RelayState};
use crate::storage::PersistedState;
use crate::telemetry::{self, Payload};

/// Minimum time between flash writes caused only by the energy counter
pub const ENERGY_PERSIST_INTERVAL_MS: u64 = 10 * 60 * 1000;

/// Gaps between readings longer than this are not integrated into energy.
/// Covers a stalled meter task without inventing consumption.
pub const MAX_INTEGRATION_GAP_MS: u64 = 10_000;

pub const MAX_ACTIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugInput {
    Button(ButtonGesture),
    Command(PlugCommand),
    /// Raw pulse counts from the HLW8012 front end
    Pulses(PulseWindow),
    /// A reading from a meter that converts on its own
    Reading(PowerReading),
    /// A broker session was (re)established
    MqttConnected,
}

/// A message for the MQTT task to publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub kind: TopicKind,
    pub payload: Payload,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlugAction {
    DriveRelay(RelayState),
    Publish(Outbound),
    /// Save [`SmartPlug::persisted_state`]
    Persist,
    Reboot,
    /// Erase settings, then reboot
    FactoryReset,
}

pub type Actions = heapless::Vec<PlugAction, MAX_ACTIONS>;

fn push(actions: &mut Actions, action: PlugAction) {
    if actions.push(action).is_err() {
        warn!("Plug action queue full, dropping action");
    }
}

pub struct SmartPlug {
    config: DeviceConfig,
    relay: RelayState,
    protection: Protection,
    converter: Hlw8012Converter,
    energy: EnergyCounter,
    accumulator: MeterAccumulator,
    last_reading_ms: Option<u64>,
    last_persist_ms: u64,
    energy_at_persist: u64,
}

impl SmartPlug {
    /// Restore from persisted state, applying the power-on behavior
    pub fn new(persisted: PersistedState) -> Self {
        let plug_settings = persisted.config.plug;
        let relay = plug_settings.power_on.initial_state(persisted.relay);
        info!(
            "Power-on behavior {}: relay {:?}",
            plug_settings.power_on.label(),
            relay
        );

        Self {
            relay,
            protection: Protection::new(plug_settings.max_current_ma),
            converter: Hlw8012Converter::new(plug_settings.calibration),
            energy: EnergyCounter::from_total(persisted.energy_mwh),
            accumulator: MeterAccumulator::new(
                plug_settings.report_interval_secs as u64 * 1000,
            ),
            last_reading_ms: None,
            last_persist_ms: 0,
            energy_at_persist: persisted.energy_mwh,
            config: persisted.config,
        }
    }

    pub fn relay(&self) -> RelayState {
        self.relay
    }

    pub fn protection_state(&self) -> ProtectionState {
        self.protection.state()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn energy_mwh(&self) -> u64 {
        self.energy.milliwatt_hours()
    }

    /// Snapshot to write to flash
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            config: self.config.clone(),
            relay: self.relay,
            energy_mwh: self.energy.milliwatt_hours(),
        }
    }

    pub fn handle(&mut self, input: PlugInput, now_ms: u64) -> Actions {
        let mut actions = Actions::new();
        match input {
            PlugInput::Button(ButtonGesture::Press) => {
                if self.protection.clear() {
                    info!("Fault cleared from button");
                    self.publish_fault(&mut actions);
                }
                self.switch(RelayCommand::Toggle, &mut actions);
            }
            PlugInput::Button(ButtonGesture::LongPress) => {
                warn!("Factory reset requested from button");
                push(&mut actions, PlugAction::FactoryReset);
            }
            PlugInput::Command(command) => self.on_command(command, &mut actions),
            PlugInput::Pulses(window) => match self.converter.convert(&window, self.relay.is_on()) {
                Ok(reading) => self.on_reading(reading, now_ms, &mut actions),
                Err(e) => warn!("Discarding meter window: {}", e),
            },
            PlugInput::Reading(reading) => self.on_reading(reading, now_ms, &mut actions),
            PlugInput::MqttConnected => {
                self.publish_relay(&mut actions);
                self.publish_fault(&mut actions);
            }
        }

        if self.energy_persist_due(now_ms) && !actions.contains(&PlugAction::Persist) {
            push(&mut actions, PlugAction::Persist);
        }
        if actions.contains(&PlugAction::Persist) {
            self.last_persist_ms = now_ms;
            self.energy_at_persist = self.energy.milliwatt_hours();
        }
        actions
    }

    fn energy_persist_due(&self, now_ms: u64) -> bool {
        self.energy.milliwatt_hours() != self.energy_at_persist
            && now_ms.saturating_sub(self.last_persist_ms) >= ENERGY_PERSIST_INTERVAL_MS
    }

    fn publish_relay(&self, actions: &mut Actions) {
        push(
            actions,
            PlugAction::Publish(Outbound {
                kind: TopicKind::Relay,
                payload: telemetry::relay_payload(self.relay),
                retain: true,
            }),
        );
    }

    fn publish_fault(&self, actions: &mut Actions) {
        push(
            actions,
            PlugAction::Publish(Outbound {
                kind: TopicKind::Fault,
                payload: telemetry::fault_payload(self.protection.state(), self.protection.limit()),
                retain: true,
            }),
        );
    }

    fn switch(&mut self, command: RelayCommand, actions: &mut Actions) {
        let target = self.relay.apply(command);
        if target.is_on() && self.protection.is_tripped() {
            warn!("Relay on refused: overcurrent fault latched");
            self.publish_relay(actions);
            return;
        }

        if target != self.relay {
            info!("Relay {:?} -> {:?}", self.relay, target);
            self.relay = target;
            push(actions, PlugAction::DriveRelay(target));
            push(actions, PlugAction::Persist);
        }
        // Always echo so a controller sees its command was handled
        self.publish_relay(actions);
    }

    fn on_command(&mut self, command: PlugCommand, actions: &mut Actions) {
        match command {
            PlugCommand::Relay(cmd) => self.switch(cmd, actions),
            PlugCommand::SetPowerOn(behavior) => {
                info!("Power-on behavior set to {}", behavior.label());
                self.config.plug.power_on = behavior;
                push(actions, PlugAction::Persist);
            }
            PlugCommand::SetReportInterval { secs } => {
                info!("Report interval set to {} s", secs);
                self.config.plug.report_interval_secs = secs;
                self.accumulator.set_interval(secs as u64 * 1000);
                push(actions, PlugAction::Persist);
            }
            PlugCommand::Calibrate { expected_power_mw } => {
                match self.converter.calibrate(expected_power_mw) {
                    Ok(calibration) => {
                        self.config.plug.calibration = calibration;
                        push(actions, PlugAction::Persist);
                    }
                    Err(e) => warn!("Calibration failed: {}", e),
                }
            }
            PlugCommand::ResetEnergy => {
                info!("Energy counter reset");
                self.energy.reset();
                push(actions, PlugAction::Persist);
            }
            PlugCommand::ClearFault => {
                self.protection.clear();
                self.publish_fault(actions);
            }
            PlugCommand::Reboot => {
                push(actions, PlugAction::Persist);
                push(actions, PlugAction::Reboot);
            }
            PlugCommand::FactoryReset => push(actions, PlugAction::FactoryReset),
        }
    }

    fn on_reading(&mut self, reading: PowerReading, now_ms: u64, actions: &mut Actions) {
        if let Some(last) = self.last_reading_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed <= MAX_INTEGRATION_GAP_MS {
                self.energy.add(reading.power_mw, elapsed as u32);
            }
        }
        self.last_reading_ms = Some(now_ms);

        if let ProtectionEvent::Tripped { current_ma } =
            self.protection.check(&reading, self.relay.is_on())
        {
            warn!(
                "Overcurrent: {} mA over limit {} mA, switching off",
                current_ma,
                self.protection.limit()
            );
            self.relay = RelayState::Off;
            push(actions, PlugAction::DriveRelay(RelayState::Off));
            push(actions, PlugAction::Persist);
            self.publish_relay(actions);
            self.publish_fault(actions);
        }

        if let Some(report) =
            self.accumulator
                .add_reading(now_ms, reading, self.energy.milliwatt_hours())
        {
            push(
                actions,
                PlugAction::Publish(Outbound {
                    kind: TopicKind::Power,
                    payload: telemetry::report_payload(&report),
                    retain: false,
                }),
            );
        }
    }
}
