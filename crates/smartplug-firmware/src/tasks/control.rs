use embassy_time::Timer;
use log::{debug, info, warn};
use smartplug_core::app_state::{APP_STATE, AppError, CONTROL_CHANNEL, OUTBOUND_CHANNEL, describe};
use smartplug_core::plug::{PlugAction, SmartPlug};
use smartplug_core::protection::ProtectionState;
use smartplug_core::storage::SettingsStore;

use super::now_ms;
use crate::app_state::{PlugRelay, PlugSettingsStore};

async fn reboot() -> ! {
    info!("Rebooting");
    // Give RTT and the MQTT task a moment to flush
    Timer::after_millis(500).await;
    esp_hal::system::software_reset()
}

/// The main loop: feeds every input to the controller and carries out the
/// resulting actions. Sole owner of the relay and the settings store.
#[embassy_executor::task]
pub async fn control_task(
    mut plug: SmartPlug,
    mut relay: PlugRelay,
    mut store: PlugSettingsStore,
) {
    loop {
        let input = CONTROL_CHANNEL.receive().await;
        let actions = plug.handle(input, now_ms());
        let online = APP_STATE.lock().await.mqtt_connected;

        for action in actions {
            match action {
                PlugAction::DriveRelay(state) => {
                    let Ok(()) = relay.set(state);
                }
                PlugAction::Publish(outbound) => {
                    // Reconnects republish current state, so offline
                    // messages can be dropped
                    if !online {
                        continue;
                    }
                    let kind = outbound.kind;
                    if OUTBOUND_CHANNEL.try_send(outbound).is_err() {
                        debug!("Outbound queue full, dropping {:?}", kind);
                    }
                }
                PlugAction::Persist => {
                    if let Err(e) = store.save(&plug.persisted_state()) {
                        let error = AppError::Storage(describe(format_args!("save: {}", e)));
                        APP_STATE.lock().await.record_error(error);
                    }
                }
                PlugAction::Reboot => reboot().await,
                PlugAction::FactoryReset => {
                    warn!("Factory reset: erasing settings");
                    if let Err(e) = store.erase() {
                        let error = AppError::Storage(describe(format_args!("erase: {}", e)));
                        APP_STATE.lock().await.record_error(error);
                    }
                    reboot().await
                }
            }
        }

        APP_STATE.lock().await.set_plug_status(
            plug.relay(),
            plug.protection_state() != ProtectionState::Armed,
        );
    }
}
