use embassy_net::Runner;
use embassy_time::Timer;
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use log::{error, info, warn};
use smartplug_core::config::WifiConfig;
use smartplug_core::reconnect::Backoff;

use crate::app_state::{APP_STATE, AppError, AppRunState, describe};

/// Keeps the station associated, reconnecting with backoff
#[embassy_executor::task]
pub async fn wifi_task(mut controller: WifiController<'static>, config: WifiConfig) {
    APP_STATE
        .lock()
        .await
        .set_run_state(AppRunState::WifiConnecting);

    let mut backoff = Backoff::default();
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            warn!("WiFi disconnected");
            APP_STATE.lock().await.set_wifi_connected(false);
            Timer::after(backoff.next_delay()).await;
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client = ClientConfig::default()
                .with_ssid(config.ssid.as_str().into())
                .with_password(config.password.as_str().into());
            if let Err(e) = controller.set_config(&ModeConfig::Client(client)) {
                error!("WiFi configuration rejected: {:?}", e);
                APP_STATE.lock().await.set_run_state(AppRunState::Error);
                Timer::after(backoff.next_delay()).await;
                continue;
            }
            if let Err(e) = controller.start_async().await {
                warn!("WiFi start failed: {:?}", e);
                Timer::after(backoff.next_delay()).await;
                continue;
            }
            info!("WiFi started");
        }

        info!(
            "Connecting to {} (attempt {})",
            config.ssid,
            backoff.attempts() + 1
        );
        match controller.connect_async().await {
            Ok(()) => {
                info!("WiFi associated");
                backoff.reset();
                APP_STATE.lock().await.set_wifi_connected(true);
            }
            Err(e) => {
                let error = AppError::Wifi(describe(format_args!("{:?}", e)));
                APP_STATE.lock().await.record_error(error);
                Timer::after(backoff.next_delay()).await;
            }
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
