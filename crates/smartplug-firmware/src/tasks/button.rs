use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};
use esp_hal::gpio::Input;
use log::info;
use smartplug_core::app_state::CONTROL_CHANNEL;
use smartplug_core::button::{ButtonGesture, ButtonTracker};
use smartplug_core::plug::PlugInput;

use super::now_ms;

/// Delay before sampling the level after an edge
const SETTLE: Duration = Duration::from_millis(10);

/// How often a held button is checked for a long press
const HOLD_POLL: Duration = Duration::from_millis(100);

async fn sample(button: &mut Input<'static>, tracker: &mut ButtonTracker) -> Option<ButtonGesture> {
    Timer::after(SETTLE).await;
    // Active low
    tracker.on_edge(button.is_low(), now_ms())
}

#[embassy_executor::task]
pub async fn button_task(mut button: Input<'static>) {
    let mut tracker = ButtonTracker::new();
    loop {
        let gesture = if tracker.is_held() {
            match select(button.wait_for_any_edge(), Timer::after(HOLD_POLL)).await {
                Either::First(()) => sample(&mut button, &mut tracker).await,
                Either::Second(()) => tracker.poll(now_ms()),
            }
        } else {
            button.wait_for_any_edge().await;
            sample(&mut button, &mut tracker).await
        };

        if let Some(gesture) = gesture {
            info!("Button {:?}", gesture);
            CONTROL_CHANNEL.send(PlugInput::Button(gesture)).await;
        }
    }
}
