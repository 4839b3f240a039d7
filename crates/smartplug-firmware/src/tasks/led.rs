use embassy_futures::select::select;
use embassy_time::{Duration, Timer};
use esp_hal::gpio::{Level, Output};
use smartplug_core::app_state::{APP_STATE, RUN_STATE_SIGNAL};

use super::now_ms;
use crate::app_state::LED_ACTIVE_LOW;

const TICK: Duration = Duration::from_millis(50);

#[embassy_executor::task]
pub async fn led_task(mut led: Output<'static>) {
    loop {
        let pattern = APP_STATE.lock().await.led_pattern();
        let lit = pattern.is_lit(now_ms());
        led.set_level(Level::from(lit != LED_ACTIVE_LOW));

        // Run state changes show up without waiting for the tick
        select(RUN_STATE_SIGNAL.wait(), Timer::after(TICK)).await;
    }
}
