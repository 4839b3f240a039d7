use core::cell::Cell;

use embassy_futures::select::select3;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::gpio::{Input, Level};
use smartplug_core::app_state::CONTROL_CHANNEL;
use smartplug_core::metering::{Cf1Mode, PulseWindow};
use smartplug_core::plug::PlugInput;

use crate::app_state::MeterPins;

const WINDOW: Duration = Duration::from_millis(1_000);

/// CF1 output is unreliable right after SEL changes
const SEL_SETTLE: Duration = Duration::from_millis(100);

/// SEL level that routes current to CF1 (HLW8012; the BL0937 is inverted)
const SEL_CURRENT: Level = Level::Low;

fn sel_level(mode: Cf1Mode) -> Level {
    match mode {
        Cf1Mode::Current => SEL_CURRENT,
        Cf1Mode::Voltage => !SEL_CURRENT,
    }
}

async fn count_edges(pin: &mut Input<'static>, count: &Cell<u32>) {
    loop {
        pin.wait_for_rising_edge().await;
        count.set(count.get().wrapping_add(1));
    }
}

/// Count both outputs until the window closes. Each pin has its own edge
/// wait armed for the whole window, so an edge on one pin is never dropped
/// while the other is being counted.
async fn count_pulses(
    cf: &mut Input<'static>,
    cf1: &mut Input<'static>,
    mode: Cf1Mode,
) -> PulseWindow {
    let start = Instant::now();
    let cf_pulses = Cell::new(0u32);
    let cf1_pulses = Cell::new(0u32);

    select3(
        count_edges(cf, &cf_pulses),
        count_edges(cf1, &cf1_pulses),
        Timer::at(start + WINDOW),
    )
    .await;

    PulseWindow {
        cf_pulses: cf_pulses.get(),
        cf1_pulses: cf1_pulses.get(),
        window_ms: start.elapsed().as_millis() as u32,
        cf1_mode: mode,
    }
}

/// Counts HLW8012 pulses in one-second windows, alternating CF1 between
/// current and voltage, and hands each window to the controller
#[embassy_executor::task]
pub async fn meter_task(mut pins: MeterPins) {
    let mut mode = Cf1Mode::Current;
    loop {
        pins.sel.set_level(sel_level(mode));
        Timer::after(SEL_SETTLE).await;

        let window = count_pulses(&mut pins.cf, &mut pins.cf1, mode).await;
        CONTROL_CHANNEL.send(PlugInput::Pulses(window)).await;
        mode = mode.next();
    }
}
