//! Bakes the factory WiFi and broker settings from `.env` into the binary.

const KEYS: [&str; 7] = [
    "SMARTPLUG_WIFI_SSID",
    "SMARTPLUG_WIFI_PASSWORD",
    "SMARTPLUG_MQTT_HOST",
    "SMARTPLUG_MQTT_PORT",
    "SMARTPLUG_MQTT_USERNAME",
    "SMARTPLUG_MQTT_PASSWORD",
    "SMARTPLUG_TOPIC_PREFIX",
];

fn main() {
    // A missing .env is not an error; unset keys become empty strings and
    // the firmware falls back to its defaults.
    if let Err(e) = dotenvy::dotenv() {
        println!("cargo:warning=no .env loaded ({e}), using defaults");
    }

    for key in KEYS {
        let value = std::env::var(key).unwrap_or_default();
        println!("cargo:rustc-env={key}={value}");
        println!("cargo:rerun-if-env-changed={key}");
    }
    println!("cargo:rerun-if-changed=.env");

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
