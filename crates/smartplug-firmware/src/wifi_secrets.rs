//! Factory network settings, baked in by `build.rs` from `.env`

use smartplug_core::config::BuildEnv;

pub const BUILD_ENV: BuildEnv<'static> = BuildEnv {
    wifi_ssid: env!("SMARTPLUG_WIFI_SSID"),
    wifi_password: env!("SMARTPLUG_WIFI_PASSWORD"),
    mqtt_host: env!("SMARTPLUG_MQTT_HOST"),
    mqtt_port: env!("SMARTPLUG_MQTT_PORT"),
    mqtt_username: env!("SMARTPLUG_MQTT_USERNAME"),
    mqtt_password: env!("SMARTPLUG_MQTT_PASSWORD"),
    topic_prefix: env!("SMARTPLUG_TOPIC_PREFIX"),
};
