//! Firmware name, version, and per-device identity

use core::fmt::Write;

/// Product name shown in the boot banner and the MQTT info payload
pub const FIRMWARE_NAME: &str = "SmartPlug Pro";

/// Firmware version, taken from the package version
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix used for device ids derived from the station MAC
const DEVICE_ID_PREFIX: &str = "smartplug-";

/// Maximum length of a device id (`smartplug-` + 6 hex digits, with headroom)
pub const DEVICE_ID_LEN: usize = 24;

/// The startup banner, e.g. `SmartPlug Pro v1.0.0`
pub fn banner() -> heapless::String<32> {
    let mut out = heapless::String::new();
    // 13 + 2 + version always fits in 32
    let _ = write!(out, "{} v{}", FIRMWARE_NAME, FIRMWARE_VERSION);
    out
}

/// Stable identifier for a single plug.
///
/// Used as the MQTT client id and as the per-device topic segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(heapless::String<DEVICE_ID_LEN>);

impl DeviceId {
    /// Derive the id from the last three bytes of the station MAC address
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = heapless::String::new();
        let _ = write!(
            id,
            "{}{:02x}{:02x}{:02x}",
            DEVICE_ID_PREFIX, mac[3], mac[4], mac[5]
        );
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner() {
        assert_eq!(banner().as_str(), "SmartPlug Pro v1.0.0");
    }

    #[test]
    fn test_device_id_uses_low_mac_bytes() {
        let id = DeviceId::from_mac([0x24, 0x0a, 0xc4, 0xa1, 0xB2, 0x0c]);
        assert_eq!(id.as_str(), "smartplug-a1b20c");
    }
}
