//! Outbound MQTT payloads.
//!
//! JSON bodies are `serde` structs rendered with `serde-json-core`.
//! Quantities stay integer milli-units and the key names carry the unit.

use core::fmt::Write;

use serde::Serialize;

use crate::identity::{DeviceId, FIRMWARE_NAME, FIRMWARE_VERSION};
use crate::metering::MeterReport;
use crate::protection::ProtectionState;
use crate::relay::RelayState;

pub const PAYLOAD_LEN: usize = 256;

pub type Payload = heapless::String<PAYLOAD_LEN>;

#[derive(Serialize)]
struct ReportBody {
    power_mw: u32,
    power_min_mw: u32,
    power_max_mw: u32,
    voltage_mv: u32,
    current_ma: u32,
    energy_mwh: u64,
    samples: u32,
}

#[derive(Serialize)]
struct InfoBody<'a> {
    name: &'a str,
    version: &'a str,
    id: &'a str,
    ip: Option<&'a str>,
}

#[derive(Serialize)]
struct FaultBody {
    tripped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_ma: Option<u32>,
    limit_ma: u32,
}

/// Every body above fits well within `PAYLOAD_LEN`, so an encoding failure
/// leaves an empty payload rather than a truncated one
fn to_payload<T: Serialize>(body: &T) -> Payload {
    let mut buf = [0u8; PAYLOAD_LEN];
    let mut out = Payload::new();
    match serde_json_core::to_slice(body, &mut buf) {
        Ok(len) => {
            if let Ok(json) = core::str::from_utf8(&buf[..len]) {
                let _ = out.push_str(json);
            }
        }
        Err(e) => log::error!("Payload does not fit: {:?}", e),
    }
    out
}

pub fn relay_payload(state: RelayState) -> Payload {
    let mut out = Payload::new();
    let _ = out.push_str(match state {
        RelayState::On => "ON",
        RelayState::Off => "OFF",
    });
    out
}

pub fn report_payload(report: &MeterReport) -> Payload {
    to_payload(&ReportBody {
        power_mw: report.avg_power_mw,
        power_min_mw: report.min_power_mw,
        power_max_mw: report.max_power_mw,
        voltage_mv: report.voltage_mv,
        current_ma: report.current_ma,
        energy_mwh: report.energy_mwh,
        samples: report.samples,
    })
}

pub fn info_payload(device_id: &DeviceId, ipv4: Option<[u8; 4]>) -> Payload {
    let mut ip = heapless::String::<15>::new();
    if let Some([a, b, c, d]) = ipv4 {
        let _ = write!(ip, "{}.{}.{}.{}", a, b, c, d);
    }
    to_payload(&InfoBody {
        name: FIRMWARE_NAME,
        version: FIRMWARE_VERSION,
        id: device_id.as_str(),
        ip: ipv4.map(|_| ip.as_str()),
    })
}

pub fn fault_payload(state: ProtectionState, limit_ma: u32) -> Payload {
    let (tripped, current_ma) = match state {
        ProtectionState::Armed => (false, None),
        ProtectionState::Tripped { current_ma } => (true, Some(current_ma)),
    };
    to_payload(&FaultBody {
        tripped,
        current_ma,
        limit_ma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_payload() {
        assert_eq!(relay_payload(RelayState::On).as_str(), "ON");
        assert_eq!(relay_payload(RelayState::Off).as_str(), "OFF");
    }

    #[test]
    fn test_report_payload() {
        let report = MeterReport {
            start_ms: 0,
            samples: 30,
            avg_power_mw: 117_800,
            min_power_mw: 5,
            max_power_mw: 120_000,
            voltage_mv: 230_120,
            current_ma: 512,
            energy_mwh: 1_234,
        };
        assert_eq!(
            report_payload(&report).as_str(),
            concat!(
                "{\"power_mw\":117800,\"power_min_mw\":5,\"power_max_mw\":120000,",
                "\"voltage_mv\":230120,\"current_ma\":512,\"energy_mwh\":1234,",
                "\"samples\":30}"
            )
        );
    }

    #[test]
    fn test_info_payload() {
        let id = DeviceId::from_mac([0, 0, 0, 0xab, 0xcd, 0xef]);
        assert_eq!(
            info_payload(&id, Some([192, 168, 1, 5])).as_str(),
            concat!(
                "{\"name\":\"SmartPlug Pro\",\"version\":\"1.0.0\",",
                "\"id\":\"smartplug-abcdef\",\"ip\":\"192.168.1.5\"}"
            )
        );
        assert!(info_payload(&id, None).ends_with("\"ip\":null}"));
    }

    #[test]
    fn test_fault_payload() {
        assert_eq!(
            fault_payload(ProtectionState::Armed, 10_000).as_str(),
            "{\"tripped\":false,\"limit_ma\":10000}"
        );
        assert_eq!(
            fault_payload(ProtectionState::Tripped { current_ma: 12_300 }, 10_000).as_str(),
            "{\"tripped\":true,\"current_ma\":12300,\"limit_ma\":10000}"
        );
    }
}
