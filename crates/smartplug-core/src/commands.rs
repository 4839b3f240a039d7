//! Parsing of inbound MQTT commands

use thiserror_no_std::Error;

use crate::config::REPORT_INTERVAL_RANGE_SECS;
use crate::mqtt::Topics;
use crate::relay::{PowerOnBehavior, RelayCommand};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("not a command topic")]
    UnknownTopic,
    #[error("unknown command")]
    UnknownCommand,
    #[error("invalid payload for {0}")]
    InvalidPayload(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugCommand {
    Relay(RelayCommand),
    SetPowerOn(PowerOnBehavior),
    SetReportInterval { secs: u16 },
    /// Known resistive load attached, in mW
    Calibrate { expected_power_mw: u32 },
    ResetEnergy,
    ClearFault,
    Reboot,
    FactoryReset,
}

fn text<'p>(payload: &'p [u8], command: &'static str) -> Result<&'p str, CommandError> {
    core::str::from_utf8(payload)
        .map(str::trim)
        .map_err(|_| CommandError::InvalidPayload(command))
}

fn parse_relay(payload: &str) -> Option<RelayCommand> {
    const ON: [&str; 3] = ["on", "1", "true"];
    const OFF: [&str; 3] = ["off", "0", "false"];
    if ON.iter().any(|v| payload.eq_ignore_ascii_case(v)) {
        Some(RelayCommand::On)
    } else if OFF.iter().any(|v| payload.eq_ignore_ascii_case(v)) {
        Some(RelayCommand::Off)
    } else if payload.eq_ignore_ascii_case("toggle") {
        Some(RelayCommand::Toggle)
    } else {
        None
    }
}

fn parse_power_on(payload: &str) -> Option<PowerOnBehavior> {
    [
        PowerOnBehavior::Off,
        PowerOnBehavior::On,
        PowerOnBehavior::Restore,
    ]
    .into_iter()
    .find(|b| payload.eq_ignore_ascii_case(b.label()))
}

/// Parse a decimal watt value with up to three fractional digits into mW
fn parse_watts_as_mw(payload: &str) -> Option<u32> {
    let (whole, frac) = payload.split_once('.').unwrap_or((payload, ""));
    if frac.len() > 3 || (whole.is_empty() && frac.is_empty()) {
        return None;
    }
    let whole: u32 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut frac_mw = 0u32;
    for (i, c) in frac.chars().enumerate() {
        let digit = c.to_digit(10)?;
        frac_mw += digit * 10u32.pow(2 - i as u32);
    }
    whole.checked_mul(1000)?.checked_add(frac_mw)
}

impl PlugCommand {
    /// Interpret a message received on one of `topics`' command topics
    pub fn parse(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Self, CommandError> {
        let name = topics
            .command_name(topic)
            .ok_or(CommandError::UnknownTopic)?;

        match name {
            "relay" => {
                let payload = text(payload, "relay")?;
                parse_relay(payload)
                    .map(PlugCommand::Relay)
                    .ok_or(CommandError::InvalidPayload("relay"))
            }
            "power_on" => {
                let payload = text(payload, "power_on")?;
                parse_power_on(payload)
                    .map(PlugCommand::SetPowerOn)
                    .ok_or(CommandError::InvalidPayload("power_on"))
            }
            "report_interval" => {
                let secs: u16 = text(payload, "report_interval")?
                    .parse()
                    .map_err(|_| CommandError::InvalidPayload("report_interval"))?;
                if !REPORT_INTERVAL_RANGE_SECS.contains(&secs) {
                    return Err(CommandError::InvalidPayload("report_interval"));
                }
                Ok(PlugCommand::SetReportInterval { secs })
            }
            "calibrate" => {
                let expected_power_mw = parse_watts_as_mw(text(payload, "calibrate")?)
                    .filter(|mw| *mw > 0)
                    .ok_or(CommandError::InvalidPayload("calibrate"))?;
                Ok(PlugCommand::Calibrate { expected_power_mw })
            }
            "energy_reset" => Ok(PlugCommand::ResetEnergy),
            "clear_fault" => Ok(PlugCommand::ClearFault),
            "reboot" => Ok(PlugCommand::Reboot),
            "factory_reset" => Ok(PlugCommand::FactoryReset),
            _ => Err(CommandError::UnknownCommand),
        }
    }
}
