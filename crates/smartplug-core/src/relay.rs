//! Relay state machine and GPIO driver

use embedded_hal::digital::OutputPin;
use serde::{Deserialize, Serialize};

/// Switched state of the load output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelayState {
    #[default]
    Off,
    On,
}

impl RelayState {
    pub const fn is_on(self) -> bool {
        matches!(self, Self::On)
    }

    /// State after applying `command`
    pub const fn apply(self, command: RelayCommand) -> Self {
        match command {
            RelayCommand::On => Self::On,
            RelayCommand::Off => Self::Off,
            RelayCommand::Toggle => match self {
                Self::On => Self::Off,
                Self::Off => Self::On,
            },
        }
    }
}

impl From<bool> for RelayState {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

/// A request to change the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
    Toggle,
}

/// What the relay does when the plug powers up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerOnBehavior {
    /// Always start switched off
    Off,
    /// Always start switched on
    On,
    /// Return to the state persisted before power loss
    #[default]
    Restore,
}

impl PowerOnBehavior {
    /// Relay state to apply at boot, given the last persisted state
    pub const fn initial_state(self, persisted: RelayState) -> RelayState {
        match self {
            Self::Off => RelayState::Off,
            Self::On => RelayState::On,
            Self::Restore => persisted,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Restore => "restore",
        }
    }
}

/// Relay coil driver.
///
/// Keeps track of the logical state so callers never need to read the pin
/// back. `active_high` selects the pin level that closes the contacts.
pub struct Relay<P: OutputPin> {
    pin: P,
    active_high: bool,
    state: RelayState,
}

impl<P: OutputPin> Relay<P> {
    /// Wrap the pin and drive it to `initial` immediately
    pub fn new(pin: P, active_high: bool, initial: RelayState) -> Result<Self, P::Error> {
        let mut relay = Self {
            pin,
            active_high,
            state: initial,
        };
        relay.drive(initial)?;
        Ok(relay)
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn set(&mut self, state: RelayState) -> Result<(), P::Error> {
        self.drive(state)?;
        self.state = state;
        Ok(())
    }

    fn drive(&mut self, state: RelayState) -> Result<(), P::Error> {
        if state.is_on() == self.active_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        }
    }
}
