//! Persistence of configuration, relay state, and the energy total

pub mod flash;
pub mod memory;
pub mod record;

pub use flash::FlashSettingsStore;
pub use memory::MemoryStore;

use embedded_storage::nor_flash::NorFlashErrorKind;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::config::{
    DeviceConfig, MAX_CURRENT_RANGE_MA, PlugSettings, REPORT_INTERVAL_RANGE_SECS,
};
use crate::relay::RelayState;

/// Everything that survives a power cycle
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedState {
    pub config: DeviceConfig,
    /// Relay state at the time of the last save, used by `PowerOnBehavior::Restore`
    pub relay: RelayState,
    pub energy_mwh: u64,
}

impl PersistedState {
    /// Combine what the store returned with the factory configuration.
    ///
    /// Network credentials always come from `factory` (they are set at build
    /// time). Plug settings, relay state, and the energy total survive from
    /// the store; plug settings outside their ranges are reset.
    pub fn restore(loaded: Result<Option<Self>, StorageError>, factory: DeviceConfig) -> Self {
        let mut state = match loaded {
            Ok(Some(state)) => {
                info!(
                    "Restored settings: relay {:?}, energy {} mWh",
                    state.relay, state.energy_mwh
                );
                state
            }
            Ok(None) => {
                info!("No saved settings, using factory configuration");
                Self::default()
            }
            Err(e) => {
                warn!("Saved settings unusable ({}), using factory configuration", e);
                Self::default()
            }
        };

        let plug = &state.config.plug;
        if !REPORT_INTERVAL_RANGE_SECS.contains(&plug.report_interval_secs)
            || !MAX_CURRENT_RANGE_MA.contains(&plug.max_current_ma)
        {
            warn!("Saved plug settings out of range, resetting");
            state.config.plug = PlugSettings::default();
        }

        state.config.wifi = factory.wifi;
        state.config.mqtt = factory.mqtt;
        state
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("flash error: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("record does not fit the settings sector")]
    NoSpace,
    #[error("stored record is corrupt")]
    Corrupt,
    #[error("failed to encode settings")]
    Encode,
}

/// Backing store for [`PersistedState`]
pub trait SettingsStore {
    /// `Ok(None)` when nothing valid has been saved yet
    fn load(&mut self) -> Result<Option<PersistedState>, StorageError>;

    fn save(&mut self, state: &PersistedState) -> Result<(), StorageError>;

    fn erase(&mut self) -> Result<(), StorageError>;
}
