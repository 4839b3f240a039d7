use alloc::vec::Vec;

use super::record::{self, HEADER_SIZE, Header, MAX_RECORD_SIZE};
use super::{PersistedState, SettingsStore, StorageError};

/// RAM-backed store using the same record format as flash.
///
/// Used by the simulator and in tests; contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    record: Option<Vec<u8>>,
    saves: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves, for checking write rate limits
    pub fn save_count(&self) -> u32 {
        self.saves
    }
}

impl SettingsStore for MemoryStore {
    fn load(&mut self) -> Result<Option<PersistedState>, StorageError> {
        let Some(bytes) = &self.record else {
            return Ok(None);
        };
        let header: [u8; HEADER_SIZE] = bytes
            .get(..HEADER_SIZE)
            .and_then(|h| h.try_into().ok())
            .ok_or(StorageError::Corrupt)?;

        match record::parse_header(&header)? {
            Header::Valid { payload_len } => {
                let payload = bytes
                    .get(HEADER_SIZE..HEADER_SIZE + payload_len)
                    .ok_or(StorageError::Corrupt)?;
                record::decode_payload(payload).map(Some)
            }
            Header::Empty | Header::OtherVersion(_) => Ok(None),
        }
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StorageError> {
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let len = record::encode(state, &mut buf, 1)?;
        self.record = Some(buf[..len].to_vec());
        self.saves += 1;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        self.record = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayState;

    #[test]
    fn test_memory_store_round_trip_and_erase() {
        let mut store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);

        let state = PersistedState {
            relay: RelayState::On,
            ..Default::default()
        };
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
        assert_eq!(store.save_count(), 1);

        store.erase().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
