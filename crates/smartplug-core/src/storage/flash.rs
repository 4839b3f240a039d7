use embedded_storage::nor_flash::{NorFlash, NorFlashError};
use log::{info, warn};

use super::record::{self, HEADER_SIZE, Header, MAX_RECORD_SIZE};
use super::{PersistedState, SettingsStore, StorageError};

/// Settings kept in one erase sector of NOR flash.
///
/// Every save erases the sector and rewrites the whole record, so callers
/// should rate-limit saves (the controller does for the energy counter).
pub struct FlashSettingsStore<F: NorFlash> {
    flash: F,
    offset: u32,
    buf: [u8; MAX_RECORD_SIZE],
}

fn flash_err<E: NorFlashError>(e: E) -> StorageError {
    StorageError::Flash(e.kind())
}

impl<F: NorFlash> FlashSettingsStore<F> {
    /// `offset` must be aligned to `F::ERASE_SIZE`
    pub fn new(flash: F, offset: u32) -> Self {
        debug_assert_eq!(offset as usize % F::ERASE_SIZE, 0);
        Self {
            flash,
            offset,
            buf: [0; MAX_RECORD_SIZE],
        }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn read_align() -> usize {
        F::READ_SIZE.max(F::WRITE_SIZE).max(1)
    }
}

impl<F: NorFlash> SettingsStore for FlashSettingsStore<F> {
    fn load(&mut self) -> Result<Option<PersistedState>, StorageError> {
        let mut header = [0u8; HEADER_SIZE];
        self.flash
            .read(self.offset, &mut header)
            .map_err(flash_err)?;

        let payload_len = match record::parse_header(&header)? {
            Header::Empty => return Ok(None),
            Header::OtherVersion(version) => {
                warn!("Ignoring settings record version {}", version);
                return Ok(None);
            }
            Header::Valid { payload_len } => payload_len,
        };

        let total = record::padded_len(HEADER_SIZE + payload_len, Self::read_align());
        if total > MAX_RECORD_SIZE {
            return Err(StorageError::Corrupt);
        }
        self.flash
            .read(self.offset, &mut self.buf[..total])
            .map_err(flash_err)?;

        let state = record::decode_payload(&self.buf[HEADER_SIZE..HEADER_SIZE + payload_len])?;
        Ok(Some(state))
    }

    fn save(&mut self, state: &PersistedState) -> Result<(), StorageError> {
        let len = record::encode(state, &mut self.buf, Self::read_align())?;
        if len > F::ERASE_SIZE {
            return Err(StorageError::NoSpace);
        }

        self.erase()?;
        self.flash
            .write(self.offset, &self.buf[..len])
            .map_err(flash_err)?;
        info!("Settings saved ({} bytes)", len);
        Ok(())
    }

    fn erase(&mut self) -> Result<(), StorageError> {
        self.flash
            .erase(self.offset, self.offset + F::ERASE_SIZE as u32)
            .map_err(flash_err)
    }
}
